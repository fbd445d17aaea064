//! 服务注册管理模块
//!
//! 提供服务注册请求、启动策略、服务状态等数据模型，以及面向平台服务管理器的
//! 注册客户端（安装、卸载、启动、停止、查询）

use crate::error::{Result, WinsvcError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod client;
pub mod memory;
pub mod options;
#[cfg(windows)]
pub mod windows;

pub use client::{ManagerConnection, RegistryClient, ServiceControlManager, StopPolicy};
pub use options::ServiceOption;

/// 手动启动服务时默认传递的启动参数
pub const DEFAULT_START_ARGS: [&str; 2] = ["is", "manual-started"];

/// 服务状态
///
/// 取值与平台服务管理器的原始状态码一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// 已停止
    Stopped,
    /// 正在启动
    StartPending,
    /// 正在停止
    StopPending,
    /// 运行中
    Running,
    /// 正在恢复
    ContinuePending,
    /// 正在暂停
    PausePending,
    /// 已暂停
    Paused,
}

impl ServiceState {
    /// 从原始状态码解析
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Stopped),
            2 => Ok(Self::StartPending),
            3 => Ok(Self::StopPending),
            4 => Ok(Self::Running),
            5 => Ok(Self::ContinuePending),
            6 => Ok(Self::PausePending),
            7 => Ok(Self::Paused),
            _ => Err(WinsvcError::UnknownState { raw }),
        }
    }

    /// 转换为原始状态码
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Stopped => 1,
            Self::StartPending => 2,
            Self::StopPending => 3,
            Self::Running => 4,
            Self::ContinuePending => 5,
            Self::PausePending => 6,
            Self::Paused => 7,
        }
    }

    /// 可读标签
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::StartPending => "StartPending",
            Self::StopPending => "StopPending",
            Self::Running => "Running",
            Self::ContinuePending => "ContinuePending",
            Self::PausePending => "PausePending",
            Self::Paused => "Paused",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 平台启动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartType {
    /// 由系统引导程序加载
    Boot,
    /// 系统初始化时启动
    System,
    /// 开机自动启动
    Automatic,
    /// 按需手动启动
    OnDemand,
    /// 禁用
    Disabled,
}

/// 启动策略
///
/// `AutomaticDelayed` 是 `Automatic` 启动类型加上延迟标记，并非独立的启动类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartPolicy {
    BootStart,
    SystemStart,
    Automatic,
    AutomaticDelayed,
    OnDemand,
    Disabled,
}

impl StartPolicy {
    /// 转换为等价的注册选项
    pub fn to_option(self) -> ServiceOption {
        match self {
            Self::BootStart => options::on_boot_start(),
            Self::SystemStart => options::on_system_start(),
            Self::Automatic => options::auto_start(),
            Self::AutomaticDelayed => options::auto_delay_start(),
            Self::OnDemand => options::on_demand_start(),
            Self::Disabled => options::disabled_start(),
        }
    }
}

impl fmt::Display for StartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BootStart => "boot-start",
            Self::SystemStart => "system-start",
            Self::Automatic => "automatic",
            Self::AutomaticDelayed => "automatic-delayed",
            Self::OnDemand => "on-demand",
            Self::Disabled => "disabled",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for StartPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boot-start" => Ok(Self::BootStart),
            "system-start" => Ok(Self::SystemStart),
            "automatic" | "auto" => Ok(Self::Automatic),
            "automatic-delayed" | "auto-delayed" => Ok(Self::AutomaticDelayed),
            "on-demand" | "manual" => Ok(Self::OnDemand),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("未知的启动策略: {other}")),
        }
    }
}

/// 服务注册请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// 可执行文件绝对路径
    pub executable_path: PathBuf,
    /// 服务名称（注册表中的唯一标识）
    pub name: String,
    /// 服务显示名称
    pub display_name: String,
    /// 服务描述
    pub description: String,
    /// 启动类型
    pub start_type: StartType,
    /// 延迟自动启动标记
    pub delayed_auto_start: bool,
    /// 依赖的服务（按顺序）
    pub dependencies: Vec<String>,
    /// 启动参数
    pub launch_arguments: Vec<String>,
}

impl RegistrationRequest {
    /// 创建注册请求，默认开机自动启动
    pub fn new(executable_path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            executable_path: executable_path.into(),
            name: name.into(),
            display_name: String::new(),
            description: String::new(),
            start_type: StartType::Automatic,
            delayed_auto_start: false,
            dependencies: Vec::new(),
            launch_arguments: Vec::new(),
        }
    }

    /// 设置启动参数
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// 按顺序应用注册选项
    pub fn with_options(mut self, options: &[ServiceOption]) -> Self {
        options::apply_options(&mut self, options);
        self
    }

    /// 当前的启动策略
    ///
    /// 延迟标记只在自动启动类型下有意义，其他启动类型会忽略它。
    pub fn start_policy(&self) -> StartPolicy {
        match self.start_type {
            StartType::Boot => StartPolicy::BootStart,
            StartType::System => StartPolicy::SystemStart,
            StartType::Automatic if self.delayed_auto_start => StartPolicy::AutomaticDelayed,
            StartType::Automatic => StartPolicy::Automatic,
            StartType::OnDemand => StartPolicy::OnDemand,
            StartType::Disabled => StartPolicy::Disabled,
        }
    }
}

/// 服务控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Stop,
    Pause,
    Continue,
    Interrogate,
}
