//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// winsvc 的主要错误类型
#[derive(Error, Debug)]
pub enum WinsvcError {
    /// 服务已经注册
    #[error("服务已存在: {name}")]
    AlreadyExists { name: String },

    /// 服务或文件不存在
    #[error("未找到: {target}")]
    NotFound { target: String },

    /// 路径不可用（例如指向目录）
    #[error("无效路径: {}", path.display())]
    InvalidPath { path: PathBuf },

    /// 服务启动失败
    #[error("服务 {name} 启动失败: {reason}")]
    StartFailed { name: String, reason: String },

    /// 等待服务状态超时
    #[error("等待服务 {name} 进入 {expected} 状态超时 (已等待 {waited:?})")]
    Timeout {
        name: String,
        expected: String,
        waited: Duration,
    },

    /// 无法识别的服务状态值
    #[error("未知的服务状态: {raw}")]
    UnknownState { raw: u32 },

    /// 日志接收端错误
    #[error("事件日志错误: {0}")]
    LogSink(String),

    /// 服务控制循环运行失败
    #[error("服务控制循环失败: {0}")]
    ControlLoop(String),

    /// 服务管理器调用失败
    #[error("服务管理器错误: {0}")]
    Manager(String),

    /// 当前平台不支持该操作
    #[error("当前平台不支持: {0}")]
    Unsupported(String),

    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl WinsvcError {
    /// 构造服务不存在错误
    pub fn service_not_found(name: &str) -> Self {
        Self::NotFound {
            target: format!("服务 {name}"),
        }
    }

    /// 是否为“不存在”类错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, WinsvcError>;
