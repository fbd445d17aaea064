//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use crate::manager::StartPolicy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// winsvc - Windows服务安装与运行工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "winsvc",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE", env = "WINSVC_CONFIG")]
    pub config: Option<PathBuf>,

    /// 日志级别，未指定时使用配置文件中的级别
    #[arg(short, long, value_enum, env = "WINSVC_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// 子命令，省略时运行示例服务（服务管理器启动时的默认行为）
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 目标服务，未指定时使用配置文件中的服务名称
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct ServiceTarget {
    /// 服务名称
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 注册服务
    Install {
        #[command(flatten)]
        target: ServiceTarget,

        /// 服务显示名称
        #[arg(long)]
        display_name: Option<String>,

        /// 服务描述
        #[arg(long)]
        description: Option<String>,

        /// 启动策略：boot-start、system-start、automatic、automatic-delayed、on-demand、disabled
        #[arg(long, value_name = "POLICY")]
        start_policy: Option<StartPolicy>,

        /// 依赖的服务，可以重复指定
        #[arg(long = "depends-on", value_name = "SERVICE")]
        depends_on: Vec<String>,

        /// 服务启动参数（写在 -- 之后）
        #[arg(last = true, value_name = "ARGS")]
        arguments: Vec<String>,
    },

    /// 卸载服务
    Uninstall {
        #[command(flatten)]
        target: ServiceTarget,
    },

    /// 启动服务
    Start {
        #[command(flatten)]
        target: ServiceTarget,

        /// 本次启动的参数（写在 -- 之后），默认为 "is manual-started"
        #[arg(last = true, value_name = "ARGS")]
        arguments: Vec<String>,
    },

    /// 停止服务并等待停止完成
    Stop {
        #[command(flatten)]
        target: ServiceTarget,
    },

    /// 重启服务
    Restart {
        #[command(flatten)]
        target: ServiceTarget,
    },

    /// 查看服务状态
    Status {
        #[command(flatten)]
        target: ServiceTarget,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// 运行示例服务
    ///
    /// 由服务管理器启动时进入服务模式，否则在控制台中运行。
    Run {
        #[command(flatten)]
        target: ServiceTarget,

        /// 强制在控制台中运行
        #[arg(long)]
        debug: bool,

        /// 注册时写入的启动参数（写在 -- 之后）
        #[arg(last = true, value_name = "ARGS")]
        arguments: Vec<String>,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 要执行的子命令，未指定时为 `run`
    pub fn resolved_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run {
            target: ServiceTarget::default(),
            debug: false,
            arguments: Vec::new(),
        })
    }
}
