//! winsvc - Windows服务工具包
//!
//! 把一个普通的可执行程序注册为系统服务并在服务管理器下运行：
//! - 解析自身可执行文件路径
//! - 以选项构建服务注册请求（显示名称、描述、启动策略、依赖）
//! - 注册、卸载、启动、停止、查询服务
//! - 在服务进程内部把启动/停止回调桥接到服务管理器的状态协议
//! - 结构化日志记录

pub mod app;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod eventlog;
pub mod logging;
pub mod manager;
pub mod platform;

// 重新导出主要类型
pub use config::Config;
pub use daemon::{run_as_service, run_in_console, LifecycleBridge, ServiceHandler};
pub use error::{Result, WinsvcError};
pub use manager::{options, RegistrationRequest, RegistryClient, ServiceOption, ServiceState};
pub use platform::{app_path, is_interactive_session, is_service_mode};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
