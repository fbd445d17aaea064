//! winsvc 主程序入口

use anyhow::{Context, Result};
use tracing::{debug, error};
use winsvc::cli::{self, Args};
use winsvc::config::TomlConfigLoader;
use winsvc::logging::{LogConfig, LoggingSystem};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let config = TomlConfigLoader::default()
        .load_or_default(args.config.as_deref())
        .await
        .context("加载配置文件失败")?;

    let mut log_config = LogConfig::from_settings(&config.logging);
    if let Some(level) = args.log_level {
        log_config.level = level.into();
    }
    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    debug!("winsvc v{} 启动", winsvc::VERSION);

    if let Err(e) = cli::dispatch(&args, config).await {
        error!("命令执行失败: {e}");
        std::process::exit(1);
    }

    Ok(())
}
