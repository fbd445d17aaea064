//! 命令处理逻辑
//!
//! 服务管理器调用都是阻塞的，命令在阻塞线程池中执行它们

use crate::app::HttpService;
use crate::cli::args::{Args, Commands, OutputFormat, ServiceTarget};
use crate::config::Config;
use crate::daemon::{self, signal_handler, ConsoleDispatcher};
use crate::error::{ConfigError, Result, WinsvcError};
use crate::manager::{RegistryClient, ServiceControlManager, ServiceOption, StartPolicy};
use crate::platform;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 命令执行上下文
pub struct CommandContext<M> {
    config: Config,
    /// 配置文件的绝对路径，注册服务时写入启动命令行
    config_path: Option<PathBuf>,
    client: Arc<RegistryClient<M>>,
}

impl<M: ServiceControlManager + 'static> CommandContext<M> {
    pub fn new(config: Config, manager: M) -> Self {
        let client = RegistryClient::new(manager).with_stop_policy(config.stop.policy());
        Self {
            config,
            config_path: None,
            client: Arc::new(client),
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn client(&self) -> &RegistryClient<M> {
        &self.client
    }

    /// 命令行指定的服务名称优先于配置文件
    pub fn service_name(&self, target: &ServiceTarget) -> String {
        target
            .name
            .clone()
            .unwrap_or_else(|| self.config.service.name.clone())
    }

    /// 在阻塞线程池中调用注册客户端
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RegistryClient<M>) -> Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| WinsvcError::Other(anyhow::anyhow!("后台任务执行失败: {e}")))?
    }
}

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static;
}

/// 注册服务命令
#[derive(Debug, Clone, Default)]
pub struct InstallCommand {
    pub target: ServiceTarget,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub start_policy: Option<StartPolicy>,
    pub depends_on: Vec<String>,
    pub arguments: Vec<String>,
    /// 可执行文件路径，未指定时使用当前进程
    pub executable: Option<PathBuf>,
}

impl InstallCommand {
    /// 合并配置文件和命令行参数得到注册选项
    pub fn options(&self, config: &Config) -> Vec<ServiceOption> {
        let mut service = config.service.clone();
        if let Some(display_name) = &self.display_name {
            service.display_name = display_name.clone();
        }
        if let Some(description) = &self.description {
            service.description = description.clone();
        }
        if let Some(start_policy) = self.start_policy {
            service.start_policy = start_policy;
        }
        if !self.depends_on.is_empty() {
            service.dependencies = self.depends_on.clone();
        }
        service.options()
    }

    /// 服务管理器启动进程时使用的命令行参数
    ///
    /// 形如 `[--config FILE] run --name NAME [-- ARGS...]`，保证服务进程以同一个名称
    /// 和配置进入 `run`。
    pub fn launch_arguments(&self, name: &str, config_path: Option<&Path>, config: &Config) -> Vec<String> {
        let mut line = Vec::new();
        if let Some(path) = config_path {
            line.push("--config".to_string());
            line.push(path.to_string_lossy().into_owned());
        }
        line.extend(["run".to_string(), "--name".to_string(), name.to_string()]);

        let extra = if self.arguments.is_empty() {
            &config.service.arguments
        } else {
            &self.arguments
        };
        if !extra.is_empty() {
            line.push("--".to_string());
            line.extend(extra.iter().cloned());
        }
        line
    }
}

#[async_trait]
impl Command for InstallCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        let executable = match &self.executable {
            Some(path) => platform::resolve_app_path(path)?,
            None => platform::app_path()?,
        };
        let arguments = self.launch_arguments(&name, ctx.config_path(), ctx.config());
        let options = self.options(ctx.config());

        println!("正在注册服务: {name}");
        println!("  可执行文件: {}", executable.display());
        let service_name = name.clone();
        ctx.blocking(move |client| {
            client.register_with_options(&executable, &service_name, &arguments, &options)
        })
        .await?;
        println!("服务注册成功: {name}");
        println!("启动服务: winsvc start --name {name}");
        Ok(())
    }
}

/// 卸载服务命令
#[derive(Debug, Clone, Default)]
pub struct UninstallCommand {
    pub target: ServiceTarget,
}

#[async_trait]
impl Command for UninstallCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        println!("正在卸载服务: {name}");
        let service_name = name.clone();
        ctx.blocking(move |client| client.unregister(&service_name)).await?;
        println!("服务卸载成功: {name}");
        Ok(())
    }
}

/// 启动服务命令
#[derive(Debug, Clone, Default)]
pub struct StartCommand {
    pub target: ServiceTarget,
    pub arguments: Vec<String>,
}

#[async_trait]
impl Command for StartCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        println!("正在启动服务: {name}");
        let service_name = name.clone();
        let arguments = self.arguments.clone();
        ctx.blocking(move |client| {
            if arguments.is_empty() {
                client.start(&service_name)
            } else {
                client.start_with_args(&service_name, &arguments)
            }
        })
        .await?;
        println!("服务启动请求已发送: {name}");
        Ok(())
    }
}

/// 停止服务命令
#[derive(Debug, Clone, Default)]
pub struct StopCommand {
    pub target: ServiceTarget,
}

#[async_trait]
impl Command for StopCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        println!("正在停止服务: {name}");
        let service_name = name.clone();
        ctx.blocking(move |client| client.stop(&service_name)).await?;
        println!("服务已停止: {name}");
        Ok(())
    }
}

/// 重启服务命令
#[derive(Debug, Clone, Default)]
pub struct RestartCommand {
    pub target: ServiceTarget,
}

#[async_trait]
impl Command for RestartCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        println!("正在重启服务: {name}");
        let service_name = name.clone();
        ctx.blocking(move |client| client.restart(&service_name)).await?;
        println!("服务重启成功: {name}");
        Ok(())
    }
}

/// 服务状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatusInfo {
    pub name: String,
    pub installed: bool,
    /// 未注册时为空
    pub state: Option<String>,
}

/// 服务状态命令
#[derive(Debug, Clone)]
pub struct StatusCommand {
    pub target: ServiceTarget,
    pub format: OutputFormat,
}

impl StatusCommand {
    pub async fn query<M>(&self, ctx: &CommandContext<M>) -> Result<ServiceStatusInfo>
    where
        M: ServiceControlManager + 'static,
    {
        let name = ctx.service_name(&self.target);
        let service_name = name.clone();
        let state = ctx
            .blocking(move |client| {
                if !client.is_installed(&service_name)? {
                    return Ok(None);
                }
                client.query_label(&service_name).map(Some)
            })
            .await?;

        Ok(ServiceStatusInfo {
            name,
            installed: state.is_some(),
            state,
        })
    }
}

#[async_trait]
impl Command for StatusCommand {
    async fn execute<M>(&self, ctx: &CommandContext<M>) -> Result<()>
    where
        M: ServiceControlManager + 'static,
    {
        let status = self.query(ctx).await?;
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Text => match &status.state {
                Some(state) => println!("服务 {}: {state}", status.name),
                None => println!("服务 {}: 未注册", status.name),
            },
        }
        Ok(())
    }
}

/// 版本命令
#[derive(Debug, Clone)]
pub struct VersionCommand {
    pub format: OutputFormat,
}

impl VersionCommand {
    pub fn print(&self) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let version_info = serde_json::json!({
                    "name": crate::APP_NAME,
                    "version": crate::VERSION,
                    "description": crate::APP_DESCRIPTION
                });
                println!("{}", serde_json::to_string_pretty(&version_info)?);
            }
            OutputFormat::Text => {
                println!("{} v{}", crate::APP_NAME, crate::VERSION);
                println!("{}", crate::APP_DESCRIPTION);
            }
        }
        Ok(())
    }
}

/// 运行示例服务命令
#[derive(Debug, Clone, Default)]
pub struct RunCommand {
    pub target: ServiceTarget,
    pub debug: bool,
    /// 启动参数，为空时使用配置文件中的参数
    pub arguments: Vec<String>,
}

impl RunCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        let name = self
            .target
            .name
            .clone()
            .unwrap_or_else(|| config.service.name.clone());
        let bind = config
            .http
            .socket_addr()
            .map_err(ConfigError::ValidationError)?;
        let service = HttpService::new(bind, tokio::runtime::Handle::current());
        let arguments = if self.arguments.is_empty() {
            config.service.arguments.clone()
        } else {
            self.arguments.clone()
        };

        if !self.debug && platform::is_service_mode() {
            info!("以服务模式运行: {name}");
            tracing::debug!("进程启动参数: {arguments:?}");
            return tokio::task::spawn_blocking(move || {
                daemon::run_as_service(&name, service.into_handler())
            })
            .await
            .map_err(|e| WinsvcError::Other(anyhow::anyhow!("服务线程执行失败: {e}")))?;
        }

        let dispatcher = ConsoleDispatcher::new().with_arguments(arguments);
        let signals = tokio::spawn(signal_handler::forward_signals(dispatcher.control_handle()));

        let result = tokio::task::spawn_blocking(move || {
            daemon::run_in_console(&name, service.into_handler(), dispatcher)
        })
        .await;

        signals.abort();
        result.map_err(|e| WinsvcError::Other(anyhow::anyhow!("服务线程执行失败: {e}")))?
    }
}

/// 执行子命令
///
/// `version` 和 `run` 不需要连接服务管理器，其余命令使用 `ctx` 中的注册客户端。
pub async fn execute_command<M>(command: &Commands, ctx: &CommandContext<M>) -> Result<()>
where
    M: ServiceControlManager + 'static,
{
    match command {
        Commands::Install {
            target,
            display_name,
            description,
            start_policy,
            depends_on,
            arguments,
        } => {
            InstallCommand {
                target: target.clone(),
                display_name: display_name.clone(),
                description: description.clone(),
                start_policy: *start_policy,
                depends_on: depends_on.clone(),
                arguments: arguments.clone(),
                executable: None,
            }
            .execute(ctx)
            .await
        }
        Commands::Uninstall { target } => UninstallCommand { target: target.clone() }.execute(ctx).await,
        Commands::Start { target, arguments } => {
            StartCommand {
                target: target.clone(),
                arguments: arguments.clone(),
            }
            .execute(ctx)
            .await
        }
        Commands::Stop { target } => StopCommand { target: target.clone() }.execute(ctx).await,
        Commands::Restart { target } => RestartCommand { target: target.clone() }.execute(ctx).await,
        Commands::Status { target, format } => {
            StatusCommand {
                target: target.clone(),
                format: *format,
            }
            .execute(ctx)
            .await
        }
        Commands::Run {
            target,
            debug,
            arguments,
        } => {
            RunCommand {
                target: target.clone(),
                debug: *debug,
                arguments: arguments.clone(),
            }
            .execute(ctx.config())
            .await
        }
        Commands::Version { format } => VersionCommand { format: *format }.print(),
    }
}

/// 按当前平台选择服务管理器并执行子命令
pub async fn dispatch(args: &Args, config: Config) -> Result<()> {
    let command = args.resolved_command();

    #[cfg(windows)]
    {
        let config_path = args
            .config
            .as_deref()
            .map(std::path::absolute)
            .transpose()?;
        let ctx = CommandContext::new(config, crate::manager::windows::WindowsManager::new())
            .with_config_path(config_path);
        execute_command(&command, &ctx).await
    }

    #[cfg(not(windows))]
    {
        match command {
            Commands::Version { format } => VersionCommand { format }.print(),
            Commands::Run {
                target,
                debug,
                arguments,
            } => {
                if !debug {
                    tracing::warn!("非Windows系统只能在控制台中运行");
                }
                RunCommand {
                    target,
                    debug: true,
                    arguments,
                }
                .execute(&config)
                .await
            }
            _ => Err(WinsvcError::Unsupported(
                "服务管理只能在Windows系统上使用".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::memory::InMemoryManager;
    use crate::manager::{ServiceState, StartType};
    use tempfile::TempDir;
    use clap::Parser;

    fn context() -> (CommandContext<InMemoryManager>, InMemoryManager) {
        let manager = InMemoryManager::new();
        (CommandContext::new(Config::default(), manager.clone()), manager)
    }

    fn named(name: &str) -> ServiceTarget {
        ServiceTarget {
            name: Some(name.to_string()),
        }
    }

    fn executable(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("app.exe");
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[tokio::test]
    async fn test_install_merges_config_and_flags() {
        let (ctx, manager) = context();
        let dir = TempDir::new().unwrap();

        let command = InstallCommand {
            target: named("demo"),
            description: Some("from flag".to_string()),
            start_policy: Some(StartPolicy::OnDemand),
            arguments: vec!["--port".to_string(), "9000".to_string()],
            executable: Some(executable(&dir)),
            ..Default::default()
        };
        command.execute(&ctx).await.unwrap();

        let registration = manager.registration("demo").unwrap();
        assert_eq!(registration.display_name, "Example Windows Service");
        assert_eq!(registration.description, "from flag");
        assert_eq!(registration.start_type, StartType::OnDemand);
        assert_eq!(
            registration.launch_arguments,
            vec!["run", "--name", "demo", "--", "--port", "9000"]
        );
        assert!(manager.has_event_source("demo"));
    }

    /// 服务管理器按注册的命令行启动进程，必须解析为同名服务的 `run`
    #[tokio::test]
    async fn test_registered_launch_line_parses_as_run() {
        let (ctx, manager) = context();
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("winsvc.toml");
        let ctx = ctx.with_config_path(Some(config_path.clone()));

        InstallCommand {
            target: named("demo"),
            executable: Some(executable(&dir)),
            ..Default::default()
        }
        .execute(&ctx)
        .await
        .unwrap();

        let registration = manager.registration("demo").unwrap();
        let mut command_line = vec![registration.executable_path.to_string_lossy().into_owned()];
        command_line.extend(registration.launch_arguments.iter().cloned());

        let args = Args::try_parse_from(&command_line).unwrap();
        assert_eq!(args.config, Some(config_path));
        match args.resolved_command() {
            Commands::Run {
                target,
                debug,
                arguments,
            } => {
                assert_eq!(target.name.as_deref(), Some("demo"));
                assert!(!debug);
                assert!(arguments.is_empty());
            }
            other => panic!("注册的命令行解析错误: {other:?}"),
        }
    }

    #[test]
    fn test_launch_line_keeps_user_arguments() {
        let mut config = Config::default();
        config.service.arguments = vec!["--verbose".to_string()];

        let command = InstallCommand::default();
        let line = command.launch_arguments("example-service", None, &config);
        assert_eq!(line, vec!["run", "--name", "example-service", "--", "--verbose"]);

        let mut command_line = vec!["winsvc.exe".to_string()];
        command_line.extend(line);
        let args = Args::try_parse_from(&command_line).unwrap();
        assert!(matches!(
            args.resolved_command(),
            Commands::Run { ref arguments, .. } if arguments == &vec!["--verbose".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_install_uses_configured_name() {
        let (ctx, manager) = context();
        let dir = TempDir::new().unwrap();

        let command = InstallCommand {
            executable: Some(executable(&dir)),
            ..Default::default()
        };
        command.execute(&ctx).await.unwrap();

        assert!(manager.registration("example-service").is_some());
    }

    #[tokio::test]
    async fn test_install_twice_fails() {
        let (ctx, _manager) = context();
        let dir = TempDir::new().unwrap();
        let command = InstallCommand {
            target: named("demo"),
            executable: Some(executable(&dir)),
            ..Default::default()
        };

        command.execute(&ctx).await.unwrap();
        let err = command.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, WinsvcError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_status_of_missing_service() {
        let (ctx, _manager) = context();
        let command = StatusCommand {
            target: named("ghost"),
            format: OutputFormat::Json,
        };

        let status = command.query(&ctx).await.unwrap();
        assert!(!status.installed);
        assert_eq!(status.state, None);
    }

    #[tokio::test]
    async fn test_lifecycle_through_commands() {
        let (ctx, manager) = context();
        let dir = TempDir::new().unwrap();

        InstallCommand {
            target: named("demo"),
            executable: Some(executable(&dir)),
            ..Default::default()
        }
        .execute(&ctx)
        .await
        .unwrap();

        StartCommand {
            target: named("demo"),
            arguments: Vec::new(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(
            manager.last_start_arguments("demo"),
            Some(vec!["is".to_string(), "manual-started".to_string()])
        );

        let status = StatusCommand {
            target: named("demo"),
            format: OutputFormat::Text,
        };
        assert_eq!(status.query(&ctx).await.unwrap().state.as_deref(), Some("Running"));

        StopCommand { target: named("demo") }.execute(&ctx).await.unwrap();
        assert_eq!(ctx.client().query("demo").unwrap(), ServiceState::Stopped);

        UninstallCommand { target: named("demo") }.execute(&ctx).await.unwrap();
        assert!(!manager.has_event_source("demo"));
        assert!(!ctx.client().is_installed("demo").unwrap());
    }

    #[test]
    fn test_dependencies_from_flags_replace_config() {
        let mut config = Config::default();
        config.service.dependencies = vec!["Tcpip".to_string()];

        let command = InstallCommand {
            depends_on: vec!["Dnscache".to_string()],
            ..Default::default()
        };
        let request = crate::manager::RegistrationRequest::new("app.exe", "demo")
            .with_options(&command.options(&config));
        assert_eq!(request.dependencies, vec!["Dnscache".to_string()]);

        let request = crate::manager::RegistrationRequest::new("app.exe", "demo")
            .with_options(&InstallCommand::default().options(&config));
        assert_eq!(request.dependencies, vec!["Tcpip".to_string()]);
    }
}
