//! 服务注册客户端
//!
//! 每个操作都会连接平台服务管理器、执行一个动作，然后释放连接。
//! 连接由 [`ManagerConnection`] 的 `Drop` 负责释放，所有退出路径上都成立。

use crate::error::{Result, WinsvcError};
use crate::manager::{
    options, RegistrationRequest, ServiceCommand, ServiceOption, ServiceState, DEFAULT_START_ARGS,
};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 平台服务管理器
///
/// 连接之外还负责事件日志源的注册与移除，这两个动作不经过服务管理器连接。
pub trait ServiceControlManager: Send + Sync {
    /// 连接类型，drop 时释放
    type Connection: ManagerConnection;

    /// 建立连接
    fn connect(&self) -> Result<Self::Connection>;

    /// 为服务注册事件日志源
    fn install_event_source(&self, name: &str) -> Result<()>;

    /// 移除服务的事件日志源
    fn remove_event_source(&self, name: &str) -> Result<()>;
}

/// 与服务管理器之间的一次连接
///
/// 状态类接口返回原始状态码，由客户端负责解析。
pub trait ManagerConnection {
    /// 探测服务是否存在（打开后立即关闭）
    fn exists(&self, name: &str) -> Result<bool>;

    /// 创建服务
    fn create(&self, request: &RegistrationRequest) -> Result<()>;

    /// 删除服务
    fn delete(&self, name: &str) -> Result<()>;

    /// 启动服务
    fn start(&self, name: &str, arguments: &[String]) -> Result<()>;

    /// 发送控制命令，返回命令发出后的原始状态码
    fn control(&self, name: &str, command: ServiceCommand) -> Result<u32>;

    /// 查询原始状态码
    fn query(&self, name: &str) -> Result<u32>;
}

/// 停止服务时的轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// 最长等待时间
    pub timeout: Duration,
    /// 轮询间隔
    pub poll_interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(300),
        }
    }
}

/// 服务注册客户端
pub struct RegistryClient<M> {
    /// 平台服务管理器
    manager: M,
    /// 停止轮询策略
    stop_policy: StopPolicy,
}

impl<M: ServiceControlManager> RegistryClient<M> {
    /// 创建新的注册客户端
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            stop_policy: StopPolicy::default(),
        }
    }

    /// 设置停止轮询策略
    pub fn with_stop_policy(mut self, stop_policy: StopPolicy) -> Self {
        self.stop_policy = stop_policy;
        self
    }

    /// 获取底层服务管理器
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// 获取停止轮询策略
    pub fn stop_policy(&self) -> StopPolicy {
        self.stop_policy
    }

    /// 注册服务
    ///
    /// 存在性检查与创建之间没有原子性保证，并发注册同名服务时可能两边都通过检查，
    /// 此时由平台的创建调用报错。事件日志源注册失败会删除刚创建的服务。
    pub fn register(&self, request: &RegistrationRequest) -> Result<()> {
        info!("注册服务: {}", request.name);

        let connection = self.manager.connect()?;

        if connection.exists(&request.name)? {
            return Err(WinsvcError::AlreadyExists {
                name: request.name.clone(),
            });
        }

        connection.create(request)?;
        debug!(
            "服务已创建: {} (启动策略: {})",
            request.name,
            request.start_policy()
        );

        if let Err(e) = self.manager.install_event_source(&request.name) {
            warn!("事件日志源注册失败，回滚服务 {}: {}", request.name, e);
            if let Err(rollback) = connection.delete(&request.name) {
                error!("回滚服务 {} 失败: {}", request.name, rollback);
            }
            return Err(e);
        }

        info!("服务注册成功: {}", request.name);
        Ok(())
    }

    /// 使用注册选项注册服务
    ///
    /// 请求默认自动启动，随后按顺序应用 `options`。
    pub fn register_with_options(
        &self,
        executable_path: &Path,
        name: &str,
        arguments: &[String],
        options: &[ServiceOption],
    ) -> Result<()> {
        let request = RegistrationRequest::new(executable_path, name)
            .with_arguments(arguments.iter().cloned())
            .with_options(options);
        self.register(&request)
    }

    /// 以固定字段注册服务（自动启动）
    pub fn register_basic(
        &self,
        executable_path: &Path,
        name: &str,
        display_name: &str,
        description: &str,
        arguments: &[String],
    ) -> Result<()> {
        self.register_with_options(
            executable_path,
            name,
            arguments,
            &[
                options::display_name(display_name),
                options::description(description),
                options::auto_start(),
            ],
        )
    }

    /// 卸载服务
    ///
    /// 先删除服务，再移除事件日志源。日志源移除失败时返回错误，但已删除的服务不会恢复。
    pub fn unregister(&self, name: &str) -> Result<()> {
        info!("卸载服务: {name}");

        let connection = self.manager.connect()?;

        if !connection.exists(name)? {
            return Err(WinsvcError::service_not_found(name));
        }

        connection.delete(name)?;
        self.manager.remove_event_source(name)?;

        info!("服务卸载成功: {name}");
        Ok(())
    }

    /// 启动服务，传递默认启动参数
    pub fn start(&self, name: &str) -> Result<()> {
        let arguments: Vec<String> = DEFAULT_START_ARGS.iter().map(|s| s.to_string()).collect();
        self.start_with_args(name, &arguments)
    }

    /// 启动服务
    pub fn start_with_args(&self, name: &str, arguments: &[String]) -> Result<()> {
        info!("启动服务: {name}");
        let connection = self.manager.connect()?;
        connection.start(name, arguments)?;
        info!("服务启动请求已发送: {name}");
        Ok(())
    }

    /// 停止服务并等待其进入已停止状态
    pub fn stop(&self, name: &str) -> Result<()> {
        info!("停止服务: {name}");
        self.control(name, ServiceCommand::Stop, ServiceState::Stopped)?;
        info!("服务已停止: {name}");
        Ok(())
    }

    /// 发送控制命令并轮询，直到服务进入 `target` 状态或超时
    ///
    /// 截止时间之后不再发起任何查询。
    pub fn control(&self, name: &str, command: ServiceCommand, target: ServiceState) -> Result<()> {
        let connection = self.manager.connect()?;

        let started = Instant::now();
        let deadline = started + self.stop_policy.timeout;
        let mut state = ServiceState::from_raw(connection.control(name, command)?)?;

        while state != target {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(name, target, started));
            }

            thread::sleep(self.stop_policy.poll_interval.min(deadline - now));
            if Instant::now() >= deadline {
                return Err(self.timeout_error(name, target, started));
            }

            state = ServiceState::from_raw(connection.query(name)?)?;
            debug!("服务 {name} 当前状态: {state}");
        }

        Ok(())
    }

    fn timeout_error(&self, name: &str, target: ServiceState, started: Instant) -> WinsvcError {
        WinsvcError::Timeout {
            name: name.to_string(),
            expected: target.label().to_string(),
            waited: started.elapsed(),
        }
    }

    /// 重启服务
    pub fn restart(&self, name: &str) -> Result<()> {
        info!("重启服务: {name}");
        if self.query(name)? != ServiceState::Stopped {
            self.stop(name)?;
        }
        self.start(name)
    }

    /// 查询服务状态
    pub fn query(&self, name: &str) -> Result<ServiceState> {
        let connection = self.manager.connect()?;
        ServiceState::from_raw(connection.query(name)?)
    }

    /// 查询服务状态标签
    pub fn query_label(&self, name: &str) -> Result<String> {
        Ok(self.query(name)?.label().to_string())
    }

    /// 检查服务是否已注册
    pub fn is_installed(&self, name: &str) -> Result<bool> {
        let connection = self.manager.connect()?;
        connection.exists(name)
    }
}
