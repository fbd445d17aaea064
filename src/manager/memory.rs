//! 内存服务管理器
//!
//! 在进程内模拟平台服务管理器，用于测试和非 Windows 平台上的演练。
//! 支持注入事件日志源失败、启动失败以及停止过程卡在 `StopPending` 的情形。

use crate::error::{Result, WinsvcError};
use crate::manager::client::{ManagerConnection, ServiceControlManager};
use crate::manager::{RegistrationRequest, ServiceCommand, ServiceState};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 停止命令的模拟行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// 立即进入已停止状态
    Immediate,
    /// 经过指定次数的查询后进入已停止状态
    AfterPolls(usize),
    /// 一直停留在 `StopPending`
    Never,
}

/// 注册表可观察状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    /// 已注册的服务及其原始状态码
    pub services: BTreeMap<String, (RegistrationRequest, u32)>,
    /// 已注册的事件日志源
    pub event_sources: BTreeSet<String>,
}

#[derive(Debug)]
struct MemoryService {
    request: RegistrationRequest,
    raw_state: u32,
    pending_polls: Option<usize>,
    last_start_arguments: Option<Vec<String>>,
}

#[derive(Debug)]
struct MemoryState {
    services: BTreeMap<String, MemoryService>,
    event_sources: BTreeSet<String>,
    open_connections: usize,
    query_count: usize,
    fail_event_source_install: bool,
    fail_event_source_removal: bool,
    start_failure: Option<String>,
    stop_behavior: StopBehavior,
}

/// 内存服务管理器
#[derive(Debug, Clone)]
pub struct InMemoryManager {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryManager {
    /// 创建空的服务管理器
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                services: BTreeMap::new(),
                event_sources: BTreeSet::new(),
                open_connections: 0,
                query_count: 0,
                fail_event_source_install: false,
                fail_event_source_removal: false,
                start_failure: None,
                stop_behavior: StopBehavior::Immediate,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    /// 当前可观察状态
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            services: state
                .services
                .iter()
                .map(|(name, service)| (name.clone(), (service.request.clone(), service.raw_state)))
                .collect(),
            event_sources: state.event_sources.clone(),
        }
    }

    /// 获取已注册服务的注册请求
    pub fn registration(&self, name: &str) -> Option<RegistrationRequest> {
        self.lock()
            .services
            .get(name)
            .map(|service| service.request.clone())
    }

    /// 是否存在事件日志源
    pub fn has_event_source(&self, name: &str) -> bool {
        self.lock().event_sources.contains(name)
    }

    /// 尚未释放的连接数
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// 累计状态查询次数
    pub fn query_count(&self) -> usize {
        self.lock().query_count
    }

    /// 最近一次启动时传入的参数
    pub fn last_start_arguments(&self, name: &str) -> Option<Vec<String>> {
        self.lock()
            .services
            .get(name)
            .and_then(|service| service.last_start_arguments.clone())
    }

    /// 注入事件日志源注册失败
    pub fn fail_event_source_install(&self, fail: bool) {
        self.lock().fail_event_source_install = fail;
    }

    /// 注入事件日志源移除失败
    pub fn fail_event_source_removal(&self, fail: bool) {
        self.lock().fail_event_source_removal = fail;
    }

    /// 注入启动失败
    pub fn fail_start(&self, reason: Option<&str>) {
        self.lock().start_failure = reason.map(str::to_string);
    }

    /// 设置停止命令的模拟行为
    pub fn set_stop_behavior(&self, behavior: StopBehavior) {
        self.lock().stop_behavior = behavior;
    }

    /// 直接写入原始状态码
    pub fn set_raw_state(&self, name: &str, raw: u32) {
        if let Some(service) = self.lock().services.get_mut(name) {
            service.raw_state = raw;
        }
    }
}

impl Default for InMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceControlManager for InMemoryManager {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<Self::Connection> {
        self.lock().open_connections += 1;
        Ok(MemoryConnection {
            state: Arc::clone(&self.state),
        })
    }

    fn install_event_source(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_event_source_install {
            return Err(WinsvcError::LogSink(format!("无法注册事件日志源: {name}")));
        }
        if !state.event_sources.insert(name.to_string()) {
            return Err(WinsvcError::LogSink(format!("事件日志源已存在: {name}")));
        }
        Ok(())
    }

    fn remove_event_source(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_event_source_removal {
            return Err(WinsvcError::LogSink(format!("无法移除事件日志源: {name}")));
        }
        if !state.event_sources.remove(name) {
            return Err(WinsvcError::LogSink(format!("事件日志源不存在: {name}")));
        }
        Ok(())
    }
}

/// 内存服务管理器连接，drop 时释放
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open_connections = state.open_connections.saturating_sub(1);
    }
}

impl ManagerConnection for MemoryConnection {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().services.contains_key(name))
    }

    fn create(&self, request: &RegistrationRequest) -> Result<()> {
        let mut state = self.lock();
        if state.services.contains_key(&request.name) {
            return Err(WinsvcError::AlreadyExists {
                name: request.name.clone(),
            });
        }
        state.services.insert(
            request.name.clone(),
            MemoryService {
                request: request.clone(),
                raw_state: ServiceState::Stopped.to_raw(),
                pending_polls: None,
                last_start_arguments: None,
            },
        );
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.lock()
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WinsvcError::service_not_found(name))
    }

    fn start(&self, name: &str, arguments: &[String]) -> Result<()> {
        let mut state = self.lock();
        let failure = state.start_failure.clone();
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| WinsvcError::service_not_found(name))?;

        if let Some(reason) = failure {
            return Err(WinsvcError::StartFailed {
                name: name.to_string(),
                reason,
            });
        }
        if service.raw_state != ServiceState::Stopped.to_raw() {
            return Err(WinsvcError::StartFailed {
                name: name.to_string(),
                reason: "服务已在运行".to_string(),
            });
        }

        service.raw_state = ServiceState::Running.to_raw();
        service.last_start_arguments = Some(arguments.to_vec());
        Ok(())
    }

    fn control(&self, name: &str, command: ServiceCommand) -> Result<u32> {
        let mut state = self.lock();
        let behavior = state.stop_behavior;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| WinsvcError::service_not_found(name))?;

        let current = ServiceState::from_raw(service.raw_state)?;
        let next = match command {
            ServiceCommand::Stop => {
                if current == ServiceState::Stopped {
                    return Err(WinsvcError::Manager(format!("服务未运行: {name}")));
                }
                match behavior {
                    StopBehavior::Immediate => ServiceState::Stopped,
                    StopBehavior::AfterPolls(polls) => {
                        service.pending_polls = Some(polls);
                        ServiceState::StopPending
                    }
                    StopBehavior::Never => {
                        service.pending_polls = None;
                        ServiceState::StopPending
                    }
                }
            }
            ServiceCommand::Pause => ServiceState::Paused,
            ServiceCommand::Continue => ServiceState::Running,
            ServiceCommand::Interrogate => current,
        };

        service.raw_state = next.to_raw();
        Ok(service.raw_state)
    }

    fn query(&self, name: &str) -> Result<u32> {
        let mut state = self.lock();
        state.query_count += 1;
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| WinsvcError::service_not_found(name))?;

        if let Some(remaining) = service.pending_polls {
            if remaining <= 1 {
                service.pending_polls = None;
                service.raw_state = ServiceState::Stopped.to_raw();
            } else {
                service.pending_polls = Some(remaining - 1);
            }
        }

        Ok(service.raw_state)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
