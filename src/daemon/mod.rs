//! 服务生命周期模块
//!
//! 在服务进程内部运行，把应用的启动/停止回调转换为服务管理器要求的状态协议：
//! 接收控制请求、驱动回调、上报状态迁移。
//!
//! - [`LifecycleBridge`] 是状态机本身，只依赖一对通道（控制请求入、状态报告出）
//! - [`ControlDispatcher`] 负责把桥接器交给具体的服务管理器运行并上报最终的已停止状态
//! - [`ServiceHost`] 管理一次服务运行期间的事件日志

use crate::error::{Result, WinsvcError};
use crate::eventlog::{self, ConsoleSink, EventSink, DEFAULT_EVENT_ID};
use crate::manager::ServiceState;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{info, warn};

pub mod console;
pub mod lifecycle;
pub mod signal_handler;
#[cfg(windows)]
pub mod windows;

pub use console::{ConsoleDispatcher, ControlHandle};
pub use lifecycle::{DetachedTask, LifecycleBridge, StateMachine, INTERROGATE_PAUSE};

/// 服务管理器发来的控制请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlRequest {
    Interrogate,
    Stop,
    Shutdown,
    Pause,
    Continue,
    /// 无法识别的原始控制码
    Unknown(u32),
}

impl ControlRequest {
    /// 从原始控制码解析
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0000_0001 => Self::Stop,
            0x0000_0002 => Self::Pause,
            0x0000_0003 => Self::Continue,
            0x0000_0004 => Self::Interrogate,
            0x0000_0005 => Self::Shutdown,
            other => Self::Unknown(other),
        }
    }

    /// 原始控制码
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Stop => 0x0000_0001,
            Self::Pause => 0x0000_0002,
            Self::Continue => 0x0000_0003,
            Self::Interrogate => 0x0000_0004,
            Self::Shutdown => 0x0000_0005,
            Self::Unknown(raw) => raw,
        }
    }

    /// 是否为终止请求
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stop | Self::Shutdown)
    }
}

/// 服务当前接受的控制请求集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptedControls(u32);

impl AcceptedControls {
    pub const NONE: Self = Self(0);
    pub const STOP: Self = Self(0x0000_0001);
    pub const PAUSE_CONTINUE: Self = Self(0x0000_0002);
    pub const SHUTDOWN: Self = Self(0x0000_0004);

    /// 运行和暂停状态下接受的控制请求
    pub const RUNNING: Self = Self(Self::STOP.0 | Self::SHUTDOWN.0 | Self::PAUSE_CONTINUE.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AcceptedControls {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AcceptedControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::STOP) {
            names.push("stop");
        }
        if self.contains(Self::SHUTDOWN) {
            names.push("shutdown");
        }
        if self.contains(Self::PAUSE_CONTINUE) {
            names.push("pause/continue");
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

/// 上报给服务管理器的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ServiceState,
    pub accepts: AcceptedControls,
}

impl StatusReport {
    pub fn new(state: ServiceState, accepts: AcceptedControls) -> Self {
        Self { state, accepts }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (接受控制: {})", self.state, self.accepts)
    }
}

/// 控制循环结束时的退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// 退出码是否为服务自定义错误码
    pub service_specific: bool,
    pub code: u32,
}

impl ExitStatus {
    pub const SUCCESS: Self = Self {
        service_specific: false,
        code: 0,
    };

    /// 服务自定义的失败退出码
    pub const fn failure(code: u32) -> Self {
        Self {
            service_specific: true,
            code,
        }
    }

    pub fn is_success(self) -> bool {
        self.code == 0
    }
}

/// 应用提供的启动/停止回调
///
/// `on_start` 在独立线程中运行且不会被等待；`on_stop` 在控制线程上同步调用，
/// 负责通知并等待 `on_start` 建立的工作结束。
pub struct ServiceHandler {
    pub(crate) on_start: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) on_stop: Box<dyn FnOnce() + Send + 'static>,
}

impl ServiceHandler {
    pub fn new<S, T>(on_start: S, on_stop: T) -> Self
    where
        S: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        Self {
            on_start: Box::new(on_start),
            on_stop: Box::new(on_stop),
        }
    }
}

impl fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandler").finish_non_exhaustive()
    }
}

/// 服务控制分发器
///
/// 把生命周期桥接器交给服务管理器运行：建立控制请求和状态报告通道，
/// 执行控制循环，并在循环结束后上报已停止状态。
pub trait ControlDispatcher {
    fn dispatch(self, bridge: LifecycleBridge) -> Result<()>;
}

/// 一次服务运行
///
/// 事件日志在运行开始前打开，运行结束后随宿主一起释放。
pub struct ServiceHost<D> {
    name: String,
    sink: Arc<dyn EventSink>,
    dispatcher: D,
}

impl<D: ControlDispatcher> ServiceHost<D> {
    pub fn new(name: impl Into<String>, sink: Arc<dyn EventSink>, dispatcher: D) -> Self {
        Self {
            name: name.into(),
            sink,
            dispatcher,
        }
    }

    /// 运行服务直到控制循环结束
    pub fn run(self, handler: ServiceHandler) -> Result<()> {
        let Self {
            name,
            sink,
            dispatcher,
        } = self;

        log_event(sink.as_ref(), eventlog::Severity::Info, &format!("starting {name} service"));

        let bridge = LifecycleBridge::new(&name, handler, Arc::clone(&sink));
        if let Err(e) = dispatcher.dispatch(bridge) {
            log_event(
                sink.as_ref(),
                eventlog::Severity::Error,
                &format!("{name} service failed: {e}"),
            );
            return Err(WinsvcError::ControlLoop(format!("服务 {name} 运行失败: {e}")));
        }

        log_event(sink.as_ref(), eventlog::Severity::Info, &format!("{name} service stopped"));
        Ok(())
    }
}

/// 写入事件日志，写入失败时退回到诊断日志
pub(crate) fn log_event(sink: &dyn EventSink, severity: eventlog::Severity, message: &str) {
    tracing::debug!(?severity, "事件日志: {message}");
    if let Err(e) = sink.write(severity, DEFAULT_EVENT_ID, message) {
        warn!("写入事件日志失败: {e}; 原始消息: {message}");
    }
}

/// 以服务模式运行
///
/// 事件日志打开失败时直接返回错误，不会进入状态机。
pub fn run_as_service(name: &str, handler: ServiceHandler) -> Result<()> {
    let sink = eventlog::open_event_log(name)?;

    #[cfg(windows)]
    {
        ServiceHost::new(name, sink, windows::ScmDispatcher::new()).run(handler)
    }

    #[cfg(not(windows))]
    {
        drop((sink, handler));
        tracing::error!("服务模式只能在Windows系统上使用");
        Err(WinsvcError::Unsupported("服务模式只能在Windows系统上使用".to_string()))
    }
}

/// 在控制台中运行，调试时使用
///
/// 生命周期协议与服务模式完全相同，控制请求来自 `dispatcher` 的控制句柄。
pub fn run_in_console(name: &str, handler: ServiceHandler, dispatcher: ConsoleDispatcher) -> Result<()> {
    info!("以控制台模式运行服务: {name}");
    let sink: Arc<dyn EventSink> = Arc::new(ConsoleSink::new(name));
    ServiceHost::new(name, sink, dispatcher).run(handler)
}
