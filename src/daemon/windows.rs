//! Windows服务控制分发器
//!
//! 服务入口函数由服务控制分发器通过 FFI 回调，不能携带上下文，
//! 因此桥接器在调用分发器前放入一次性的静态槽位，由入口函数取出运行。

use crate::daemon::{
    AcceptedControls, ControlDispatcher, ControlRequest, ExitStatus, LifecycleBridge, StatusReport,
};
use crate::error::{Result, WinsvcError};
use crate::manager::ServiceState;
use std::ffi::OsString;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
use windows_service::{define_windows_service, service_dispatcher};

/// 挂起状态的等待提示
const PENDING_WAIT_HINT: Duration = Duration::from_secs(3);

struct PendingRun {
    bridge: LifecycleBridge,
    outcome: mpsc::Sender<Result<()>>,
}

/// 进程内唯一的服务运行槽位
static PENDING: Mutex<Option<PendingRun>> = Mutex::new(None);

fn pending() -> MutexGuard<'static, Option<PendingRun>> {
    PENDING.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 通过服务控制分发器运行
#[derive(Debug, Default)]
pub struct ScmDispatcher;

impl ScmDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl ControlDispatcher for ScmDispatcher {
    fn dispatch(self, bridge: LifecycleBridge) -> Result<()> {
        let name = bridge.name().to_string();
        let (outcome_tx, outcome_rx) = mpsc::channel();

        {
            let mut slot = pending();
            if slot.is_some() {
                return Err(WinsvcError::ControlLoop("当前进程已有服务在运行".to_string()));
            }
            *slot = Some(PendingRun {
                bridge,
                outcome: outcome_tx,
            });
        }

        info!("连接服务控制分发器: {name}");
        let dispatched = service_dispatcher::start(&name, ffi_service_main)
            .map_err(|e| WinsvcError::ControlLoop(format!("无法连接服务控制分发器: {e}")));
        let unclaimed = pending().take();
        dispatched?;

        if unclaimed.is_some() {
            return Err(WinsvcError::ControlLoop("服务控制分发器没有调用服务入口".to_string()));
        }

        wait_outcome(&outcome_rx)
    }
}

/// 等待服务入口的运行结果
///
/// 分发器在上报已停止后即可返回，此时服务入口可能还没有发送结果，必须阻塞等待。
/// 服务入口异常退出时发送端被释放，返回错误。
fn wait_outcome(outcome: &mpsc::Receiver<Result<()>>) -> Result<()> {
    outcome
        .recv()
        .map_err(|_| WinsvcError::ControlLoop("服务入口没有返回结果".to_string()))?
}

define_windows_service!(ffi_service_main, service_main);

fn service_main(arguments: Vec<OsString>) {
    let Some(run) = pending().take() else {
        error!("服务入口被调用，但没有待运行的服务");
        return;
    };

    let result = run_bridge(run.bridge, arguments);
    if let Err(e) = &result {
        error!("Windows服务运行失败: {e}");
    }
    let _ = run.outcome.send(result);
}

fn run_bridge(bridge: LifecycleBridge, arguments: Vec<OsString>) -> Result<()> {
    let name = bridge.name().to_string();
    let (control_tx, control_rx) = mpsc::channel();

    let event_handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
        let request = ControlRequest::from(control);
        if control_tx.send(request).is_err() {
            return ServiceControlHandlerResult::NotImplemented;
        }
        match request {
            ControlRequest::Unknown(_) => ServiceControlHandlerResult::NotImplemented,
            _ => ServiceControlHandlerResult::NoError,
        }
    };

    let status_handle = service_control_handler::register(&name, event_handler)
        .map_err(|e| WinsvcError::ControlLoop(format!("注册服务控制处理器失败: {e}")))?;

    let (report_tx, report_rx) = mpsc::channel::<StatusReport>();
    let reporter = thread::Builder::new()
        .name(format!("{name}-status"))
        .spawn(move || {
            for report in report_rx {
                if let Err(e) = status_handle.set_service_status(service_status(report, ExitStatus::SUCCESS)) {
                    error!("上报服务状态失败: {e}");
                }
            }
        })?;

    let arguments: Vec<String> = arguments
        .iter()
        .map(|argument| argument.to_string_lossy().into_owned())
        .collect();
    let exit = bridge.execute(&arguments, control_rx, report_tx);

    reporter
        .join()
        .map_err(|_| WinsvcError::ControlLoop("状态报告线程异常退出".to_string()))?;

    let stopped = StatusReport::new(ServiceState::Stopped, AcceptedControls::NONE);
    status_handle
        .set_service_status(service_status(stopped, exit))
        .map_err(|e| WinsvcError::ControlLoop(format!("上报服务已停止失败: {e}")))
}

impl From<ServiceControl> for ControlRequest {
    fn from(control: ServiceControl) -> Self {
        match control {
            ServiceControl::Interrogate => ControlRequest::Interrogate,
            ServiceControl::Stop => ControlRequest::Stop,
            ServiceControl::Shutdown => ControlRequest::Shutdown,
            ServiceControl::Pause => ControlRequest::Pause,
            ServiceControl::Continue => ControlRequest::Continue,
            other => ControlRequest::Unknown(other.raw_service_control_type()),
        }
    }
}

fn service_status(report: StatusReport, exit: ExitStatus) -> ServiceStatus {
    let wait_hint = match report.state {
        ServiceState::StartPending
        | ServiceState::StopPending
        | ServiceState::PausePending
        | ServiceState::ContinuePending => PENDING_WAIT_HINT,
        _ => Duration::default(),
    };
    let exit_code = if exit.service_specific {
        ServiceExitCode::ServiceSpecific(exit.code)
    } else {
        ServiceExitCode::Win32(exit.code)
    };

    ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state: windows_state(report.state),
        controls_accepted: ServiceControlAccept::from_bits_truncate(report.accepts.bits()),
        exit_code,
        checkpoint: 0,
        wait_hint,
        process_id: None,
    }
}

fn windows_state(state: ServiceState) -> windows_service::service::ServiceState {
    use windows_service::service::ServiceState as Win;

    match state {
        ServiceState::Stopped => Win::Stopped,
        ServiceState::StartPending => Win::StartPending,
        ServiceState::StopPending => Win::StopPending,
        ServiceState::Running => Win::Running,
        ServiceState::ContinuePending => Win::ContinuePending,
        ServiceState::PausePending => Win::PausePending,
        ServiceState::Paused => Win::Paused,
    }
}
