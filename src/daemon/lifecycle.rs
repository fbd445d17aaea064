//! 生命周期桥接器
//!
//! 控制循环运行在服务管理器交给我们的线程上：
//!
//! 1. 上报 `StartPending`，不接受任何控制请求
//! 2. 上报 `Running` 并接受停止、关机、暂停/继续，随后在独立线程中启动 `on_start`
//! 3. 逐个处理控制请求，直到收到停止或关机
//!
//! 最终的 `Stopped` 状态由分发器在控制循环返回后上报。

use crate::daemon::{
    log_event, AcceptedControls, ControlRequest, ExitStatus, ServiceHandler, StatusReport,
};
use crate::error::{Result, WinsvcError};
use crate::eventlog::{EventSink, Severity};
use crate::manager::ServiceState;
use std::io;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 响应查询请求时两次上报之间的间隔
pub const INTERROGATE_PAUSE: Duration = Duration::from_millis(100);

/// `on_start` 线程无法创建时的退出码
const START_SPAWN_FAILED: u32 = 1;

/// 已上报状态的迁移校验
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: Option<StatusReport>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次上报的状态
    pub fn current(&self) -> Option<StatusReport> {
        self.current
    }

    /// 判断状态迁移是否合法，`from` 为 `None` 表示尚未上报过任何状态
    pub fn can_transition(from: Option<ServiceState>, to: ServiceState) -> bool {
        use ServiceState::*;

        match from {
            None => to == StartPending,
            Some(from) if from == to => from != Stopped,
            Some(StartPending) => to == Running,
            Some(Running) => matches!(to, PausePending | Paused | StopPending),
            Some(PausePending) => matches!(to, Paused | StopPending),
            Some(Paused) => matches!(to, ContinuePending | Running | StopPending),
            Some(ContinuePending) => matches!(to, Running | StopPending),
            Some(StopPending) => to == Stopped,
            Some(Stopped) => false,
        }
    }

    /// 迁移到新状态并返回要上报的状态
    pub fn transition(&mut self, to: ServiceState, accepts: AcceptedControls) -> Result<StatusReport> {
        let from = self.current.map(|report| report.state);
        if !Self::can_transition(from, to) {
            let from = from.map_or_else(|| "-".to_string(), |state| state.to_string());
            return Err(WinsvcError::ControlLoop(format!("非法的状态迁移: {from} -> {to}")));
        }

        let report = StatusReport::new(to, accepts);
        self.current = Some(report);
        Ok(report)
    }
}

/// 独立运行、不会被等待的线程
///
/// 句柄只在创建后保留到 [`DetachedTask::detach`]，线程的结束不影响控制循环。
#[derive(Debug)]
pub struct DetachedTask {
    handle: thread::JoinHandle<()>,
}

impl DetachedTask {
    pub fn spawn(name: String, task: Box<dyn FnOnce() + Send + 'static>) -> io::Result<Self> {
        let handle = thread::Builder::new().name(name).spawn(task)?;
        Ok(Self { handle })
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.handle.thread().name()
    }

    pub fn detach(self) {
        drop(self.handle);
    }
}

/// 生命周期桥接器
pub struct LifecycleBridge {
    name: String,
    handler: ServiceHandler,
    sink: Arc<dyn EventSink>,
    interrogate_pause: Duration,
}

impl LifecycleBridge {
    pub fn new(name: impl Into<String>, handler: ServiceHandler, sink: Arc<dyn EventSink>) -> Self {
        Self {
            name: name.into(),
            handler,
            sink,
            interrogate_pause: INTERROGATE_PAUSE,
        }
    }

    pub fn with_interrogate_pause(mut self, pause: Duration) -> Self {
        self.interrogate_pause = pause;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 运行控制循环，直到收到停止或关机请求
    ///
    /// 控制通道关闭时按停止处理，`on_stop` 在任何情况下都只会被调用一次。
    pub fn execute(
        self,
        args: &[String],
        requests: Receiver<ControlRequest>,
        reports: Sender<StatusReport>,
    ) -> ExitStatus {
        let LifecycleBridge {
            name,
            handler,
            sink,
            interrogate_pause,
        } = self;
        let ServiceHandler { on_start, on_stop } = handler;
        let mut reporter = Reporter {
            machine: StateMachine::new(),
            reports,
            sink,
        };

        debug!("服务 {name} 启动参数: {args:?}");

        reporter.announce(ServiceState::StartPending, AcceptedControls::NONE);
        reporter.announce(ServiceState::Running, AcceptedControls::RUNNING);

        match DetachedTask::spawn(format!("{name}-start"), on_start) {
            Ok(task) => {
                debug!("启动线程已创建: {:?}", task.thread_name());
                task.detach();
            }
            Err(e) => {
                error!("无法创建启动线程: {e}");
                reporter.log(Severity::Error, &format!("failed to start {name} service: {e}"));
                reporter.announce(ServiceState::StopPending, AcceptedControls::NONE);
                return ExitStatus::failure(START_SPAWN_FAILED);
            }
        }

        info!("服务 {name} 已进入运行状态");

        for request in requests.iter() {
            match request {
                ControlRequest::Interrogate => {
                    reporter.reannounce();
                    thread::sleep(interrogate_pause);
                    reporter.reannounce();
                }
                ControlRequest::Stop | ControlRequest::Shutdown => {
                    info!("服务 {name} 收到停止请求: {request:?}");
                    reporter.announce(ServiceState::StopPending, AcceptedControls::NONE);
                    on_stop();
                    return ExitStatus::SUCCESS;
                }
                ControlRequest::Pause => {
                    reporter.announce(ServiceState::Paused, AcceptedControls::RUNNING);
                }
                ControlRequest::Continue => {
                    reporter.announce(ServiceState::Running, AcceptedControls::RUNNING);
                }
                ControlRequest::Unknown(raw) => {
                    reporter.log(Severity::Error, &format!("unexpected control request #{raw}"));
                }
            }
        }

        warn!("服务 {name} 的控制通道已关闭，按停止处理");
        reporter.announce(ServiceState::StopPending, AcceptedControls::NONE);
        on_stop();
        ExitStatus::SUCCESS
    }
}

struct Reporter {
    machine: StateMachine,
    reports: Sender<StatusReport>,
    sink: Arc<dyn EventSink>,
}

impl Reporter {
    fn announce(&mut self, state: ServiceState, accepts: AcceptedControls) {
        match self.machine.transition(state, accepts) {
            Ok(report) => self.send(report),
            Err(e) => error!("{e}"),
        }
    }

    fn reannounce(&mut self) {
        if let Some(report) = self.machine.current() {
            self.send(report);
        }
    }

    fn send(&self, report: StatusReport) {
        debug!("上报服务状态: {report}");
        if self.reports.send(report).is_err() {
            warn!("状态报告通道已关闭，丢弃状态: {report}");
        }
    }

    fn log(&self, severity: Severity, message: &str) {
        log_event(self.sink.as_ref(), severity, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    struct Harness {
        sink: MemorySink,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        started: mpsc::Receiver<()>,
    }

    fn bridge() -> (LifecycleBridge, Harness) {
        let sink = MemorySink::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (started_tx, started) = mpsc::channel();

        let start_counter = Arc::clone(&starts);
        let stop_counter = Arc::clone(&stops);
        let handler = ServiceHandler::new(
            move || {
                start_counter.fetch_add(1, Ordering::SeqCst);
                let _ = started_tx.send(());
            },
            move || {
                stop_counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let bridge = LifecycleBridge::new("demo", handler, Arc::new(sink.clone()))
            .with_interrogate_pause(Duration::from_millis(5));

        (
            bridge,
            Harness {
                sink,
                starts,
                stops,
                started,
            },
        )
    }

    fn run(bridge: LifecycleBridge, requests: &[ControlRequest]) -> (ExitStatus, Vec<StatusReport>) {
        let (request_tx, request_rx) = mpsc::channel();
        for request in requests {
            request_tx.send(*request).unwrap();
        }
        drop(request_tx);

        let (report_tx, report_rx) = mpsc::channel();
        let exit = bridge.execute(&[], request_rx, report_tx);
        (exit, report_rx.iter().collect())
    }

    fn states(reports: &[StatusReport]) -> Vec<ServiceState> {
        reports.iter().map(|report| report.state).collect()
    }

    #[test]
    fn test_state_machine_graph() {
        use ServiceState::*;

        assert!(StateMachine::can_transition(None, StartPending));
        assert!(!StateMachine::can_transition(None, Running));
        assert!(StateMachine::can_transition(Some(StartPending), Running));
        assert!(!StateMachine::can_transition(Some(StartPending), StopPending));
        assert!(StateMachine::can_transition(Some(Paused), StopPending));
        assert!(StateMachine::can_transition(Some(Running), Running));
        assert!(!StateMachine::can_transition(Some(Stopped), Stopped));
        assert!(!StateMachine::can_transition(Some(StopPending), Running));

        let mut machine = StateMachine::new();
        assert!(machine.transition(Running, AcceptedControls::RUNNING).is_err());
        assert!(machine.current().is_none());
        machine.transition(StartPending, AcceptedControls::NONE).unwrap();
        assert_eq!(machine.current().unwrap().state, StartPending);
    }

    #[test]
    fn test_stop_after_start() {
        let (bridge, harness) = bridge();
        let (exit, reports) = run(bridge, &[ControlRequest::Stop]);

        assert_eq!(exit, ExitStatus::SUCCESS);
        assert_eq!(
            reports,
            vec![
                StatusReport::new(ServiceState::StartPending, AcceptedControls::NONE),
                StatusReport::new(ServiceState::Running, AcceptedControls::RUNNING),
                StatusReport::new(ServiceState::StopPending, AcceptedControls::NONE),
            ]
        );
        assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
        harness
            .started
            .recv_timeout(Duration::from_secs(1))
            .expect("on_start 应该被调用");
    }

    #[test]
    fn test_full_control_sequence() {
        use ServiceState::*;

        let (bridge, harness) = bridge();
        let (_, reports) = run(
            bridge,
            &[
                ControlRequest::Interrogate,
                ControlRequest::Pause,
                ControlRequest::Continue,
                ControlRequest::Shutdown,
            ],
        );

        assert_eq!(
            states(&reports),
            vec![StartPending, Running, Running, Running, Paused, Running, StopPending]
        );
        assert_eq!(reports[4].accepts, AcceptedControls::RUNNING);
        assert_eq!(harness.stops.load(Ordering::SeqCst), 1);

        // on_start 在独立线程中运行，等它结束后再计数
        harness.started.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(harness.started.recv_timeout(Duration::from_secs(1)).is_err());
        assert_eq!(harness.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_request_is_logged_and_ignored() {
        use ServiceState::*;

        let (bridge, harness) = bridge();
        let (_, reports) = run(
            bridge,
            &[
                ControlRequest::Interrogate,
                ControlRequest::Unknown(0x40),
                ControlRequest::Pause,
                ControlRequest::Continue,
                ControlRequest::Stop,
            ],
        );

        assert_eq!(
            states(&reports),
            vec![StartPending, Running, Running, Running, Paused, Running, StopPending]
        );
        let errors = harness.sink.messages(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("#64"));
    }

    #[test]
    fn test_interrogate_reports_twice_with_pause() {
        let (bridge, _harness) = bridge();
        let bridge = bridge.with_interrogate_pause(Duration::from_millis(50));

        let started = Instant::now();
        let (_, reports) = run(bridge, &[ControlRequest::Interrogate, ControlRequest::Stop]);

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(reports[2], reports[3]);
        assert_eq!(reports[2].state, ServiceState::Running);
    }

    #[test]
    fn test_interrogate_while_paused_reports_paused() {
        use ServiceState::*;

        let (bridge, _harness) = bridge();
        let (_, reports) = run(
            bridge,
            &[ControlRequest::Pause, ControlRequest::Interrogate, ControlRequest::Stop],
        );

        assert_eq!(
            states(&reports),
            vec![StartPending, Running, Paused, Paused, Paused, StopPending]
        );
    }

    #[test]
    fn test_closed_channel_stops_once() {
        let (bridge, harness) = bridge();
        let (exit, reports) = run(bridge, &[ControlRequest::Pause]);

        assert_eq!(exit, ExitStatus::SUCCESS);
        assert_eq!(reports.last().unwrap().state, ServiceState::StopPending);
        assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_requests_after_stop_are_not_processed() {
        let (bridge, harness) = bridge();
        let (_, reports) = run(
            bridge,
            &[ControlRequest::Stop, ControlRequest::Continue, ControlRequest::Stop],
        );

        assert_eq!(reports.len(), 3);
        assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_report_channel_does_not_block_loop() {
        let (bridge, harness) = bridge();
        let (request_tx, request_rx) = mpsc::channel();
        request_tx.send(ControlRequest::Interrogate).unwrap();
        request_tx.send(ControlRequest::Stop).unwrap();

        let (report_tx, report_rx) = mpsc::channel();
        drop(report_rx);

        let exit = bridge.execute(&["is".to_string()], request_rx, report_tx);
        assert_eq!(exit, ExitStatus::SUCCESS);
        assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocking_on_start_does_not_block_stop() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let stops = Arc::new(AtomicUsize::new(0));
        let stop_counter = Arc::clone(&stops);

        let handler = ServiceHandler::new(
            move || {
                let _ = release_rx.recv();
            },
            move || {
                stop_counter.fetch_add(1, Ordering::SeqCst);
                let _ = release_tx.send(());
            },
        );
        let bridge = LifecycleBridge::new("demo", handler, Arc::new(MemorySink::new()));
        let (exit, _) = run(bridge, &[ControlRequest::Stop]);

        assert!(exit.is_success());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
