//! 控制台分发器
//!
//! 调试运行时代替服务管理器：控制请求来自 [`ControlHandle`]（通常由信号转发），
//! 状态报告写入诊断日志。

use crate::daemon::{
    AcceptedControls, ControlDispatcher, ControlRequest, ExitStatus, LifecycleBridge, StatusReport,
};
use crate::error::{Result, WinsvcError};
use crate::manager::ServiceState;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{info, warn};

/// 向控制台运行的服务发送控制请求
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: Sender<ControlRequest>,
}

impl ControlHandle {
    pub fn send(&self, request: ControlRequest) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| WinsvcError::ControlLoop("控制通道已关闭".to_string()))
    }

    pub fn stop(&self) -> Result<()> {
        self.send(ControlRequest::Stop)
    }
}

/// 控制台分发器
pub struct ConsoleDispatcher {
    sender: Sender<ControlRequest>,
    requests: Receiver<ControlRequest>,
    arguments: Vec<String>,
    observer: Option<Sender<StatusReport>>,
}

impl ConsoleDispatcher {
    pub fn new() -> Self {
        let (sender, requests) = mpsc::channel();
        Self {
            sender,
            requests,
            arguments: Vec::new(),
            observer: None,
        }
    }

    /// 传给控制循环的启动参数
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    /// 额外接收每一条状态报告，包括最终的 `Stopped`
    pub fn with_status_observer(mut self, observer: Sender<StatusReport>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.sender.clone(),
        }
    }
}

impl Default for ConsoleDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlDispatcher for ConsoleDispatcher {
    fn dispatch(self, bridge: LifecycleBridge) -> Result<()> {
        let ConsoleDispatcher {
            sender,
            requests,
            arguments,
            observer,
        } = self;
        // 只保留外部控制句柄，句柄全部释放后控制循环按停止处理
        drop(sender);

        let name = bridge.name().to_string();
        let (report_tx, report_rx) = mpsc::channel::<StatusReport>();
        let reporter_observer = observer.clone();
        let reporter = thread::Builder::new()
            .name(format!("{name}-status"))
            .spawn(move || {
                for report in report_rx {
                    info!("服务状态: {report}");
                    if let Some(observer) = &reporter_observer {
                        let _ = observer.send(report);
                    }
                }
            })?;

        let exit = bridge.execute(&arguments, requests, report_tx);
        reporter
            .join()
            .map_err(|_| WinsvcError::ControlLoop("状态报告线程异常退出".to_string()))?;

        report_stopped(&name, exit, observer.as_ref());
        Ok(())
    }
}

fn report_stopped(name: &str, exit: ExitStatus, observer: Option<&Sender<StatusReport>>) {
    let report = StatusReport::new(ServiceState::Stopped, AcceptedControls::NONE);
    if exit.is_success() {
        info!("服务状态: {report}");
    } else {
        warn!("服务 {name} 异常退出，退出码: {}", exit.code);
    }
    if let Some(observer) = observer {
        let _ = observer.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::ServiceHandler;
    use crate::eventlog::MemorySink;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_dispatch_reports_final_stopped() {
        let (observer_tx, observer_rx) = mpsc::channel();
        let dispatcher = ConsoleDispatcher::new().with_status_observer(observer_tx);
        let handle = dispatcher.control_handle();
        handle.send(ControlRequest::Pause).unwrap();
        handle.stop().unwrap();

        let bridge = LifecycleBridge::new("demo", ServiceHandler::new(|| {}, || {}), Arc::new(MemorySink::new()));
        dispatcher.dispatch(bridge).unwrap();

        let states: Vec<ServiceState> = observer_rx.iter().map(|report| report.state).collect();
        assert_eq!(
            states,
            vec![
                ServiceState::StartPending,
                ServiceState::Running,
                ServiceState::Paused,
                ServiceState::StopPending,
                ServiceState::Stopped,
            ]
        );
    }

    #[test]
    fn test_dropping_every_handle_stops_service() {
        let (stopped_tx, stopped_rx) = mpsc::channel();
        let dispatcher = ConsoleDispatcher::new();
        let handle = dispatcher.control_handle();

        let worker = thread::spawn(move || {
            let handler = ServiceHandler::new(|| {}, move || {
                let _ = stopped_tx.send(());
            });
            let bridge = LifecycleBridge::new("demo", handler, Arc::new(MemorySink::new()));
            dispatcher.dispatch(bridge)
        });

        drop(handle);
        stopped_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("on_stop 应该被调用");
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_send_after_stop_fails() {
        let dispatcher = ConsoleDispatcher::new();
        let handle = dispatcher.control_handle();
        handle.stop().unwrap();

        let bridge = LifecycleBridge::new("demo", ServiceHandler::new(|| {}, || {}), Arc::new(MemorySink::new()));
        dispatcher.dispatch(bridge).unwrap();

        assert!(matches!(
            handle.send(ControlRequest::Interrogate),
            Err(WinsvcError::ControlLoop(_))
        ));
    }
}
