//! 控制循环基准测试
//!
//! 测试状态迁移检查和一次完整控制循环的开销

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use winsvc::daemon::{
    AcceptedControls, ControlRequest, LifecycleBridge, ServiceHandler, StateMachine,
};
use winsvc::eventlog::MemorySink;
use winsvc::manager::ServiceState;

const STATES: [ServiceState; 7] = [
    ServiceState::Stopped,
    ServiceState::StartPending,
    ServiceState::StopPending,
    ServiceState::Running,
    ServiceState::ContinuePending,
    ServiceState::PausePending,
    ServiceState::Paused,
];

/// 状态机基准测试
fn state_machine_benchmark(c: &mut Criterion) {
    c.bench_function("can_transition_all_pairs", |b| {
        b.iter(|| {
            let mut allowed = 0;
            for from in STATES {
                for to in STATES {
                    if StateMachine::can_transition(black_box(Some(from)), black_box(to)) {
                        allowed += 1;
                    }
                }
            }
            allowed
        })
    });

    c.bench_function("transition_sequence", |b| {
        b.iter(|| {
            let mut machine = StateMachine::new();
            for (state, accepts) in [
                (ServiceState::StartPending, AcceptedControls::NONE),
                (ServiceState::Running, AcceptedControls::RUNNING),
                (ServiceState::Paused, AcceptedControls::RUNNING),
                (ServiceState::Running, AcceptedControls::RUNNING),
                (ServiceState::StopPending, AcceptedControls::NONE),
                (ServiceState::Stopped, AcceptedControls::NONE),
            ] {
                black_box(machine.transition(state, accepts).ok());
            }
        })
    });
}

/// 控制循环基准测试
fn control_loop_benchmark(c: &mut Criterion) {
    let requests = [
        ControlRequest::Pause,
        ControlRequest::Continue,
        ControlRequest::Interrogate,
        ControlRequest::Stop,
    ];

    c.bench_function("execute_pause_continue_stop", |b| {
        b.iter(|| {
            let bridge = LifecycleBridge::new(
                "bench",
                ServiceHandler::new(|| {}, || {}),
                Arc::new(MemorySink::new()),
            )
            .with_interrogate_pause(Duration::ZERO);

            let (request_tx, request_rx) = mpsc::channel();
            let (report_tx, report_rx) = mpsc::channel();
            for request in requests {
                let _ = request_tx.send(request);
            }

            let exit = bridge.execute(&[], request_rx, report_tx);
            black_box((exit, report_rx.try_iter().count()))
        })
    });
}

criterion_group!(benches, state_machine_benchmark, control_loop_benchmark);
criterion_main!(benches);
