//! 示例应用
//!
//! 一个最小的 HTTP 服务，演示如何把异步应用接入服务生命周期：
//! `on_start` 在启动线程上阻塞运行服务器，`on_stop` 发出关闭信号并等待服务器退出。

use crate::daemon::ServiceHandler;
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

pub mod http;

pub use http::{router, serve, serve_listener};

/// 等待服务器关闭的默认时间
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 示例 HTTP 服务
#[derive(Debug, Clone)]
pub struct HttpService {
    bind: SocketAddr,
    runtime: Handle,
    shutdown_timeout: Duration,
}

impl HttpService {
    pub fn new(bind: SocketAddr, runtime: Handle) -> Self {
        Self {
            bind,
            runtime,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// 转换为生命周期回调
    pub fn into_handler(self) -> ServiceHandler {
        let HttpService {
            bind,
            runtime,
            shutdown_timeout,
        } = self;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let on_start = move || {
            info!("HTTP服务启动中: {bind}");
            if let Err(e) = runtime.block_on(serve(bind, shutdown_rx)) {
                error!("HTTP服务运行失败: {e}");
            }
            let _ = done_tx.send(());
        };

        let on_stop = move || {
            info!("HTTP服务关闭中...");
            if shutdown_tx.send(()).is_err() {
                warn!("HTTP服务已经退出");
            }
            match done_rx.recv_timeout(shutdown_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => info!("HTTP服务已停止"),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("等待HTTP服务关闭超时 ({} 秒)", shutdown_timeout.as_secs())
                }
            }
        };

        ServiceHandler::new(on_start, on_stop)
    }
}
