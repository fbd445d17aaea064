//! 信号处理模块
//!
//! 控制台运行时把进程信号转换为控制请求：
//! SIGINT/SIGTERM/Ctrl+C 对应停止，SIGUSR1 对应查询。

use crate::daemon::{ControlHandle, ControlRequest};
use crate::error::Result;
use tracing::{error, info};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
#[cfg(unix)]
use signal_hook_tokio::Signals;

/// 持续转发信号直到发出停止请求
pub async fn forward_signals(handle: ControlHandle) -> Result<()> {
    #[cfg(unix)]
    {
        forward_unix_signals(handle).await
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("接收到 Ctrl+C，停止服务...");
        deliver(&handle, ControlRequest::Stop);
        Ok(())
    }
}

/// Unix/Linux系统信号处理
#[cfg(unix)]
async fn forward_unix_signals(handle: ControlHandle) -> Result<()> {
    use futures::stream::StreamExt;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;
    let signals_handle = signals.handle();

    while let Some(signal) = signals.next().await {
        match signal_request(signal) {
            Some(ControlRequest::Interrogate) => {
                info!("接收到 SIGUSR1 信号，查询服务状态");
                if !deliver(&handle, ControlRequest::Interrogate) {
                    break;
                }
            }
            Some(request) => {
                info!("接收到信号 {signal}，停止服务...");
                deliver(&handle, request);
                break;
            }
            None => tracing::warn!("接收到未处理的信号: {signal}"),
        }
    }

    signals_handle.close();
    Ok(())
}

/// 信号对应的控制请求
#[cfg(unix)]
pub fn signal_request(signal: i32) -> Option<ControlRequest> {
    match signal {
        SIGINT | SIGTERM => Some(ControlRequest::Stop),
        SIGUSR1 => Some(ControlRequest::Interrogate),
        _ => None,
    }
}

fn deliver(handle: &ControlHandle, request: ControlRequest) -> bool {
    match handle.send(request) {
        Ok(()) => true,
        Err(e) => {
            error!("发送控制请求失败: {e}");
            false
        }
    }
}
