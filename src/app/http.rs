//! 示例 HTTP 服务
//!
//! 根路径返回服务运行的当前时间，收到关闭信号后优雅关闭。

use crate::error::Result;
use axum::{response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 构造路由
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .layer(TraceLayer::new_for_http())
}

/// 根路径处理函数
async fn index() -> impl IntoResponse {
    format!(
        "Example service running at {}",
        chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
    )
}

/// 绑定地址并运行，直到 `shutdown` 收到信号或发送端被释放
pub async fn serve(bind: SocketAddr, shutdown: oneshot::Receiver<()>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    serve_listener(listener, shutdown).await
}

/// 在已绑定的监听器上运行
pub async fn serve_listener(listener: TcpListener, shutdown: oneshot::Receiver<()>) -> Result<()> {
    info!("HTTP服务已启动: http://{}", listener.local_addr()?);

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
            info!("接收到关闭信号，正在关闭HTTP服务...");
        })
        .await?;

    info!("HTTP服务已关闭");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_index_reports_running_time() {
        let response = router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let timestamp = text.strip_prefix("Example service running at ").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let response = router()
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server = tokio::spawn(serve_listener(listener, shutdown_rx));
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("HTTP服务应该在超时前关闭");
        assert!(result.unwrap().is_ok());
    }
}
