use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, routing::get, Router};
use tracing::info;

use crate::metrics::Metrics;

/// Prometheus 文本格式导出
async fn metrics_handler(State(m): State<Arc<Metrics>>) -> String {
    let s = m.snapshot();
    format!(
        "# HELP requests_sent_total Total number of requests sent\n\
         # TYPE requests_sent_total counter\n\
         requests_sent_total {}\n\
         # HELP links_found_total Total number of links found\n\
         # TYPE links_found_total counter\n\
         links_found_total {}\n\
         # HELP requests_per_second Requests per second\n\
         # TYPE requests_per_second gauge\n\
         requests_per_second {}\n\
         # HELP found_per_minute Links found per minute\n\
         # TYPE found_per_minute gauge\n\
         found_per_minute {}\n",
        s.requests_sent, s.links_found, s.req_per_sec, s.found_per_min
    )
}

/// 启动 /metrics 拉取端点。绑定失败属启动期错误，向上传播；
/// 启动后服务随进程退出终止。
pub async fn spawn_exporter(metrics: Arc<Metrics>, port: u16) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    info!("metrics exporter listening on {}", addr);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}
