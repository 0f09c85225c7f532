use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::metrics::Metrics;
use crate::options::Options;
use crate::ratelimit::RateLimiter;

/// 单次存在性检查的结果；同一 id 会按配置顺序对每个扩展名各产生一条。
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub id: String,
    pub ext: String,
    pub found: bool,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    /// 空 id / 空扩展名。生成器契约下不会出现，但边界必须防御。
    #[error("empty id or extension")]
    EmptyInput,
    /// 连接/超时/DNS 失败。单次探测不重试，按“不存在”跳过。
    #[error("request failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// 存在性探测器：HEAD base_url + id + ext，200 即视为存在。
/// 客户端全程复用：连接池 keep-alive + trust-dns 缓存解析，
/// 避免每次探测重新握手/查询 DNS。
pub struct Prober {
    client: Client,
    base_url: String,
    exts: Vec<String>,
    metrics: Arc<Metrics>,
    limiter: Option<RateLimiter>,
}

impl Prober {
    pub fn new(
        opt: &Options,
        metrics: Arc<Metrics>,
        limiter: Option<RateLimiter>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(opt.timeout))
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Duration::from_secs(30))
            .trust_dns(true)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;
        Ok(Self {
            client,
            base_url: opt.base_url.clone(),
            exts: opt.exts.clone(),
            metrics,
            limiter,
        })
    }

    pub fn extensions(&self) -> &[String] {
        &self.exts
    }

    pub fn url_for(&self, id: &str, ext: &str) -> String {
        format!("{}{}{}", self.base_url, id, ext)
    }

    /// 单次检查。每次实际发出的请求（无论成功还是传输失败）恰好计数一次。
    pub async fn check_exists(&self, id: &str, ext: &str) -> Result<bool, ProbeError> {
        if id.is_empty() || ext.is_empty() {
            return Err(ProbeError::EmptyInput);
        }
        if let Some(rl) = &self.limiter {
            if let Ok(permit) = rl.handle().acquire_owned().await {
                permit.forget();
            }
        }
        let url = self.url_for(id, ext);
        let resp = self.client.head(&url).send().await;
        self.metrics.record_request();
        match resp {
            Ok(r) => Ok(r.status() == StatusCode::OK),
            Err(e) => Err(ProbeError::Transport { url, source: e }),
        }
    }

    /// 对一个候选 id 按配置顺序探测全部扩展名。
    /// 传输错误视为该扩展名不存在，继续下一个，绝不中断整轮。
    pub async fn probe(&self, id: &str) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.exts.len());
        for ext in self.exts.iter() {
            match self.check_exists(id, ext).await {
                Ok(found) => results.push(ProbeResult {
                    id: id.to_string(),
                    ext: ext.clone(),
                    found,
                }),
                Err(ProbeError::EmptyInput) => {
                    debug!("skipping probe with empty input");
                }
                Err(ProbeError::Transport { url, source }) => {
                    debug!("probe transport error for {}: {}", url, source);
                    results.push(ProbeResult {
                        id: id.to_string(),
                        ext: ext.clone(),
                        found: false,
                    });
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DEFAULT_HISTORY;
    use crate::options::{default_charset, default_id_len, OptionMethod};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 极简 HTTP mock：仅当请求路径命中 found_path 时回 200，否则 404。
    async fn spawn_mock(found_path: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    let req = String::from_utf8_lossy(&buf[..n]);
                    let path = req.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let status = if path == found_path { "200 OK" } else { "404 Not Found" };
                    let resp = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn test_options(addr: SocketAddr, exts: Vec<String>, timeout: u64) -> Options {
        let mut opt = Options {
            base_url: format!("http://{}/", addr),
            exts,
            workers: 2,
            timeout,
            id_len: default_id_len(),
            charset: default_charset(),
            rate: 0,
            method: OptionMethod::Scan,
            store_type: "sqlite".into(),
            store_path: ":memory:".into(),
            append: false,
            relay_url: None,
            relay_auth: None,
            metrics_port: None,
            drain_timeout: 5,
            progress: false,
            progress_color: false,
            log_level: "silent".into(),
        };
        opt.check().unwrap();
        opt
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_counting() {
        let addr = spawn_mock("/none").await;
        let metrics = Metrics::new(DEFAULT_HISTORY);
        let opt = test_options(addr, vec![".png".into()], 2);
        let prober = Prober::new(&opt, metrics.clone(), None).unwrap();
        assert!(matches!(
            prober.check_exists("", ".png").await,
            Err(ProbeError::EmptyInput)
        ));
        assert!(matches!(
            prober.check_exists("abc123", "").await,
            Err(ProbeError::EmptyInput)
        ));
        assert_eq!(metrics.requests_sent(), 0);
    }

    #[tokio::test]
    async fn probe_orders_extensions_and_counts_requests() {
        let addr = spawn_mock("/abc123.png").await;
        let metrics = Metrics::new(DEFAULT_HISTORY);
        let opt = test_options(addr, vec![".png".into(), ".jpg".into()], 2);
        let prober = Prober::new(&opt, metrics.clone(), None).unwrap();

        let results = prober.probe("abc123").await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ext, ".png");
        assert!(results[0].found);
        assert_eq!(results[1].ext, ".jpg");
        assert!(!results[1].found);
        assert_eq!(metrics.requests_sent(), 2);
    }

    #[tokio::test]
    async fn transport_error_counts_and_does_not_abort() {
        // 指向未监听的端口：连接拒绝 => 传输错误
        let metrics = Metrics::new(DEFAULT_HISTORY);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let opt = test_options(addr, vec![".png".into(), ".jpg".into()], 1);
        let prober = Prober::new(&opt, metrics.clone(), None).unwrap();

        let results = prober.probe("zzzzzz").await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.found));
        assert_eq!(metrics.requests_sent(), 2);
    }
}
