use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// 连续失败多少次后熔断
const FAIL_THRESHOLD: u32 = 3;
/// 熔断冷却时长，冷却后放行一次试探
const COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct NotifyEntry {
    pub id: String,
    pub ext: String,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("listener responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_fails: u32,
    opened_at: Option<Instant>,
}

/// relay 自持的熔断器：Closed 正常放行；连续失败达到阈值进入 Open，
/// 排队条目直接丢弃；冷却期满切到 HalfOpen 放行一次试探，
/// 试探成功回到 Closed，失败重新 Open。
pub struct Breaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl Breaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_fails: 0,
                opened_at: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// 本次通知是否放行。
    pub fn allow(&self) -> bool {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            BreakerState::Closed => true,
            // 试探已在途，等它的结果
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = g.opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(true);
                if elapsed {
                    g.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_ok(&self) {
        let mut g = self.inner.lock().unwrap();
        g.state = BreakerState::Closed;
        g.consecutive_fails = 0;
        g.opened_at = None;
    }

    pub fn record_fail(&self) {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            BreakerState::HalfOpen => {
                g.state = BreakerState::Open;
                g.opened_at = Some(Instant::now());
            }
            _ => {
                g.consecutive_fails += 1;
                if g.consecutive_fails >= self.threshold {
                    g.state = BreakerState::Open;
                    g.opened_at = Some(Instant::now());
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}

/// 发现结果的异步上报：worker 入队永不阻塞，单消费者 drain 循环
/// 逐条 POST {"id","ext","url"} 到外部 listener，失败丢弃不重试。
#[derive(Clone)]
pub struct Relay {
    tx: mpsc::UnboundedSender<NotifyEntry>,
    breaker: Arc<Breaker>,
}

impl Relay {
    /// 创建 relay 并启动 drain 任务，返回入队句柄。
    pub fn spawn(
        endpoint: String,
        auth: Option<String>,
        base_url: String,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotifyEntry>();
        let client = Client::builder().timeout(timeout).build()?;
        let breaker = Arc::new(Breaker::new(FAIL_THRESHOLD, COOLDOWN));
        let b = breaker.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    entry = rx.recv() => {
                        let Some(entry) = entry else { break };
                        if !b.allow() {
                            debug!("relay breaker open, dropping {}{}", entry.id, entry.ext);
                            continue;
                        }
                        match notify(&client, &endpoint, auth.as_deref(), &base_url, &entry).await {
                            Ok(()) => b.record_ok(),
                            Err(e) => {
                                warn!("relay notify failed for {}{}: {}", entry.id, entry.ext, e);
                                b.record_fail();
                            }
                        }
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Self { tx, breaker })
    }

    /// 入队一条发现。绝不阻塞调用方：无界队列，通道关闭时直接丢弃。
    pub fn enqueue(&self, id: &str, ext: &str) {
        let entry = NotifyEntry {
            id: id.to_string(),
            ext: ext.to_string(),
        };
        if self.tx.send(entry).is_err() {
            debug!("relay queue closed, dropping {}{}", id, ext);
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

async fn notify(
    client: &Client,
    endpoint: &str,
    auth: Option<&str>,
    base_url: &str,
    entry: &NotifyEntry,
) -> Result<(), RelayError> {
    let url = match auth {
        Some(key) => format!("{}?auth={}", endpoint, key),
        None => endpoint.to_string(),
    };
    let link = format!("{}{}{}", base_url, entry.id, entry.ext);
    let payload = serde_json::json!({
        "id": entry.id,
        "ext": entry.ext,
        "url": link,
    });
    let resp = client.post(&url).json(&payload).send().await?;
    if resp.status() != StatusCode::OK {
        return Err(RelayError::Status(resp.status().as_u16()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn breaker_opens_after_threshold() {
        let b = Breaker::new(3, Duration::from_secs(60));
        assert!(b.allow());
        b.record_fail();
        b.record_fail();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_fail();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn breaker_half_open_trial_then_close() {
        let b = Breaker::new(1, Duration::from_millis(50));
        b.record_fail();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
        std::thread::sleep(Duration::from_millis(60));
        // 冷却期满：放行一次试探，期间其余请求仍被拒
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.allow());
        b.record_ok();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn breaker_half_open_trial_failure_reopens() {
        let b = Breaker::new(1, Duration::from_millis(20));
        b.record_fail();
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.allow());
        b.record_fail();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[tokio::test]
    async fn drain_posts_entries_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (got_tx, mut got_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = vec![0u8; 1024];
            // 请求头和 body 可能分包到达，读到 body 为止
            loop {
                let n = sock.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&data).contains("abc123") {
                    break;
                }
            }
            let _ = got_tx.send(String::from_utf8_lossy(&data).to_string());
            let resp = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            let _ = sock.write_all(resp.as_bytes()).await;
        });

        let (_stop_tx, stop_rx) = watch::channel(false);
        let relay = Relay::spawn(
            format!("http://{}/api/entry", addr),
            Some("secret".into()),
            "https://files.catbox.moe/".into(),
            Duration::from_secs(2),
            stop_rx,
        )
        .unwrap();

        relay.enqueue("abc123", ".png");
        let req = tokio::time::timeout(Duration::from_secs(3), got_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(req.contains("POST /api/entry?auth=secret"));
        assert!(req.contains("abc123"));
    }

    #[tokio::test]
    async fn enqueue_never_blocks_without_consumer() {
        let (tx, rx) = mpsc::unbounded_channel::<NotifyEntry>();
        drop(rx);
        let relay = Relay {
            tx,
            breaker: Arc::new(Breaker::new(3, COOLDOWN)),
        };
        // 通道已关闭也不会阻塞或 panic
        for _ in 0..1000 {
            relay.enqueue("abc123", ".png");
        }
    }
}
