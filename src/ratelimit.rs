use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, Duration};

/// 令牌桶限速：每秒补充 `rate` 令牌，容量为 `rate`，每次请求消耗一个令牌。
/// 初始为空，避免冷启动瞬间洪水。
#[derive(Clone)]
pub struct RateLimiter {
    sem: Arc<Semaphore>,
    rate: Arc<AtomicU32>,
}

impl RateLimiter {
    pub fn new(rate: u32) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(0)),
            rate: Arc::new(AtomicU32::new(rate)),
        }
    }

    pub fn handle(&self) -> Arc<Semaphore> {
        self.sem.clone()
    }

    pub fn get_rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    /// 启动补桶任务；shutdown 触发后停止补充，消费端随即自然排空。
    pub fn spawn_refill(&self, mut shutdown: watch::Receiver<bool>) {
        let sem = self.sem.clone();
        let rate = self.rate.clone();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        // 补充至容量 (rate)，不累积多余令牌
                        let rate = rate.load(Ordering::Relaxed) as usize;
                        let available = sem.available_permits();
                        if rate > available {
                            sem.add_permits(rate - available);
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
    }
}
