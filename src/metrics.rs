use serde::Serialize;
use std::collections::VecDeque;
use std::io::{stderr, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{interval, Duration};

/// rps 历史环形缓冲容量（秒）
pub const DEFAULT_HISTORY: usize = 60;

pub struct Metrics {
    requests_sent: AtomicU64,
    links_found: AtomicU64,
    window: Mutex<RateWindow>,
}

/// 速率派生状态：只在 tick 的算术期间持锁，绝不跨 I/O。
struct RateWindow {
    req_per_sec: u64,
    found_per_min: u64,
    history: VecDeque<u64>,
    capacity: usize,
    last_requests: u64,
    last_found: u64,
}

impl Metrics {
    pub fn new(history_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            requests_sent: AtomicU64::new(0),
            links_found: AtomicU64::new(0),
            window: Mutex::new(RateWindow {
                req_per_sec: 0,
                found_per_min: 0,
                history: VecDeque::with_capacity(history_capacity.max(1)),
                capacity: history_capacity.max(1),
                last_requests: 0,
                last_found: 0,
            }),
        })
    }

    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_found(&self) {
        self.links_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn links_found(&self) -> u64 {
        self.links_found.load(Ordering::Relaxed)
    }

    /// 秒级 tick：上个窗口的请求增量作为当前 rps 样本入环，返回 (rps, 环内均值)。
    pub(crate) fn tick_second(&self) -> (u64, f64) {
        let sent = self.requests_sent();
        let mut w = self.window.lock().unwrap();
        let rps = sent.saturating_sub(w.last_requests);
        w.last_requests = sent;
        w.req_per_sec = rps;
        w.history.push_back(rps);
        while w.history.len() > w.capacity {
            w.history.pop_front();
        }
        let avg = w.history.iter().sum::<u64>() as f64 / w.history.len() as f64;
        (rps, avg)
    }

    /// 分钟级 tick：上一分钟的发现增量。与秒级 tick 独立调度。
    pub(crate) fn tick_minute(&self) -> u64 {
        let found = self.links_found();
        let mut w = self.window.lock().unwrap();
        let fpm = found.saturating_sub(w.last_found);
        w.last_found = found;
        w.found_per_min = fpm;
        fpm
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_sent = self.requests_sent();
        let links_found = self.links_found();
        let w = self.window.lock().unwrap();
        let avg = if w.history.is_empty() {
            0.0
        } else {
            w.history.iter().sum::<u64>() as f64 / w.history.len() as f64
        };
        MetricsSnapshot {
            requests_sent,
            links_found,
            req_per_sec: w.req_per_sec,
            avg_req_per_sec: avg,
            found_per_min: w.found_per_min,
            rps_history: w.history.iter().copied().collect(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub links_found: u64,
    pub req_per_sec: u64,
    pub avg_req_per_sec: f64,
    pub found_per_min: u64,
    pub rps_history: Vec<u64>,
}

fn colorize(enabled: bool, code: &str, s: String) -> String {
    if enabled {
        format!("\x1b[{}m{}\x1b[0m", code, s)
    } else {
        s
    }
}

/// 聚合器后台任务：秒级/分钟级两个独立 ticker 驱动速率派生，
/// display 开启时在 stderr 单行刷新进度。shutdown 触发后退出。
pub fn spawn_reporter(
    m: Arc<Metrics>,
    display: bool,
    color: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut sec_tick = interval(Duration::from_secs(1));
        let mut min_tick = interval(Duration::from_secs(60));
        // interval 的首个 tick 立即返回，先吞掉
        sec_tick.tick().await;
        min_tick.tick().await;
        loop {
            tokio::select! {
                _ = sec_tick.tick() => {
                    let (rps, avg) = m.tick_second();
                    if display {
                        let requests = m.requests_sent();
                        let found = m.links_found();
                        let fpm = { m.snapshot().found_per_min };
                        let rps_c = colorize(color, "33", format!("{}", rps));
                        let found_c = colorize(color, "32", format!("{}", found));
                        let mut err = stderr();
                        let _ = write!(
                            err,
                            "\r\x1b[2K[stat] requests={} found={} rps={} avg={:.0} fpm={}",
                            requests, found_c, rps_c, avg, fpm
                        );
                        let _ = err.flush();
                    }
                }
                _ = min_tick.tick() => {
                    m.tick_minute();
                    if display {
                        eprintln!();
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        if display { eprintln!(); }
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new(DEFAULT_HISTORY);
        for _ in 0..5 {
            m.record_request();
        }
        m.record_found();
        assert_eq!(m.requests_sent(), 5);
        assert_eq!(m.links_found(), 1);
    }

    #[test]
    fn rate_history_mean_matches_window_deltas() {
        // 已知的每秒请求数序列，逐窗口驱动秒级 tick
        let m = Metrics::new(DEFAULT_HISTORY);
        let per_window: [u64; 5] = [10, 0, 25, 5, 60];
        for n in per_window {
            for _ in 0..n {
                m.record_request();
            }
            m.tick_second();
        }
        let snap = m.snapshot();
        assert_eq!(snap.rps_history, per_window.to_vec());
        assert_eq!(snap.req_per_sec, 60);
        let true_mean = per_window.iter().sum::<u64>() as f64 / per_window.len() as f64;
        assert!((snap.avg_req_per_sec - true_mean).abs() < 1e-9);
    }

    #[test]
    fn rate_history_is_bounded() {
        let m = Metrics::new(3);
        for i in 0..10u64 {
            for _ in 0..i {
                m.record_request();
            }
            m.tick_second();
        }
        let snap = m.snapshot();
        assert_eq!(snap.rps_history.len(), 3);
        // 只保留最近 3 个窗口样本
        assert_eq!(snap.rps_history, vec![7, 8, 9]);
        assert!((snap.avg_req_per_sec - 8.0).abs() < 1e-9);
    }

    #[test]
    fn minute_tick_tracks_found_delta() {
        let m = Metrics::new(DEFAULT_HISTORY);
        for _ in 0..4 {
            m.record_found();
        }
        assert_eq!(m.tick_minute(), 4);
        m.record_found();
        assert_eq!(m.tick_minute(), 1);
        assert_eq!(m.snapshot().found_per_min, 1);
    }
}
