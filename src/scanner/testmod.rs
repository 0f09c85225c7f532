use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};

use crate::idgen::IdGenerator;
use crate::metrics::Metrics;
use crate::options::Options;
use crate::prober::Prober;
use crate::ratelimit::RateLimiter;

/// Measure approximate max HEAD probe rate within a short time window.
/// Strategy:
/// 1. Fire probes for random ids against the first configured extension.
/// 2. Bound in-flight work by the worker count; cap rate via RateLimiter
///    when band > 0, otherwise best-effort send.
/// 3. Count sent, hit (200), miss (other status), timeouts/errors.
/// 4. Run for a fixed window (3s) then print a summary.
pub async fn run(opt: &Options, metrics: Arc<Metrics>) -> Result<()> {
    let window_secs = 3u64;
    let start = Instant::now();
    // _stop_tx 活到函数结束，补桶任务才不会提前退出
    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let limiter = if opt.rate > 0 {
        let rl = RateLimiter::new(opt.rate);
        rl.spawn_refill(stop_rx);
        Some(rl)
    } else {
        None
    };
    let prober = Arc::new(Prober::new(opt, metrics.clone(), limiter)?);
    let ext = opt.exts[0].clone();
    let sem = Arc::new(Semaphore::new(opt.workers));

    let hit = Arc::new(AtomicUsize::new(0));
    let miss = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let mut gen = IdGenerator::new(opt.id_len, &opt.charset)?;
    let mut handles = Vec::new();
    while start.elapsed() < Duration::from_secs(window_secs) {
        let Ok(permit) = sem.clone().acquire_owned().await else { break };
        let id = gen.next_id();
        let prober = prober.clone();
        let ext = ext.clone();
        let hit_c = hit.clone();
        let miss_c = miss.clone();
        let err_c = errors.clone();
        handles.push(tokio::spawn(async move {
            let _p = permit;
            match prober.check_exists(&id, &ext).await {
                Ok(true) => {
                    hit_c.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    miss_c.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    err_c.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let secs = start.elapsed().as_secs_f64();
    let hit_v = hit.load(Ordering::Relaxed);
    let miss_v = miss.load(Ordering::Relaxed);
    let err_v = errors.load(Ordering::Relaxed);
    let sent = hit_v + miss_v + err_v;
    let rps = if secs > 0.0 { sent as f64 / secs } else { 0.0 };
    eprintln!(
        "test-speed: window={}s sent={} (~{:.0} rps) hit={} miss={} errors={}",
        window_secs, sent, rps, hit_v, miss_v, err_v
    );
    Ok(())
}
