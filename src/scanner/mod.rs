pub mod testmod;
pub mod verify;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::idgen::IdGenerator;
use crate::metrics::Metrics;
use crate::options::Options;
use crate::prober::Prober;
use crate::relay::Relay;
use crate::store::Store;

/// 调度器生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// 扫描调度器：生成候选 id，提交到固定 worker 池，
/// 池满时提交阻塞（刻意背压：生成速率永远追不过探测完成速率，
/// 在途工作因此有界）。关停信号在两次提交之间协作式观察，
/// 在途探测不强制打断，drain 超时后放弃。
pub struct Scanner {
    opt: Options,
    metrics: Arc<Metrics>,
    store: Arc<dyn Store>,
    prober: Arc<Prober>,
    relay: Option<Relay>,
    shutdown: watch::Receiver<bool>,
    state: ScanState,
}

impl Scanner {
    pub fn new(
        opt: Options,
        metrics: Arc<Metrics>,
        store: Arc<dyn Store>,
        prober: Arc<Prober>,
        relay: Option<Relay>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            opt,
            metrics,
            store,
            prober,
            relay,
            shutdown,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// 主循环。返回时所有 worker 已结束或被放弃。
    pub async fn run(&mut self) -> Result<()> {
        let workers = self.opt.workers;
        // 有界队列容量 = worker 数；send 在池饱和时挂起，即背压点
        let (tx, rx) = mpsc::channel::<String>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                n,
                rx.clone(),
                self.prober.clone(),
                self.store.clone(),
                self.metrics.clone(),
                self.relay.clone(),
            )));
        }

        self.state = ScanState::Running;
        info!("scanner running with {} workers", workers);
        let mut gen = IdGenerator::new(self.opt.id_len, &self.opt.charset)?;
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let id = gen.next_id();
            tokio::select! {
                res = tx.send(id) => {
                    if res.is_err() {
                        // 所有 worker 已退出
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        self.state = ScanState::Draining;
        info!(
            "scanner draining, waiting up to {}s for in-flight probes",
            self.opt.drain_timeout
        );
        // 关闭队列：worker 清空剩余条目后退出
        drop(tx);
        let deadline = Duration::from_secs(self.opt.drain_timeout);
        let drain = futures::future::join_all(handles.iter_mut());
        if timeout(deadline, drain).await.is_err() {
            warn!("drain timeout reached, abandoning in-flight probes");
            for h in &handles {
                h.abort();
            }
        }

        self.state = ScanState::Stopped;
        info!("scanner stopped");
        Ok(())
    }
}

/// worker：从共享队列取 id，逐一探测并处理命中。
async fn worker_loop(
    n: usize,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    prober: Arc<Prober>,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    relay: Option<Relay>,
) {
    loop {
        // 锁只覆盖出队本身；队列空时持锁挂起，其余 worker 在锁上排队
        let id = { rx.lock().await.recv().await };
        let Some(id) = id else { break };
        handle_id(&id, &prober, &store, &metrics, relay.as_ref()).await;
    }
    debug!("worker {} exiting", n);
}

/// 单个候选 id 的完整处理：探测全部扩展名，命中则同步落库、
/// 计数并（启用时）无阻塞入队上报。落库失败只记日志，不中断扫描。
pub(crate) async fn handle_id(
    id: &str,
    prober: &Prober,
    store: &Arc<dyn Store>,
    metrics: &Metrics,
    relay: Option<&Relay>,
) {
    for r in prober.probe(id).await {
        if !r.found {
            continue;
        }
        info!("found {}", prober.url_for(&r.id, &r.ext));
        if let Err(e) = store.record(&r.id, &r.ext).await {
            warn!("store record failed for {}{}: {}", r.id, r.ext, e);
        }
        metrics.record_found();
        if let Some(relay) = relay {
            relay.enqueue(&r.id, &r.ext);
        }
    }
}
