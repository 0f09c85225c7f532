use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::metrics::Metrics;
use crate::options::Options;
use crate::prober::Prober;
use crate::store::Store;

/// verify 模式：对显式给定的 id 逐一探测全部扩展名，
/// 打印每个命中并通过 sink 落库。
pub async fn run(
    opt: &Options,
    ids: Vec<String>,
    metrics: Arc<Metrics>,
    store: Arc<dyn Store>,
) -> Result<()> {
    let prober = Prober::new(opt, metrics.clone(), None)?;
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let mut hit = false;
        for r in prober.probe(id).await {
            if !r.found {
                continue;
            }
            hit = true;
            println!("{}", prober.url_for(&r.id, &r.ext));
            if let Err(e) = store.record(&r.id, &r.ext).await {
                warn!("store record failed for {}{}: {}", r.id, r.ext, e);
            }
            metrics.record_found();
        }
        if !hit {
            println!("{}\t[no-result]", id);
        }
    }
    Ok(())
}
