pub mod jsonl;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::options::Options;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 发现结果落库的统一契约。
/// record 必须幂等：同一 (id, ext) 重复写入是静默成功，只保留一条；
/// 唯一性由存储本身保证，进程内不维护 "已见" 缓存。
/// close 负责收尾落盘（连接归还 / gzip trailer）。
#[async_trait]
pub trait Store: Send + Sync {
    async fn record(&self, id: &str, ext: &str) -> Result<(), StoreError>;
    async fn close(&self) -> Result<(), StoreError>;
}

/// 按配置选择后端。打不开存储是启动期致命错误，直接向上传播。
pub async fn build_store(opt: &Options) -> Result<Arc<dyn Store>> {
    match opt.store_type.as_str() {
        "sqlite" => Ok(Arc::new(
            sqlite::SqliteStore::connect(&opt.store_path, &opt.base_url).await?,
        )),
        "jsonl" => Ok(Arc::new(jsonl::JsonlStore::create(
            &opt.store_path,
            &opt.base_url,
            opt.append,
        )?)),
        other => Err(anyhow::anyhow!("unsupported store type: {}", other)),
    }
}
