use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use super::{Store, StoreError};

#[derive(Serialize)]
struct Entry<'a> {
    id: &'a str,
    ext: &'a str,
    url: &'a str,
}

/// JSON Lines 落库后端，每条发现一行 {"id","ext","url"}。
/// 文件是追加介质，(id, ext) 幂等靠进程内去重集合保证；
/// 路径以 .gz 结尾时自动 gzip，close 时写 trailer。
pub struct JsonlStore {
    file: Mutex<Option<Box<dyn Write + Send>>>,
    seen: Mutex<HashSet<(String, String)>>,
    base_url: String,
}

impl JsonlStore {
    pub fn create(path: impl AsRef<Path>, base_url: &str, append: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut oo = OpenOptions::new();
        oo.create(true).write(true);
        if append {
            oo.append(true);
        } else {
            oo.truncate(true);
        }
        let f = oo.open(path)?;
        let gzip = path.extension().map(|e| e == "gz").unwrap_or(false);
        let w: Box<dyn Write + Send> = if gzip {
            Box::new(GzEncoder::new(f, Compression::default()))
        } else {
            Box::new(f)
        };
        Ok(Self {
            file: Mutex::new(Some(w)),
            seen: Mutex::new(HashSet::new()),
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl Store for JsonlStore {
    async fn record(&self, id: &str, ext: &str) -> Result<(), StoreError> {
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert((id.to_string(), ext.to_string())) {
                // 重复发现：静默成功
                return Ok(());
            }
        }
        let url = format!("{}{}{}", self.base_url, id, ext);
        let line = serde_json::to_string(&Entry { id, ext, url: &url })?;
        let mut guard = self.file.lock().unwrap();
        if let Some(w) = guard.as_mut() {
            writeln!(w, "{}", line)?;
            w.flush()?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(mut w) = self.file.lock().unwrap().take() {
            w.flush()?;
            // drop 结束 gzip 流并写入 trailer
        }
        Ok(())
    }
}
