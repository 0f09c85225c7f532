use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::idgen::{DEFAULT_CHARSET, DEFAULT_ID_LEN};

#[derive(Debug, Clone)]
pub enum OptionMethod {
    Scan,
    Verify,
    Test,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: String,
    pub exts: Vec<String>,
    pub workers: usize,
    pub timeout: u64,
    pub id_len: usize,
    pub charset: String,
    pub rate: u32,
    pub method: OptionMethod,
    pub store_type: String,
    pub store_path: PathBuf,
    pub append: bool,
    pub relay_url: Option<String>,
    pub relay_auth: Option<String>,
    pub metrics_port: Option<u16>,
    pub drain_timeout: u64,
    pub progress: bool,
    pub progress_color: bool,
    pub log_level: String,
}

impl Options {
    /// 启动前统一校验与规范化；非法配置直接终止，不进入扫描。
    pub fn check(&mut self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("worker count must be > 0");
        }
        if self.timeout == 0 {
            anyhow::bail!("request timeout must be > 0");
        }
        if self.id_len == 0 {
            anyhow::bail!("id length must be > 0");
        }
        if self.charset.is_empty() || !self.charset.is_ascii() {
            anyhow::bail!("charset must be non-empty ascii");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("base url must start with http:// or https://: {}", self.base_url);
        }
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        if self.exts.is_empty() {
            self.exts = default_exts();
        }
        // 规范化扩展名：补前导点、按首次出现去重，保持配置顺序
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(self.exts.len());
        for e in self.exts.drain(..) {
            let e = e.trim().to_string();
            if e.is_empty() || e == "." {
                continue;
            }
            let e = if e.starts_with('.') { e } else { format!(".{}", e) };
            if seen.insert(e.clone()) {
                normalized.push(e);
            }
        }
        if normalized.is_empty() {
            anyhow::bail!("extension list is empty after normalization");
        }
        self.exts = normalized;
        Ok(())
    }
}

pub fn default_exts() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webm", "mp4"]
        .iter()
        .map(|e| format!(".{}", e))
        .collect()
}

pub fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

pub fn default_id_len() -> usize {
    DEFAULT_ID_LEN
}

/// Convert a bandwidth expression (e.g. 10M, 2.5M, 750K, 10mbps, 500rps) into
/// approximate HTTP requests per second.
/// Assumptions:
/// - 1G = 1_000_000_000 bits per second, same for M/K scaling.
/// - Average HEAD request + response approximation 500 bytes (~4000 bits).
/// - Bare numbers are taken as raw requests per second.
/// - 0 disables the cap.
pub fn band2rate(band: &str) -> Result<u32> {
    let s = band.trim();
    if s.is_empty() {
        anyhow::bail!("empty band string");
    }
    let lower = s.to_ascii_lowercase();

    let parse_num = |txt: &str| -> Result<f64> {
        let v: f64 = txt.trim().parse()?;
        if v < 0.0 {
            anyhow::bail!("band value must be >= 0");
        }
        Ok(v)
    };

    // HEAD 请求往返近似大小（bits）
    const HEAD_BITS: f64 = 500.0 * 8.0;

    // Case 1: kbps/mbps/gbps/bps (bits per second)
    if lower.ends_with("kbps") {
        let v = parse_num(&lower[..lower.len() - 4])? * 1_000.0;
        return Ok((v / HEAD_BITS).floor() as u32);
    }
    if lower.ends_with("mbps") {
        let v = parse_num(&lower[..lower.len() - 4])? * 1_000_000.0;
        return Ok((v / HEAD_BITS).floor() as u32);
    }
    if lower.ends_with("gbps") {
        let v = parse_num(&lower[..lower.len() - 4])? * 1_000_000_000.0;
        return Ok((v / HEAD_BITS).floor() as u32);
    }
    if lower.ends_with("bps") {
        let v = parse_num(&lower[..lower.len() - 3])?;
        return Ok((v / HEAD_BITS).floor() as u32);
    }

    // Case 2: krps/rps (requests per second)
    if lower.ends_with("krps") {
        let v = parse_num(&lower[..lower.len() - 4])? * 1_000.0;
        return Ok(v.floor() as u32);
    }
    if lower.ends_with("rps") {
        let v = parse_num(&lower[..lower.len() - 3])?;
        return Ok(v.floor() as u32);
    }

    // Case 3: legacy K/M/G suffixes meaning Kilobits/Megabits/Gigabits per second
    if let Some(last) = lower.chars().last() {
        if matches!(last, 'g' | 'm' | 'k') {
            let mult = match last {
                'g' => 1_000_000_000f64,
                'm' => 1_000_000f64,
                _ => 1_000f64,
            };
            let value = parse_num(&lower[..lower.len() - 1])?;
            return Ok((value * mult / HEAD_BITS).floor() as u32);
        }
    }

    // Case 4: pure number => raw rps
    if lower.chars().all(|c| c.is_ascii_digit()) {
        let raw: u32 = lower.parse()?;
        return Ok(raw);
    }

    anyhow::bail!("invalid band format: {}", band)
}
