use anyhow::Result;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

pub const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
pub const DEFAULT_ID_LEN: usize = 6;

/// 随机短链 ID 生成器：固定长度，每个位置在字母表内独立均匀采样。
/// 只要求均匀性，不要求不可预测性。
pub struct IdGenerator {
    charset: Vec<u8>,
    len: usize,
    dist: Uniform<usize>,
    rng: ChaCha20Rng,
}

impl IdGenerator {
    pub fn new(len: usize, charset: &str) -> Result<Self> {
        if len == 0 {
            anyhow::bail!("id length must be > 0");
        }
        if charset.is_empty() {
            anyhow::bail!("charset must not be empty");
        }
        if !charset.is_ascii() {
            anyhow::bail!("charset must be ascii");
        }
        let charset = charset.as_bytes().to_vec();
        let dist = Uniform::from(0..charset.len());
        Ok(Self {
            charset,
            len,
            dist,
            rng: ChaCha20Rng::from_entropy(),
        })
    }

    pub fn next_id(&mut self) -> String {
        let mut id = String::with_capacity(self.len);
        for _ in 0..self.len {
            id.push(self.charset[self.dist.sample(&mut self.rng)] as char);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rejects_bad_config() {
        assert!(IdGenerator::new(0, DEFAULT_CHARSET).is_err());
        assert!(IdGenerator::new(6, "").is_err());
        assert!(IdGenerator::new(6, "abc✓").is_err());
    }

    #[test]
    fn length_and_alphabet() {
        let mut gen = IdGenerator::new(6, DEFAULT_CHARSET).unwrap();
        for _ in 0..1000 {
            let id = gen.next_id();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| DEFAULT_CHARSET.contains(c)), "unexpected char in {}", id);
        }
    }

    #[test]
    fn roughly_uniform_distribution() {
        // 统计检验：20k 个 6 位 id，每字符期望 120000/36 ≈ 3333 次。
        // 宽松上下界，避免偶发失败。
        let mut gen = IdGenerator::new(6, DEFAULT_CHARSET).unwrap();
        let mut counts: HashMap<char, u64> = HashMap::new();
        for _ in 0..20_000 {
            for c in gen.next_id().chars() {
                *counts.entry(c).or_insert(0) += 1;
            }
        }
        assert_eq!(counts.len(), DEFAULT_CHARSET.len());
        let expected = (20_000u64 * 6) / DEFAULT_CHARSET.len() as u64;
        for (c, n) in counts {
            assert!(
                n > expected / 2 && n < expected * 2,
                "char {} count {} far from expected {}",
                c,
                n,
                expected
            );
        }
    }
}
