//! シャード選択用ハッシュ
//!
//! プロセス起動ごとにシードが変わる高速ハッシュ。
//! シャードのルーティングにのみ使用し、永続化やプロセス間比較には使わない。

use once_cell::sync::Lazy;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// プロセスごとのシード
static SEED: Lazy<u64> = Lazy::new(|| {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(std::process::id() as u64);
    hasher.finish()
});

/// バイト列のハッシュ値を計算
///
/// 同一プロセス内では同じ入力に対して常に同じ値を返す。
#[inline]
pub fn mem_hash(data: &[u8]) -> u64 {
    xxh3_64_with_seed(data, *SEED)
}

/// 文字列のハッシュ値を計算
#[inline]
pub fn mem_hash_str(data: &str) -> u64 {
    mem_hash(data.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stable_within_process() {
        let key = b"GET example.com /a";
        let first = mem_hash(key);
        for _ in 0..100 {
            assert_eq!(mem_hash(key), first);
        }
        assert_eq!(mem_hash_str("GET example.com /a"), first);
    }

    #[test]
    fn test_hash_spreads_over_zones() {
        // 128ゾーンに対して偏りすぎないこと
        let zones = 128u64;
        let mut counts = vec![0usize; zones as usize];
        for i in 0..12_800 {
            let key = format!("GET example.com /item/{}", i);
            counts[(mem_hash(key.as_bytes()) % zones) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0));
        assert!(counts.iter().all(|&c| c < 400));
    }
}
