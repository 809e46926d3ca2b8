//! プロセス内ストア

use super::Store;
use crate::cache::error::{CacheError, Result};
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct StoredValue {
    data: Vec<u8>,
    /// 期限（`None` は無期限）
    expires_at: Option<Instant>,
}

impl StoredValue {
    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at <= Instant::now())
    }
}

/// DashMapによるプロセス内ストア
///
/// 期限切れのデータは参照時に削除する。
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<Box<[u8]>, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存されているキー数（期限切れを含む）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(value) if !value.is_expired() => return Ok(value.data.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired());
        }
        Err(CacheError::NotFound)
    }

    fn set(&self, key: &[u8], data: &[u8], ttl: Duration) -> Result<()> {
        // 表現できないほど長い TTL は期限なしとして扱う
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        self.entries.insert(
            key.into(),
            StoredValue {
                data: data.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
