//! LRUシャード
//!
//! ディスパッチャが保持するキー空間の1区画。
//! シャードのロックはエントリの追加・削除・追い出しの間だけ保持し、
//! エントリの `get()`（ブロックしうる）の間は保持しない。

use super::entry::HttpCacheEntry;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// LRUシャード
pub struct Shard {
    /// キー → エントリ（Mutexで保護）
    cache: Mutex<LruCache<Box<[u8]>, Arc<HttpCacheEntry>>>,
}

impl Shard {
    /// 新しいシャードを作成
    ///
    /// `capacity` が0の場合は1として扱う。
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, LruCache<Box<[u8]>, Arc<HttpCacheEntry>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// エントリを取得、なければ `create` で生成して追加
    ///
    /// シャード内でキーごとのエントリが一意になることを保証する。
    /// 容量を超えた場合は最も古いエントリを追い出す。
    pub fn get_or_create<F>(&self, key: &[u8], create: F) -> Arc<HttpCacheEntry>
    where
        F: FnOnce() -> HttpCacheEntry,
    {
        let mut cache = self.lock();
        if let Some(entry) = cache.get(key) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(create());
        cache.put(key.into(), Arc::clone(&entry));
        entry
    }

    /// エントリを取得（LRU順を更新する）
    pub fn get(&self, key: &[u8]) -> Option<Arc<HttpCacheEntry>> {
        self.lock().get(key).map(Arc::clone)
    }

    /// エントリを削除
    pub fn remove(&self, key: &[u8]) -> Option<Arc<HttpCacheEntry>> {
        self.lock().pop(key)
    }

    /// 期限切れエントリを削除
    pub fn remove_expired(&self) -> usize {
        let mut cache = self.lock();

        let expired: Vec<Box<[u8]>> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    /// 現在のエントリ数
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// シャードが空かどうか
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// 全エントリを削除
    pub fn clear(&self) {
        self.lock().clear();
    }
}
