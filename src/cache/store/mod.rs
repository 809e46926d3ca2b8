//! 永続化ストア
//!
//! インメモリLRUの下に置かれる、バイト列指向・TTL付きのキャッシュ層。
//! ディスパッチャはストアを書き込みスルー / 読み込みスルーで利用します。
//!
//! ストアはURLで指定します。
//!
//! | URL | 実装 |
//! |-----|------|
//! | `memory://` | プロセス内 ([`MemoryStore`]) |
//! | `file:///var/cache/veil` | ディスク ([`DiskStore`]) |

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use super::error::{CacheError, Result};
use ftlog::error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// ストア
///
/// 実装は交換可能。存在しないキーの `get` は [`CacheError::NotFound`] を返すこと。
pub trait Store: Send + Sync {
    /// データを取得
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;
    /// データを保存（`ttl` がゼロなら期限なし）
    fn set(&self, key: &[u8], data: &[u8], ttl: Duration) -> Result<()>;
    /// データを削除
    fn delete(&self, key: &[u8]) -> Result<()>;
    /// ストアを閉じる
    fn close(&self) -> Result<()>;
}

/// URLからストアを生成
pub fn open(store_url: &str) -> Result<Arc<dyn Store>> {
    let url = Url::parse(store_url).map_err(|e| CacheError::InvalidStoreUrl(format!("{}: {}", store_url, e)))?;
    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| CacheError::InvalidStoreUrl(store_url.to_string()))?;
            Ok(Arc::new(DiskStore::open(path)?))
        }
        _ => Err(CacheError::InvalidStoreUrl(store_url.to_string())),
    }
}

/// URLごとのストアハンドル表
///
/// 同じURLを指定したディスパッチャは同じストアを共有する。
#[derive(Default)]
pub struct StoreTable {
    stores: Mutex<HashMap<String, Arc<dyn Store>>>,
}

impl StoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// ストアを取得（未オープンなら生成して登録）
    pub fn open(&self, store_url: &str) -> Result<Arc<dyn Store>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(store_url) {
            return Ok(Arc::clone(store));
        }
        let store = open(store_url)?;
        stores.insert(store_url.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// 登録済みのストア数
    pub fn len(&self) -> usize {
        self.stores.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// すべてのストアを閉じる
    ///
    /// 失敗したものはログに記録し、最初のエラーを返す。
    pub fn close_all(&self) -> Result<()> {
        let stores: Vec<(String, Arc<dyn Store>)> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first_err = None;
        for (url, store) in stores {
            if let Err(e) = store.close() {
                error!("close store fail, url: {}, error: {}", url, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
