//! キャッシュディスパッチャ
//!
//! LRUシャードの配列を保持し、キーのハッシュでシャードを選択します。
//! シャードを分けることでロックの競合を減らします。
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Dispatcher                              │
//! │  ├─ Shard[0] (LruCache)                  │
//! │  ├─ Shard[1] (LruCache)                  │← mem_hash(key) % zone_size
//! │  ├─ ...                                  │
//! │  └─ Store（オプション）                   │← 書き込み/読み込みスルー
//! └──────────────────────────────────────────┘
//! ```

use super::compress::Compressor;
use super::config::DispatcherConfig;
use super::entry::{HttpCacheEntry, Lookup};
use super::error::Result;
use super::hash::mem_hash;
use super::response::{CachedPayload, Header};
use super::shard::Shard;
use super::store::{self, Store};
use ftlog::error;
use std::sync::Arc;

/// デフォルトのゾーン（シャード）数
pub const DEFAULT_ZONE_SIZE: usize = 128;
/// 総エントリ数が少ない場合のゾーン数
const SMALL_ZONE_SIZE: usize = 8;
/// これより小さい総エントリ数ではゾーン数を減らす
const SMALL_SIZE_THRESHOLD: usize = 1024;

/// キャッシュディスパッチャ
pub struct Dispatcher {
    /// 設定
    config: DispatcherConfig,
    /// シャード数
    zone_size: usize,
    /// シャードの配列
    shards: Box<[Shard]>,
    /// hit-for-pass のデフォルトTTL
    hit_for_pass: i64,
    /// 永続化ストア（共有）
    store: Option<Arc<dyn Store>>,
    /// 圧縮サービス
    compressor: Arc<Compressor>,
}

impl Dispatcher {
    /// 新しいディスパッチャを作成
    ///
    /// ストアURLが設定されていれば解決する。失敗した場合はログに記録し、
    /// メモリのみで動作する。
    pub fn new(config: DispatcherConfig) -> Self {
        let store = config.store.as_deref().filter(|url| !url.is_empty()).and_then(|url| {
            match store::open(url) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!("new store fail, url: {}, error: {}", url, e);
                    None
                }
            }
        });
        Self::with_store(config, store)
    }

    /// 解決済みのストアを指定して作成
    pub fn with_store(config: DispatcherConfig, store: Option<Arc<dyn Store>>) -> Self {
        let size = if config.size == 0 {
            DEFAULT_ZONE_SIZE * 100
        } else {
            config.size
        };
        // 総数が少ない場合はゾーンを減らし、1ゾーンあたりの容量を確保する
        let zone_size = if size < SMALL_SIZE_THRESHOLD {
            SMALL_ZONE_SIZE
        } else {
            DEFAULT_ZONE_SIZE
        };
        let per_shard = size / zone_size;
        let shards = (0..zone_size).map(|_| Shard::new(per_shard)).collect();

        let compressor = Arc::new(Compressor::new(
            config.compress.gzip_level,
            config.compress.brotli_level,
        ));

        Self {
            hit_for_pass: config.effective_hit_for_pass(),
            config,
            zone_size,
            shards,
            store,
            compressor,
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let index = (mem_hash(key) % self.zone_size as u64) as usize;
        &self.shards[index]
    }

    /// キーに対応するHTTPキャッシュエントリを取得（なければ作成）
    pub fn get_http_cache(&self, key: &[u8]) -> Arc<HttpCacheEntry> {
        self.shard(key).get_or_create(key, || {
            let entry = match &self.store {
                Some(store) => HttpCacheEntry::with_store(key, Arc::clone(store)),
                None => HttpCacheEntry::new(),
            };
            entry
                .with_compressor(Arc::clone(&self.compressor))
                .with_hit_for_pass_ttl(self.hit_for_pass)
        })
    }

    /// エントリを取得し、フェッチ担当の権利付きで参照する
    pub fn lookup(&self, key: &[u8]) -> Lookup {
        self.get_http_cache(key).acquire()
    }

    /// HTTPキャッシュを削除
    ///
    /// ストアからの削除失敗はログに記録するだけで、呼び出し元には返さない。
    pub fn remove_http_cache(&self, key: &[u8]) {
        self.shard(key).remove(key);
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(key) {
                error!("delete from store fail, key: {}, error: {}", String::from_utf8_lossy(key), e);
            }
        }
    }

    /// hit-for-pass のデフォルトTTL
    #[inline]
    pub fn get_hit_for_pass(&self) -> i64 {
        self.hit_for_pass
    }

    /// 上流レスポンスから、このキャッシュの圧縮設定を持つペイロードを作成
    pub fn payload_from_upstream(
        &self,
        status_code: u16,
        headers: Vec<Header>,
        content_encoding: &str,
        body: Vec<u8>,
    ) -> Result<CachedPayload> {
        let payload = CachedPayload::from_upstream(
            status_code,
            headers,
            content_encoding,
            body,
            &self.compressor,
        )?;
        Ok(payload
            .with_compress_min_length(self.config.compress.min_length)
            .with_content_type_filter(self.config.compress.content_type_filter.clone()))
    }

    /// 全シャードの期限切れエントリを削除
    pub fn remove_expired(&self) -> usize {
        self.shards.iter().map(Shard::remove_expired).sum()
    }

    /// 現在のエントリ数
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// シャード数
    #[inline]
    pub fn zone_size(&self) -> usize {
        self.zone_size
    }

    /// シャードあたりの容量
    pub fn shard_capacity(&self) -> usize {
        self.shards.first().map(Shard::capacity).unwrap_or(0)
    }

    /// 設定
    #[inline]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// キャッシュ名
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 圧縮サービス
    #[inline]
    pub fn compressor(&self) -> &Arc<Compressor> {
        &self.compressor
    }

    /// ストアを使用しているか
    #[inline]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheStatus;
    use crate::cache::store::MemoryStore;

    fn dispatcher(size: usize, hit_for_pass: i64) -> Dispatcher {
        let mut config = DispatcherConfig::new("test", size);
        config.hit_for_pass = hit_for_pass;
        Dispatcher::new(config)
    }

    #[test]
    fn test_zone_size() {
        let d = dispatcher(0, 0);
        assert_eq!(d.zone_size(), 128);
        assert_eq!(d.shard_capacity(), 100);
        assert_eq!(d.get_hit_for_pass(), 300);

        let d = dispatcher(100, 30);
        assert_eq!(d.zone_size(), 8);
        assert_eq!(d.shard_capacity(), 12);
        assert_eq!(d.get_hit_for_pass(), 30);

        let d = dispatcher(4, 0);
        assert_eq!(d.shard_capacity(), 1);
    }

    #[test]
    fn test_same_key_same_entry() {
        let d = dispatcher(0, 30);
        let key = b"GET example.com /a";
        let entry = d.get_http_cache(key);
        for _ in 0..10 {
            assert!(Arc::ptr_eq(&entry, &d.get_http_cache(key)));
        }
        assert_eq!(d.len(), 1);
        assert_eq!(entry.hit_for_pass_ttl(), 30);
    }

    #[test]
    fn test_remove_http_cache() {
        let d = dispatcher(0, 30);
        let key = b"key";
        let entry = d.get_http_cache(key);
        entry.get();
        entry.hit_for_pass(0);

        d.remove_http_cache(key);
        let fresh = d.get_http_cache(key);
        assert!(!Arc::ptr_eq(&entry, &fresh));
        assert_eq!(fresh.status(), CacheStatus::Unknown);
    }

    #[test]
    fn test_invalid_store_degrades_to_memory() {
        let mut config = DispatcherConfig::new("test", 100);
        config.store = Some("unknown://somewhere".to_string());
        let d = Dispatcher::new(config);
        assert!(!d.has_store());
        assert_eq!(d.get_http_cache(b"key").get().0, CacheStatus::Fetching);
    }

    #[test]
    fn test_store_backed_entries() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let d = Dispatcher::with_store(DispatcherConfig::new("test", 100), Some(Arc::clone(&store)));
        assert!(d.has_store());

        let key = b"GET example.com /a";
        let payload = d
            .payload_from_upstream(200, Vec::new(), "", b"hello".to_vec())
            .unwrap();
        let entry = d.get_http_cache(key);
        entry.get();
        entry.cacheable(payload, 60);
        assert!(store.get(key).is_ok());

        // メモリから消えてもストアから復元される
        d.shard(key).remove(key);
        let (status, data) = d.get_http_cache(key).get();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(data.unwrap().raw_body, b"hello".to_vec());

        // 明示的な削除はストアからも消す
        d.remove_http_cache(key);
        assert!(store.get(key).unwrap_err().is_not_found());
        assert_eq!(d.get_http_cache(key).get().0, CacheStatus::Fetching);
    }

    #[test]
    fn test_payload_carries_compress_config() {
        let mut config = DispatcherConfig::new("test", 100);
        config.compress.min_length = 10;
        config.compress.content_type_filter = Some("svg".to_string());
        let d = Dispatcher::new(config);

        let payload = d
            .payload_from_upstream(
                200,
                vec![(b"content-type".as_slice().into(), b"image/svg+xml".as_slice().into())],
                "",
                b"<svg>...............</svg>".to_vec(),
            )
            .unwrap();
        assert_eq!(payload.compress_min_length, 10);
        assert_eq!(payload.content_type_filter.as_deref(), Some("svg"));
        assert!(payload.should_compress());
    }

    #[test]
    fn test_remove_expired() {
        let d = dispatcher(100, 30);
        for i in 0..10 {
            let entry = d.get_http_cache(format!("key-{}", i).as_bytes());
            entry.get();
            entry.hit_for_pass(0);
            if i % 2 == 0 {
                entry.force_expire();
            }
        }
        assert_eq!(d.remove_expired(), 5);
        assert_eq!(d.len(), 5);
    }
}
