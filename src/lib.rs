//! # veil-cache
//!
//! リバースプロキシ veil のHTTPキャッシュディスパッチ層。
//!
//! 上流へのリクエスト合流、シャード化LRU、事前圧縮ペイロード、
//! 永続化ストアを提供します。詳細は [`cache`] モジュールを参照。
//!
//! ```no_run
//! use veil_cache::cache::{http_cache_key, DispatcherConfig, DispatcherRegistry, Lookup};
//!
//! let registry = DispatcherRegistry::new(&[DispatcherConfig::new("default", 10240)]);
//! let dispatcher = registry.get("default").unwrap();
//! let key = http_cache_key(b"GET", "example.com", "/a").unwrap();
//!
//! match dispatcher.lookup(&key) {
//!     Lookup::Hit(payload) => { /* キャッシュから応答 */ let _ = payload; }
//!     Lookup::HitForPass => { /* 上流へそのまま転送 */ }
//!     Lookup::Fetch(permit) => {
//!         // 上流から取得し、結果を登録する
//!         let payload = dispatcher
//!             .payload_from_upstream(200, Vec::new(), "", b"hello".to_vec())
//!             .unwrap();
//!         permit.cacheable(payload, 60);
//!     }
//! }
//! ```

pub mod cache;
pub mod logging;

pub use cache::{
    CacheError, CacheStatus, CachedPayload, Dispatcher, DispatcherConfig, DispatcherRegistry,
    HttpCacheEntry, Lookup, Result,
};
