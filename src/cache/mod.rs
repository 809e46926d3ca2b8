//! # HTTPキャッシュモジュール
//!
//! リバースプロキシ向けのHTTPレスポンスキャッシュを提供します。
//!
//! ## 特徴
//!
//! - **リクエスト合流**: 同じキーへの同時ミスでは1リクエストだけが上流へフェッチし、
//!   他はその結果を待つ
//! - **hit-for-pass**: キャッシュ不可と判明したキーは一定時間キャッシュをバイパス
//! - **シャード化LRU**: キーのハッシュでシャードを選択し、ロック競合を削減
//! - **事前圧縮**: gzip / brotli の両方を保存し、Accept-Encodingで選択
//! - **永続化ストア**: `memory://` / `file://` による書き込み・読み込みスルー
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  DispatcherRegistry                     │← 名前 → Dispatcher
//! │  └─ Dispatcher                          │
//! │     ├─ Shard[n] (LruCache)              │← key → HttpCacheEntry
//! │     │  └─ HttpCacheEntry                │← 状態機械 + CachedPayload
//! │     └─ Store (memory:// / file://)      │← 永続化
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## 使用例
//!
//! ```toml
//! [[caches]]
//! name = "api"
//! size = 10240
//! hit_for_pass = 60
//! store = "file:///var/cache/veil"
//!
//! [caches.compress]
//! min_length = 1024
//! ```

mod compress;
mod config;
mod dispatcher;
mod entry;
mod error;
mod hash;
mod key;
mod registry;
mod response;
mod shard;
pub mod store;

pub use compress::{
    Compressor, DEFAULT_BROTLI_LEVEL, DEFAULT_GZIP_LEVEL, ENCODING_BROTLI, ENCODING_GZIP,
    ENCODING_LZ4, ENCODING_SNAPPY, ENCODING_ZSTD,
};
pub use config::{CompressConfig, DispatcherConfig, RegistryConfig, MAX_HIT_FOR_PASS_TTL};
pub use dispatcher::{Dispatcher, DEFAULT_ZONE_SIZE};
pub use entry::{CacheStatus, FetchPermit, HttpCacheEntry, Lookup, DEFAULT_HIT_FOR_PASS_TTL};
pub use error::{CacheError, Result};
pub use hash::{mem_hash, mem_hash_str};
pub use key::{http_cache_key, CacheableMethod};
pub use registry::{DispatcherRegistry, ExpiredSweeper};
pub use response::{
    accepts_encoding, CachedPayload, EncodedResponse, Header, DEFAULT_CONTENT_TYPE_FILTER,
};
pub use shard::Shard;
pub use store::{DiskStore, MemoryStore, Store, StoreTable};
