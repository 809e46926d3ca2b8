//! HTTPキャッシュエントリ
//!
//! キーごとの状態機械。同一キーへの同時リクエストを1つの上流フェッチに合流させ、
//! TTLによる期限切れと圧縮済みペイロードの保存を管理します。
//!
//! ## 状態遷移
//!
//! ```text
//!            get()                      cacheable()
//! Unknown ─────────▶ Fetching ─────────────────────────▶ Hit
//!    ▲                  │  hit_for_pass()                 │
//!    │                  └──────────────▶ HitForPass       │
//!    │                                      │             │
//!    └──────────────── 期限切れで get() ────┴─────────────┘
//! ```
//!
//! `Fetching` 中に `get()` した呼び出し元は、フェッチ担当が
//! `cacheable()` か `hit_for_pass()` を呼ぶまでブロックします。
//! フェッチ担当は必ずどちらかを呼ぶ必要があるため、
//! 通常は [`HttpCacheEntry::acquire`] が返す [`FetchPermit`] を使います。
//! 解決せずにドロップされた permit は hit-for-pass として扱われます。

use super::compress::Compressor;
use super::error::{CacheError, Result};
use super::response::CachedPayload;
use super::store::Store;
use ftlog::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// hit-for-pass のデフォルトTTL（秒）
pub const DEFAULT_HIT_FOR_PASS_TTL: i64 = 300;

/// 現在のUNIX秒
#[inline]
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// キャッシュ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// 未取得
    Unknown,
    /// 上流から取得中
    Fetching,
    /// キャッシュ不可（TTLの間は上流へ素通し）
    HitForPass,
    /// キャッシュ済み
    Hit,
    /// キャッシュを使わないリクエスト（呼び出し側が設定する）
    Passed,
}

impl CacheStatus {
    /// レスポンスヘッダー用の文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Unknown => "unknown",
            CacheStatus::Fetching => "fetching",
            CacheStatus::HitForPass => "hitForPass",
            CacheStatus::Hit => "cacheable",
            CacheStatus::Passed => "passed",
        }
    }
}

/// ストアに保存する形式
#[derive(Deserialize)]
struct StoredEntry {
    created_at: i64,
    expired_at: i64,
    payload: CachedPayload,
}

/// 書き込み用（ペイロードを借用してシリアライズする）
#[derive(Serialize)]
struct StoredEntryRef<'a> {
    created_at: i64,
    expired_at: i64,
    payload: &'a CachedPayload,
}

impl StoredEntryRef<'_> {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Codec(e.to_string()))
    }
}

impl StoredEntry {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let (entry, _): (Self, usize) =
            bincode::serde::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| CacheError::Codec(e.to_string()))?;
        Ok(entry)
    }
}

struct EntryState {
    status: CacheStatus,
    payload: Option<Arc<CachedPayload>>,
    created_at: i64,
    /// 0 は期限なし
    expired_at: i64,
    /// 解決待ちの呼び出し元の数
    waiters: usize,
}

/// ストア連携
struct StoreBinding {
    key: Box<[u8]>,
    store: Arc<dyn Store>,
}

/// HTTPキャッシュエントリ
pub struct HttpCacheEntry {
    state: Mutex<EntryState>,
    resolved: Condvar,
    store: Option<StoreBinding>,
    compressor: Arc<Compressor>,
    hit_for_pass_ttl: i64,
}

impl Default for HttpCacheEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("HttpCacheEntry")
            .field("status", &state.status)
            .field("created_at", &state.created_at)
            .field("expired_at", &state.expired_at)
            .field("waiters", &state.waiters)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl HttpCacheEntry {
    /// メモリのみのエントリを作成
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EntryState {
                status: CacheStatus::Unknown,
                payload: None,
                created_at: 0,
                expired_at: 0,
                waiters: 0,
            }),
            resolved: Condvar::new(),
            store: None,
            compressor: Compressor::shared_default(),
            hit_for_pass_ttl: DEFAULT_HIT_FOR_PASS_TTL,
        }
    }

    /// ストア連携ありのエントリを作成
    ///
    /// キャッシュミス時にストアから読み込み、`cacheable()` でストアへ書き込む。
    pub fn with_store(key: &[u8], store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(StoreBinding {
                key: key.into(),
                store,
            }),
            ..Self::new()
        }
    }

    /// 圧縮サービスを設定
    pub fn with_compressor(mut self, compressor: Arc<Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// `hit_for_pass(0)` で使うデフォルトTTLを設定
    pub fn with_hit_for_pass_ttl(mut self, ttl: i64) -> Self {
        if ttl > 0 {
            self.hit_for_pass_ttl = ttl;
        }
        self
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        // 状態はロック中に常に整合しているため、ポイズンは無視してよい
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// キャッシュ状態とペイロードを取得
    ///
    /// - `Fetching` が返った場合、呼び出し元がフェッチ担当になる。
    ///   必ず `cacheable()` か `hit_for_pass()` を呼ぶこと。
    /// - 他の呼び出し元がフェッチ中なら、解決されるまでブロックする。
    /// - `Hit` の場合のみペイロードが返る。
    pub fn get(&self) -> (CacheStatus, Option<Arc<CachedPayload>>) {
        let mut state = self.lock();

        // 期限切れなら Unknown に戻す。expired_at を先に 0 にしておくことで
        // 同時に期限切れを観測した別の呼び出し元は Fetching を見て待機する。
        let now = now_secs();
        if state.expired_at != 0 && state.expired_at < now {
            state.expired_at = 0;
            state.status = CacheStatus::Unknown;
            state.payload = None;
        }

        match state.status {
            CacheStatus::Unknown => {
                state.status = CacheStatus::Fetching;
                drop(state);
                if let Some(payload) = self.read_through() {
                    return (CacheStatus::Hit, Some(payload));
                }
                (CacheStatus::Fetching, None)
            }
            CacheStatus::Fetching => {
                state.waiters += 1;
                while state.status == CacheStatus::Fetching {
                    state = self
                        .resolved
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                state.waiters -= 1;
                Self::snapshot(&state)
            }
            _ => Self::snapshot(&state),
        }
    }

    fn snapshot(state: &EntryState) -> (CacheStatus, Option<Arc<CachedPayload>>) {
        match state.status {
            CacheStatus::Hit => (CacheStatus::Hit, state.payload.clone()),
            status => (status, None),
        }
    }

    /// フェッチ担当の権利付きで取得
    ///
    /// フェッチ担当になった場合は [`Lookup::Fetch`] を返す。
    pub fn acquire(self: &Arc<Self>) -> Lookup {
        match self.get() {
            (CacheStatus::Hit, Some(payload)) => Lookup::Hit(payload),
            (CacheStatus::Fetching, _) | (CacheStatus::Unknown, _) => Lookup::Fetch(FetchPermit {
                entry: Arc::clone(self),
                resolved: false,
            }),
            _ => Lookup::HitForPass,
        }
    }

    /// ストアから読み込み、見つかれば Hit に解決する
    ///
    /// 呼び出し元はフェッチ担当（状態は Fetching）で、ロックは保持していない。
    fn read_through(&self) -> Option<Arc<CachedPayload>> {
        let binding = self.store.as_ref()?;
        let data = match binding.store.get(&binding.key) {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                warn!("get from store fail, key: {}, error: {}", String::from_utf8_lossy(&binding.key), e);
                return None;
            }
        };
        let stored = match StoredEntry::from_bytes(&data) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("decode stored payload fail, key: {}, error: {}", String::from_utf8_lossy(&binding.key), e);
                return None;
            }
        };
        if stored.expired_at != 0 && stored.expired_at < now_secs() {
            return None;
        }

        let payload = Arc::new(stored.payload);
        let mut state = self.lock();
        state.status = CacheStatus::Hit;
        state.payload = Some(Arc::clone(&payload));
        state.created_at = stored.created_at;
        state.expired_at = stored.expired_at;
        drop(state);
        self.resolved.notify_all();
        Some(payload)
    }

    /// キャッシュ不可として解決する
    ///
    /// `ttl` が0以下ならデフォルトTTLを使う。待機中の呼び出し元はすべて解放される。
    pub fn hit_for_pass(&self, ttl: i64) {
        let ttl = if ttl <= 0 { self.hit_for_pass_ttl } else { ttl };
        let expired_at = now_secs().saturating_add(ttl);
        let mut state = self.lock();
        state.expired_at = expired_at;
        state.status = CacheStatus::HitForPass;
        state.payload = None;
        drop(state);
        self.resolved.notify_all();
    }

    /// キャッシュ可能として解決する
    ///
    /// ペイロードは圧縮条件を満たせば gzip / brotli に圧縮してから保存する。
    /// ボディが復元できない場合や `ttl` が0以下の場合は hit-for-pass になる。
    /// 圧縮に失敗した場合は非圧縮のまま保存する。
    pub fn cacheable(&self, mut payload: CachedPayload, ttl: i64) {
        if ttl <= 0 {
            self.hit_for_pass(0);
            return;
        }
        match payload.compress(&self.compressor) {
            Ok(()) => {}
            Err(CacheError::BodyIsNil) => {
                self.hit_for_pass(0);
                return;
            }
            Err(e) => warn!("compress payload fail, serve uncompressed, error: {}", e),
        }

        let payload = Arc::new(payload);
        let created_at = now_secs();
        let expired_at = created_at.saturating_add(ttl);
        let mut state = self.lock();
        state.created_at = created_at;
        state.expired_at = expired_at;
        state.status = CacheStatus::Hit;
        state.payload = Some(Arc::clone(&payload));
        drop(state);
        self.resolved.notify_all();

        self.write_through(&payload, created_at, expired_at, ttl);
    }

    fn write_through(&self, payload: &CachedPayload, created_at: i64, expired_at: i64, ttl: i64) {
        let binding = match &self.store {
            Some(binding) => binding,
            None => return,
        };
        let stored = StoredEntryRef {
            created_at,
            expired_at,
            payload,
        };
        // ttl は正の値のみ（cacheable で検証済み）
        let ttl = Duration::from_secs(u64::try_from(ttl).unwrap_or(0));
        let result = stored
            .to_bytes()
            .and_then(|data| binding.store.set(&binding.key, &data, ttl));
        if let Err(e) = result {
            warn!("set to store fail, key: {}, error: {}", String::from_utf8_lossy(&binding.key), e);
        }
    }

    /// 現在の状態
    pub fn status(&self) -> CacheStatus {
        self.lock().status
    }

    /// キャッシュされてからの経過秒数（Hit のときのみ意味を持つ）
    pub fn age(&self) -> i64 {
        now_secs() - self.lock().created_at
    }

    /// 期限切れかどうか
    pub fn is_expired(&self) -> bool {
        let state = self.lock();
        state.expired_at != 0 && state.expired_at < now_secs()
    }

    /// 期限（UNIX秒、0は期限なし）
    pub fn expired_at(&self) -> i64 {
        self.lock().expired_at
    }

    /// 解決を待っている呼び出し元の数
    pub fn waiters(&self) -> usize {
        self.lock().waiters
    }

    /// `hit_for_pass(0)` で使われるTTL
    pub fn hit_for_pass_ttl(&self) -> i64 {
        self.hit_for_pass_ttl
    }

    /// 期限切れを待たずに再現する
    #[cfg(test)]
    pub(crate) fn force_expire(&self) {
        self.lock().expired_at = now_secs() - 1;
    }
}

/// [`HttpCacheEntry::acquire`] の結果
#[derive(Debug)]
pub enum Lookup {
    /// キャッシュ済みのペイロード
    Hit(Arc<CachedPayload>),
    /// キャッシュ不可。上流へ素通しする
    HitForPass,
    /// フェッチ担当になった
    Fetch(FetchPermit),
}

/// フェッチ担当の権利
///
/// `cacheable()` か `hit_for_pass()` で解決する。
/// 解決せずにドロップされるとデフォルトTTLで hit-for-pass になり、
/// 待機中の呼び出し元が取り残されることはない。
#[derive(Debug)]
pub struct FetchPermit {
    entry: Arc<HttpCacheEntry>,
    resolved: bool,
}

impl FetchPermit {
    /// 対象のエントリ
    pub fn entry(&self) -> &Arc<HttpCacheEntry> {
        &self.entry
    }

    /// キャッシュ可能として解決
    ///
    /// 解決中にパニックした場合はドロップ時に hit-for-pass へ戻す。
    pub fn cacheable(mut self, payload: CachedPayload, ttl: i64) {
        self.entry.cacheable(payload, ttl);
        self.resolved = true;
    }

    /// キャッシュ不可として解決
    pub fn hit_for_pass(mut self, ttl: i64) {
        self.entry.hit_for_pass(ttl);
        self.resolved = true;
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        if !self.resolved {
            debug!("fetch permit dropped without resolution, fallback to hit for pass");
            self.entry.hit_for_pass(0);
        }
    }
}
