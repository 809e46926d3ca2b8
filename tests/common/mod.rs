//! テスト共通ユーティリティ

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veil_cache::cache::{Dispatcher, Header, HttpCacheEntry, Lookup};

/// 圧縮対象になる大きさのテキスト
pub fn text_body(len: usize) -> Vec<u8> {
    b"veil cache body. ".iter().copied().cycle().take(len).collect()
}

pub fn header(name: &str, value: &str) -> Header {
    (name.as_bytes().into(), value.as_bytes().into())
}

pub fn text_headers() -> Vec<Header> {
    vec![header("content-type", "text/html; charset=utf-8")]
}

/// 待機者が `n` 人になるまで待つ
pub fn wait_for_waiters(entry: &HttpCacheEntry, n: usize) {
    for _ in 0..500 {
        if entry.waiters() >= n {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("waiters did not reach {}", n);
}

/// 上流フェッチを模倣するクライアント
///
/// `Fetch` を受け取った場合のみ上流カウンタを増やす。
pub struct FakeUpstream {
    pub fetches: AtomicUsize,
    pub delay: Duration,
    pub cacheable_ttl: i64,
}

impl FakeUpstream {
    pub fn new(delay: Duration, cacheable_ttl: i64) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            delay,
            cacheable_ttl,
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// ディスパッチャ経由でリクエストを処理し、応答ボディを返す（パス時は `None`）
    pub fn serve(&self, dispatcher: &Dispatcher, key: &[u8]) -> Option<Vec<u8>> {
        match dispatcher.lookup(key) {
            Lookup::Hit(payload) => Some(payload.raw().ok()?.into_owned()),
            Lookup::HitForPass => None,
            Lookup::Fetch(permit) => {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                thread::sleep(self.delay);
                let body = text_body(4096);
                if self.cacheable_ttl > 0 {
                    let payload = dispatcher
                        .payload_from_upstream(200, text_headers(), "", body.clone())
                        .ok()?;
                    permit.cacheable(payload, self.cacheable_ttl);
                } else {
                    permit.hit_for_pass(0);
                }
                Some(body)
            }
        }
    }
}
