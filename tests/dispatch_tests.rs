//! ディスパッチ統合テスト
//!
//! 複数スレッドからのリクエスト合流、期限切れ、レジストリのリロード、
//! ストアの読み込みスルーを検証します。

mod common;

use common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use veil_cache::cache::{
    http_cache_key, CacheStatus, DispatcherConfig, DispatcherRegistry, Lookup, RegistryConfig,
};

fn registry_with(name: &str, hit_for_pass: i64) -> DispatcherRegistry {
    let mut config = DispatcherConfig::new(name, 1024);
    config.hit_for_pass = hit_for_pass;
    DispatcherRegistry::new(&[config])
}

// ====================
// リクエスト合流
// ====================

#[test]
fn test_concurrent_miss_fetches_once() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let upstream = FakeUpstream::new(Duration::from_millis(50), 60);
    let key = http_cache_key(b"GET", "example.com", "/a").unwrap();

    let n = 16;
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let upstream = Arc::clone(&upstream);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                upstream.serve(&dispatcher, &key)
            })
        })
        .collect();

    let expected = text_body(4096);
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(expected.clone()));
    }
    assert_eq!(upstream.fetches(), 1);
    assert_eq!(dispatcher.get_http_cache(&key).status(), CacheStatus::Hit);
}

#[test]
fn test_concurrent_miss_hit_for_pass() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let upstream = FakeUpstream::new(Duration::from_millis(50), 0);
    let key = http_cache_key(b"GET", "example.com", "/private").unwrap();

    let entry = dispatcher.get_http_cache(&key);
    let fetcher = {
        let dispatcher = Arc::clone(&dispatcher);
        let upstream = Arc::clone(&upstream);
        let key = key.clone();
        thread::spawn(move || upstream.serve(&dispatcher, &key))
    };
    // フェッチ担当が確定するまで待つ
    while entry.status() != CacheStatus::Fetching {
        thread::yield_now();
    }

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let upstream = Arc::clone(&upstream);
            let key = key.clone();
            thread::spawn(move || upstream.serve(&dispatcher, &key))
        })
        .collect();

    assert!(fetcher.join().unwrap().is_some());
    for waiter in waiters {
        assert!(waiter.join().unwrap().is_none());
    }
    assert_eq!(upstream.fetches(), 1);
    assert!(matches!(dispatcher.lookup(&key), Lookup::HitForPass));
}

#[test]
fn test_dropped_permit_releases_waiters() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let key = b"GET example.com /panic";

    let permit = match dispatcher.lookup(key) {
        Lookup::Fetch(permit) => permit,
        other => panic!("unexpected {:?}", other),
    };
    let entry = Arc::clone(permit.entry());

    let waiter = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.get_http_cache(key).get().0)
    };
    wait_for_waiters(&entry, 1);

    // フェッチ処理が結果を登録せずに終了した
    drop(permit);
    assert_eq!(waiter.join().unwrap(), CacheStatus::HitForPass);
    assert_eq!(entry.status(), CacheStatus::HitForPass);
    assert!(matches!(dispatcher.lookup(key), Lookup::HitForPass));
}

// ====================
// 期限切れ
// ====================

#[test]
fn test_expired_entry_refetched_once() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let upstream = FakeUpstream::new(Duration::from_millis(0), 1);
    let key = b"GET example.com /short";

    upstream.serve(&dispatcher, key);
    upstream.serve(&dispatcher, key);
    assert_eq!(upstream.fetches(), 1);

    thread::sleep(Duration::from_millis(2100));

    let entry = dispatcher.get_http_cache(key);
    assert!(entry.is_expired());
    let (status, data) = entry.get();
    assert_eq!(status, CacheStatus::Fetching);
    assert!(data.is_none());
    entry.hit_for_pass(0);
    assert_eq!(entry.get().0, CacheStatus::HitForPass);
}

// ====================
// 例: GET example.com /a
// ====================

#[test]
fn test_example_flow() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let key = http_cache_key(b"GET", "example.com", "/a").unwrap();
    assert_eq!(key, b"GET example.com /a".to_vec());

    let entry = dispatcher.get_http_cache(&key);
    let (status, data) = entry.get();
    assert_eq!(status, CacheStatus::Fetching);
    assert!(data.is_none());

    let body = text_body(4096);
    let payload = dispatcher
        .payload_from_upstream(200, text_headers(), "", body.clone())
        .unwrap();
    entry.cacheable(payload, 60);

    let (status, data) = entry.get();
    assert_eq!(status, CacheStatus::Hit);
    let data = data.unwrap();
    assert!(data.raw_body.is_empty());
    assert!(!data.gzip_body.is_empty());
    assert!(!data.br_body.is_empty());

    let compressor = dispatcher.compressor();
    let response = data.encoded_response("gzip, br", compressor).unwrap();
    assert_eq!(response.encoding, Some("br"));
    assert_eq!(compressor.brotli_decode(&response.body).unwrap(), body);

    let response = data.encoded_response("gzip", compressor).unwrap();
    assert_eq!(response.encoding, Some("gzip"));
    assert_eq!(compressor.gunzip(&response.body).unwrap(), body);

    let response = data.encoded_response("", compressor).unwrap();
    assert_eq!(response.encoding, None);
    assert_eq!(response.body, body);
}

#[test]
fn test_head_and_get_are_separate() {
    let registry = registry_with("default", 30);
    let dispatcher = registry.get("default").unwrap();
    let get = http_cache_key(b"GET", "example.com", "/a").unwrap();
    let head = http_cache_key(b"HEAD", "example.com", "/a").unwrap();
    assert!(http_cache_key(b"POST", "example.com", "/a").is_none());

    assert!(!Arc::ptr_eq(
        &dispatcher.get_http_cache(&get),
        &dispatcher.get_http_cache(&head)
    ));
}

// ====================
// レジストリ
// ====================

#[test]
fn test_reset_preserves_warm_entries() {
    let registry = DispatcherRegistry::new(&[
        DispatcherConfig::new("api", 1024),
        DispatcherConfig::new("static", 1024),
    ]);
    let upstream = FakeUpstream::new(Duration::from_millis(0), 60);
    let key = b"GET example.com /warm";

    upstream.serve(&registry.get("api").unwrap(), key);
    registry.reset(&[
        DispatcherConfig::new("api", 1024),
        DispatcherConfig::new("images", 1024),
    ]);
    assert_eq!(registry.names(), vec!["api".to_string(), "images".to_string()]);

    // 維持されたキャッシュは再フェッチしない
    upstream.serve(&registry.get("api").unwrap(), key);
    assert_eq!(upstream.fetches(), 1);

    // 新しいキャッシュは空
    upstream.serve(&registry.get("images").unwrap(), key);
    assert_eq!(upstream.fetches(), 2);
}

#[test]
fn test_registry_from_toml() {
    let config = RegistryConfig::from_toml_str(
        r#"
        [[caches]]
        name = "api"
        size = 100
        hit_for_pass = 10
        store = "memory://"

        [[caches]]
        name = "static"
        "#,
    )
    .unwrap();
    let registry = DispatcherRegistry::from_config(&config);

    let api = registry.get("api").unwrap();
    assert_eq!(api.zone_size(), 8);
    assert_eq!(api.get_hit_for_pass(), 10);
    assert!(api.has_store());

    let static_cache = registry.get("static").unwrap();
    assert_eq!(static_cache.zone_size(), 128);
    assert_eq!(static_cache.get_hit_for_pass(), 300);
    assert!(!static_cache.has_store());
}

// ====================
// ストア
// ====================

#[test]
fn test_shared_memory_store_read_through() {
    let mut a = DispatcherConfig::new("a", 1024);
    a.store = Some("memory://".to_string());
    let mut b = DispatcherConfig::new("b", 1024);
    b.store = Some("memory://".to_string());
    let registry = DispatcherRegistry::new(&[a, b]);

    let upstream = FakeUpstream::new(Duration::from_millis(0), 60);
    let key = b"GET example.com /shared";
    upstream.serve(&registry.get("a").unwrap(), key);

    let (status, data) = registry.get("b").unwrap().get_http_cache(key).get();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(data.unwrap().raw().unwrap().into_owned(), text_body(4096));

    // 全キャッシュから削除するとストアからも消える
    registry.remove_http_cache(None, key);
    let (status, _) = registry.get("b").unwrap().get_http_cache(key).get();
    assert_eq!(status, CacheStatus::Fetching);
    registry.close().unwrap();
}

#[test]
fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DispatcherConfig::new("disk", 1024);
    config.store = Some(format!("file://{}", dir.path().display()));
    let key = b"GET example.com /persist";

    {
        let registry = DispatcherRegistry::new(&[config.clone()]);
        let upstream = FakeUpstream::new(Duration::from_millis(0), 60);
        upstream.serve(&registry.get("disk").unwrap(), key);
        registry.close().unwrap();
    }

    let registry = DispatcherRegistry::new(&[config]);
    let entry = registry.get("disk").unwrap().get_http_cache(key);
    let (status, data) = entry.get();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(data.unwrap().raw().unwrap().into_owned(), text_body(4096));
    assert!(entry.expired_at() > 0);
}
