//! ディスパッチャレジストリ
//!
//! 名前付きディスパッチャの集合を管理します。設定のリロード時は
//! [`DispatcherRegistry::reset`] で差分を適用し、既存のディスパッチャ
//! （とそのウォームなエントリ）を維持します。

use super::config::{DispatcherConfig, RegistryConfig};
use super::dispatcher::Dispatcher;
use super::error::Result;
use super::store::StoreTable;
use ftlog::{debug, error, info};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 名前付きディスパッチャのレジストリ
pub struct DispatcherRegistry {
    dispatchers: RwLock<HashMap<String, Arc<Dispatcher>>>,
    /// 同じURLのストアはディスパッチャ間で共有する
    stores: StoreTable,
}

impl DispatcherRegistry {
    /// 設定一覧からレジストリを作成
    pub fn new(configs: &[DispatcherConfig]) -> Self {
        let registry = Self {
            dispatchers: RwLock::new(HashMap::new()),
            stores: StoreTable::new(),
        };
        registry.reset(configs);
        registry
    }

    /// [`RegistryConfig`] から作成
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(&config.caches)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Dispatcher>>> {
        self.dispatchers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Dispatcher>>> {
        self.dispatchers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, config: &DispatcherConfig) -> Dispatcher {
        let store = config.store.as_deref().filter(|url| !url.is_empty()).and_then(|url| {
            match self.stores.open(url) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!("new store fail, cache: {}, url: {}, error: {}", config.name, url, e);
                    None
                }
            }
        });
        Dispatcher::with_store(config.clone(), store)
    }

    /// 設定を適用
    ///
    /// - 既存の名前は同じディスパッチャを設定ごと維持する
    ///   （設定を変えたい場合は一度名前を外してから追加し直す）
    /// - 新しい名前はディスパッチャを作成する
    /// - 設定から消えた名前は削除する
    ///
    /// 置き換えは書き込みロック下で行われ、読み取り側が中間状態を見ることはない。
    pub fn reset(&self, configs: &[DispatcherConfig]) {
        let mut kept = Vec::new();
        let mut added = Vec::new();

        let mut dispatchers = self.write();
        let mut next = HashMap::with_capacity(configs.len());
        for config in configs {
            let dispatcher = match dispatchers.remove(&config.name) {
                Some(existing) => {
                    kept.push(config.name.as_str());
                    existing
                }
                None => {
                    added.push(config.name.as_str());
                    Arc::new(self.build(config))
                }
            };
            next.insert(config.name.clone(), dispatcher);
        }
        let removed: Vec<String> = dispatchers.drain().map(|(name, _)| name).collect();
        *dispatchers = next;
        drop(dispatchers);

        info!(
            "reset http cache dispatchers, kept: {:?}, added: {:?}, removed: {:?}",
            kept, added, removed
        );
    }

    /// 名前でディスパッチャを取得
    pub fn get(&self, name: &str) -> Option<Arc<Dispatcher>> {
        self.read().get(name).cloned()
    }

    /// 登録済みの名前一覧（ソート済み）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// HTTPキャッシュを削除
    ///
    /// `name` が `None` の場合はすべてのディスパッチャから削除する。
    /// 存在しないディスパッチャ名なら `false` を返す。
    pub fn remove_http_cache(&self, name: Option<&str>, key: &[u8]) -> bool {
        match name {
            Some(name) => match self.get(name) {
                Some(dispatcher) => {
                    dispatcher.remove_http_cache(key);
                    true
                }
                None => false,
            },
            None => {
                let dispatchers: Vec<Arc<Dispatcher>> = self.read().values().cloned().collect();
                for dispatcher in dispatchers {
                    dispatcher.remove_http_cache(key);
                }
                true
            }
        }
    }

    /// 全ディスパッチャの期限切れエントリを削除
    pub fn remove_expired(&self) -> usize {
        let dispatchers: Vec<Arc<Dispatcher>> = self.read().values().cloned().collect();
        dispatchers.iter().map(|d| d.remove_expired()).sum()
    }

    /// 共有ストアを閉じる
    pub fn close(&self) -> Result<()> {
        self.stores.close_all()
    }
}

/// 期限切れエントリを定期的に削除するバックグラウンドスレッド
///
/// ドロップ時に停止する。レジストリが破棄された場合も停止する。
pub struct ExpiredSweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiredSweeper {
    pub fn spawn(registry: &Arc<DispatcherRegistry>, interval: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let registry: Weak<DispatcherRegistry> = Arc::downgrade(registry);
        let handle = thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let removed = registry.remove_expired();
                if removed > 0 {
                    debug!("removed {} expired cache entries", removed);
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// 停止してスレッドの終了を待つ
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Sender を落とせばスレッドは Disconnected で抜ける
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ExpiredSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
