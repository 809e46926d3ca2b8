//! ロギング初期化
//!
//! ログ出力は ftlog を使用します。ftlog はバックグラウンドスレッドで
//! 書き込みを行うため、キャッシュのホットパスをブロックしません。
//!
//! 返される [`ftlog::LoggerGuard`] はプロセス終了まで保持してください。
//! ドロップ時に未出力のログがフラッシュされます。

use crate::cache::{CacheError, Result};

/// グローバルロガーを初期化
///
/// すでに初期化済みの場合はエラーを返す。
pub fn init() -> Result<ftlog::LoggerGuard> {
    ftlog::Builder::new()
        .try_init()
        .map_err(|e| CacheError::Config(format!("logger init error: {}", e)))
}
