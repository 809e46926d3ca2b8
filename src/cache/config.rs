//! キャッシュ設定

use super::compress::{DEFAULT_BROTLI_LEVEL, DEFAULT_GZIP_LEVEL};
use super::entry::DEFAULT_HIT_FOR_PASS_TTL;
use super::error::{CacheError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// hit-for-pass TTLの上限（秒）
pub const MAX_HIT_FOR_PASS_TTL: i64 = 3600;

/// デフォルト値関数
fn default_gzip_level() -> u32 { DEFAULT_GZIP_LEVEL }
fn default_brotli_level() -> u32 { DEFAULT_BROTLI_LEVEL }
fn default_min_length() -> usize { 1024 } // 1KB

/// 圧縮設定
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompressConfig {
    /// gzip 圧縮レベル（0-9）
    ///
    /// デフォルト: 6
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,

    /// brotli 圧縮レベル（0-11）
    ///
    /// デフォルト: 6
    #[serde(default = "default_brotli_level")]
    pub brotli_level: u32,

    /// 圧縮する最小サイズ（バイト）
    ///
    /// デフォルト: 1KB
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// 圧縮対象の Content-Type（正規表現）
    ///
    /// 未設定の場合は text / javascript / json / wasm / xml / font
    #[serde(default)]
    pub content_type_filter: Option<String>,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            gzip_level: default_gzip_level(),
            brotli_level: default_brotli_level(),
            min_length: default_min_length(),
            content_type_filter: None,
        }
    }
}

/// ディスパッチャ設定
///
/// ```toml
/// [[caches]]
/// name = "default"
/// size = 10240
/// hit_for_pass = 300
/// store = "file:///var/cache/veil"
///
/// [caches.compress]
/// min_length = 1024
/// ```
#[derive(Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DispatcherConfig {
    /// キャッシュ名
    pub name: String,

    /// LRUの総エントリ数
    ///
    /// 0 の場合は 128 * 100
    #[serde(default)]
    pub size: usize,

    /// hit-for-pass のデフォルトTTL（秒）
    ///
    /// 0 の場合は 300 秒
    #[serde(default)]
    pub hit_for_pass: i64,

    /// 永続化ストアのURL
    ///
    /// 未設定の場合はメモリのみ
    #[serde(default)]
    pub store: Option<String>,

    /// 圧縮設定
    #[serde(default)]
    pub compress: CompressConfig,
}

impl DispatcherConfig {
    /// 名前とサイズだけを指定して作成
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            ..Default::default()
        }
    }

    /// 実際に使う hit-for-pass TTL
    pub fn effective_hit_for_pass(&self) -> i64 {
        if self.hit_for_pass > 0 {
            self.hit_for_pass
        } else {
            DEFAULT_HIT_FOR_PASS_TTL
        }
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::Config("cache name must not be empty".into()));
        }
        if !(0..=MAX_HIT_FOR_PASS_TTL).contains(&self.hit_for_pass) {
            return Err(CacheError::Config(format!(
                "{}: hit_for_pass must be within 0..={}, got {}",
                self.name, MAX_HIT_FOR_PASS_TTL, self.hit_for_pass
            )));
        }
        if let Some(pattern) = &self.compress.content_type_filter {
            Regex::new(pattern).map_err(|e| {
                CacheError::Config(format!("{}: invalid content_type_filter: {}", self.name, e))
            })?;
        }
        Ok(())
    }
}

/// レジストリ設定（`[[caches]]` の一覧）
#[derive(Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub caches: Vec<DispatcherConfig>,
}

impl RegistryConfig {
    /// TOML文字列から読み込む
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| CacheError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// TOMLファイルから読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// 設定値を検証（名前の重複を含む）
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for cache in &self.caches {
            cache.validate()?;
            if !names.insert(cache.name.as_str()) {
                return Err(CacheError::Config(format!("duplicate cache name: {}", cache.name)));
            }
        }
        Ok(())
    }
}
