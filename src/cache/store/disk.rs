//! ディスクストア
//!
//! キーごとに1ファイルで保存するファイルシステムベースのストア。
//! ファイル配置はキーの xxh3 ハッシュで2階層に分散させる。
//!
//! ```text
//! <base>/ab/cd/abcd0123456789ef.cache
//! ```
//!
//! ファイル形式（ビッグエンディアン）:
//!
//! | オフセット | 内容 |
//! |-----------|------|
//! | 0 | 期限（UNIX秒、0は無期限） u64 |
//! | 8 | キー長 u32 |
//! | 12 | キー |
//! | 12+キー長 | データ |

use super::Store;
use crate::cache::error::{CacheError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

const HEADER_LEN: usize = 12;
const EXTENSION: &str = "cache";

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// ディスクストア
pub struct DiskStore {
    /// ベースディレクトリ
    base_path: PathBuf,
    /// 一時ファイル名の連番
    sequence: AtomicU64,
}

impl DiskStore {
    /// ディスクストアを開く（ディレクトリがなければ作成）
    pub fn open<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            sequence: AtomicU64::new(0),
        })
    }

    /// ベースディレクトリ
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// キーからファイルパスを生成
    ///
    /// 再起動後も同じパスになるよう、シードなしのハッシュを使う。
    pub fn key_to_path(&self, key: &[u8]) -> PathBuf {
        let hash = xxh3_64(key);
        let dir1 = format!("{:02x}", (hash >> 56) as u8);
        let dir2 = format!("{:02x}", (hash >> 48) as u8);
        let filename = format!("{:016x}.{}", hash, EXTENSION);
        self.base_path.join(dir1).join(dir2).join(filename)
    }

    fn encode(key: &[u8], data: &[u8], expires_at: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + key.len() + data.len());
        buf.extend_from_slice(&expires_at.to_be_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(data);
        buf
    }

    /// ファイル内容を解析し、キーが一致すれば（期限, データ）を返す
    fn decode<'a>(key: &[u8], file: &'a [u8]) -> Option<(u64, &'a [u8])> {
        if file.len() < HEADER_LEN {
            return None;
        }
        let (expires, rest) = file.split_at(8);
        let (key_len, rest) = rest.split_at(4);
        let expires_at = u64::from_be_bytes(expires.try_into().ok()?);
        let key_len = u32::from_be_bytes(key_len.try_into().ok()?) as usize;
        if rest.len() < key_len {
            return None;
        }
        let (stored_key, data) = rest.split_at(key_len);
        // ハッシュ衝突対策
        if stored_key != key {
            return None;
        }
        Some((expires_at, data))
    }

    fn remove_file(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Store for DiskStore {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let path = self.key_to_path(key);
        let file = match std::fs::read(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let (expires_at, data) = Self::decode(key, &file).ok_or(CacheError::NotFound)?;
        if expires_at != 0 && expires_at <= unix_now() {
            Self::remove_file(&path)?;
            return Err(CacheError::NotFound);
        }
        Ok(data.to_vec())
    }

    fn set(&self, key: &[u8], data: &[u8], ttl: Duration) -> Result<()> {
        let path = self.key_to_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let expires_at = if ttl.is_zero() {
            0
        } else {
            unix_now().saturating_add(ttl.as_secs().max(1))
        };

        // 一時ファイルに書いてから rename する（読み込み側に途中の内容を見せない）
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        std::fs::write(&tmp, Self::encode(key, data, expires_at))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Self::remove_file(&self.key_to_path(key))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
