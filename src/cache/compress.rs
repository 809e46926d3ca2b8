//! 圧縮サービス
//!
//! キャッシュペイロードの gzip / brotli 圧縮と解凍を提供します。
//! 上流の zstd / lz4 / snappy レスポンスは解凍のみ対応します。
//! 圧縮レベルは実行時に変更できます。

use super::error::{CacheError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const ENCODING_GZIP: &str = "gzip";
pub const ENCODING_BROTLI: &str = "br";
pub const ENCODING_ZSTD: &str = "zstd";
pub const ENCODING_LZ4: &str = "lz4";
pub const ENCODING_SNAPPY: &str = "snz";

/// gzip のデフォルト圧縮レベル
pub const DEFAULT_GZIP_LEVEL: u32 = 6;
/// brotli のデフォルト圧縮レベル（quality）
pub const DEFAULT_BROTLI_LEVEL: u32 = 6;

const MAX_GZIP_LEVEL: u32 = 9;
const MAX_BROTLI_LEVEL: u32 = 11;

static DEFAULT_COMPRESSOR: Lazy<Arc<Compressor>> = Lazy::new(|| Arc::new(Compressor::default()));

/// gzip 圧縮
pub fn gzip(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let level = Compression::new(level.min(MAX_GZIP_LEVEL));
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder
        .write_all(data)
        .map_err(|e| CacheError::compression(ENCODING_GZIP, e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CacheError::compression(ENCODING_GZIP, e.to_string()))
}

/// gzip 解凍
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::compression(ENCODING_GZIP, e.to_string()))?;
    Ok(out)
}

/// brotli 圧縮
pub fn brotli(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut compressed = Vec::with_capacity(data.len() / 2);
    let params = brotli::enc::BrotliEncoderParams {
        quality: level.min(MAX_BROTLI_LEVEL) as i32,
        ..Default::default()
    };
    let mut input = Cursor::new(data);
    brotli::BrotliCompress(&mut input, &mut compressed, &params)
        .map_err(|e| CacheError::compression(ENCODING_BROTLI, e.to_string()))?;
    Ok(compressed)
}

/// brotli 解凍
pub fn brotli_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut input = Cursor::new(data);
    brotli::BrotliDecompress(&mut input, &mut out)
        .map_err(|e| CacheError::compression(ENCODING_BROTLI, e.to_string()))?;
    Ok(out)
}

/// zstd 解凍（上流の zstd レスポンスを生データに戻す）
pub fn zstd_decode(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(Cursor::new(data))
        .map_err(|e| CacheError::compression(ENCODING_ZSTD, e.to_string()))
}

/// lz4 解凍（フレーム形式）
pub fn lz4_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::compression(ENCODING_LZ4, e.to_string()))?;
    Ok(out)
}

/// snappy 解凍（ブロック形式）
pub fn snappy_decode(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| CacheError::compression(ENCODING_SNAPPY, e.to_string()))
}

/// 圧縮サービス
///
/// gzip と brotli の圧縮レベルを保持する。
/// レベルはアトミックに更新でき、進行中の圧縮には影響しない。
#[derive(Debug)]
pub struct Compressor {
    gzip_level: AtomicU32,
    brotli_level: AtomicU32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_GZIP_LEVEL, DEFAULT_BROTLI_LEVEL)
    }
}

impl Compressor {
    /// 新しい圧縮サービスを作成
    pub fn new(gzip_level: u32, brotli_level: u32) -> Self {
        Self {
            gzip_level: AtomicU32::new(gzip_level.min(MAX_GZIP_LEVEL)),
            brotli_level: AtomicU32::new(brotli_level.min(MAX_BROTLI_LEVEL)),
        }
    }

    /// プロセス共有のデフォルト圧縮サービス
    pub fn shared_default() -> Arc<Compressor> {
        Arc::clone(&DEFAULT_COMPRESSOR)
    }

    /// 圧縮レベルを更新
    pub fn set_levels(&self, gzip_level: u32, brotli_level: u32) {
        self.gzip_level
            .store(gzip_level.min(MAX_GZIP_LEVEL), Ordering::Relaxed);
        self.brotli_level
            .store(brotli_level.min(MAX_BROTLI_LEVEL), Ordering::Relaxed);
    }

    #[inline]
    pub fn gzip_level(&self) -> u32 {
        self.gzip_level.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn brotli_level(&self) -> u32 {
        self.brotli_level.load(Ordering::Relaxed)
    }

    pub fn gzip(&self, data: &[u8]) -> Result<Vec<u8>> {
        gzip(data, self.gzip_level())
    }

    pub fn gunzip(&self, data: &[u8]) -> Result<Vec<u8>> {
        gunzip(data)
    }

    pub fn brotli(&self, data: &[u8]) -> Result<Vec<u8>> {
        brotli(data, self.brotli_level())
    }

    pub fn brotli_decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        brotli_decode(data)
    }

    /// Content-Encoding に従って解凍
    ///
    /// 空文字列（identity）はそのまま返す。
    pub fn decompress(&self, encoding: &str, data: &[u8]) -> Result<Vec<u8>> {
        let encoding = encoding.trim();
        if encoding.is_empty() || encoding.eq_ignore_ascii_case("identity") {
            return Ok(data.to_vec());
        }
        if encoding.eq_ignore_ascii_case(ENCODING_GZIP) {
            gunzip(data)
        } else if encoding.eq_ignore_ascii_case(ENCODING_BROTLI) {
            brotli_decode(data)
        } else if encoding.eq_ignore_ascii_case(ENCODING_ZSTD) || encoding.eq_ignore_ascii_case("zst") {
            zstd_decode(data)
        } else if encoding.eq_ignore_ascii_case(ENCODING_LZ4) {
            lz4_decode(data)
        } else if encoding.eq_ignore_ascii_case(ENCODING_SNAPPY) {
            snappy_decode(data)
        } else {
            Err(CacheError::UnsupportedEncoding(encoding.to_string()))
        }
    }
}
