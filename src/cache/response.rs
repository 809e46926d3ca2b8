//! キャッシュされたレスポンス
//!
//! ステータスコード・ヘッダーと、最大3種類のボディ（raw / gzip / brotli）を保持します。
//! 圧縮可否の判定パラメータもペイロード自身が持つため、
//! ストアから復元した後でも単独で圧縮・解凍の判断ができます。

use super::compress::{Compressor, ENCODING_BROTLI, ENCODING_GZIP};
use super::error::{CacheError, Result};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// 保存前に取り除くヘッダー（転送ごとに変わるもの）
const IGNORED_HEADERS: [&[u8]; 4] = [
    b"content-encoding",
    b"content-length",
    b"connection",
    b"date",
];

/// デフォルトの圧縮対象 Content-Type
pub const DEFAULT_CONTENT_TYPE_FILTER: &str = "text|javascript|json|wasm|xml|font";

static DEFAULT_FILTER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(DEFAULT_CONTENT_TYPE_FILTER).ok());

/// ヘッダー（名前-値ペア）
pub type Header = (Box<[u8]>, Box<[u8]>);

/// キャッシュされたレスポンス
///
/// エントリに格納された後は `Arc` 越しに共有され、変更されない。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedPayload {
    /// レスポンスステータスコード
    pub status_code: u16,
    /// レスポンスヘッダー（転送系ヘッダーは除去済み）
    pub headers: Vec<Header>,
    /// 生データ（両方の圧縮データが揃うと破棄される）
    pub raw_body: Vec<u8>,
    /// gzip 圧縮データ
    pub gzip_body: Vec<u8>,
    /// brotli 圧縮データ
    pub br_body: Vec<u8>,
    /// 圧縮する最小サイズ（これ以下は圧縮しない）
    pub compress_min_length: usize,
    /// 圧縮対象の Content-Type（正規表現）。未設定ならデフォルト
    pub content_type_filter: Option<String>,
    #[serde(skip)]
    compiled_filter: OnceCell<Option<Regex>>,
}

/// Accept-Encoding に応じて選択されたボディ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse {
    pub status_code: u16,
    /// 保存されていたヘッダー + Content-Encoding + Content-Length
    pub headers: Vec<Header>,
    /// 選択されたエンコーディング（`None` は identity）
    pub encoding: Option<&'static str>,
    pub body: Vec<u8>,
}

/// ヘッダー名が保存対象外か
fn is_ignored_header(name: &[u8]) -> bool {
    IGNORED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Accept-Encoding が指定エンコーディングを受け入れるか
///
/// `q=0` で明示的に拒否されたものは受け入れない。
pub fn accepts_encoding(accept_encoding: &str, encoding: &str) -> bool {
    accept_encoding.split(',').any(|item| {
        let mut parts = item.split(';');
        let token = parts.next().unwrap_or("").trim();
        if !token.eq_ignore_ascii_case(encoding) {
            return false;
        }
        for param in parts {
            if let Some(q) = param.trim().strip_prefix("q=") {
                if let Ok(q) = q.trim().parse::<f32>() {
                    return q > 0.0;
                }
            }
        }
        true
    })
}

impl CachedPayload {
    /// 新しいペイロードを作成
    ///
    /// 転送系ヘッダー（Content-Length 等）は取り除かれる。
    pub fn new(status_code: u16, headers: Vec<Header>) -> Self {
        let headers = headers
            .into_iter()
            .filter(|(name, _)| !is_ignored_header(name))
            .collect();
        Self {
            status_code,
            headers,
            ..Default::default()
        }
    }

    /// 上流レスポンスからペイロードを作成
    ///
    /// gzip / br はそのまま対応するスロットへ、それ以外の対応エンコーディングは
    /// 解凍して生データとして保存する。
    pub fn from_upstream(
        status_code: u16,
        headers: Vec<Header>,
        content_encoding: &str,
        body: Vec<u8>,
        compressor: &Compressor,
    ) -> Result<Self> {
        let mut payload = Self::new(status_code, headers);
        let encoding = content_encoding.trim();
        if encoding.eq_ignore_ascii_case(ENCODING_GZIP) {
            payload.gzip_body = body;
        } else if encoding.eq_ignore_ascii_case(ENCODING_BROTLI) {
            payload.br_body = body;
        } else if encoding.is_empty() {
            payload.raw_body = body;
        } else {
            payload.raw_body = compressor.decompress(encoding, &body)?;
        }
        Ok(payload)
    }

    /// 生データを設定
    pub fn with_raw_body(mut self, body: Vec<u8>) -> Self {
        self.raw_body = body;
        self
    }

    /// gzip データを設定
    pub fn with_gzip_body(mut self, body: Vec<u8>) -> Self {
        self.gzip_body = body;
        self
    }

    /// brotli データを設定
    pub fn with_br_body(mut self, body: Vec<u8>) -> Self {
        self.br_body = body;
        self
    }

    /// 圧縮最小サイズを設定
    pub fn with_compress_min_length(mut self, min_length: usize) -> Self {
        self.compress_min_length = min_length;
        self
    }

    /// 圧縮対象 Content-Type を設定
    pub fn with_content_type_filter(mut self, pattern: Option<String>) -> Self {
        self.content_type_filter = pattern;
        self.compiled_filter = OnceCell::new();
        self
    }

    /// ヘッダー値を取得（名前は大文字小文字を区別しない）
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_ref())
    }

    /// 圧縮対象判定に使う正規表現
    ///
    /// 不正なパターンはデフォルトのフィルタで代替する。
    fn filter(&self) -> Option<&Regex> {
        let compiled = self.compiled_filter.get_or_init(|| {
            self.content_type_filter
                .as_deref()
                .filter(|p| !p.is_empty())
                .and_then(|p| Regex::new(p).ok())
        });
        compiled.as_ref().or(DEFAULT_FILTER.as_ref())
    }

    /// 圧縮すべきデータかどうか
    ///
    /// すべてのボディが最小サイズ以下なら圧縮しない。
    /// それ以外は Content-Type がフィルタに一致する場合のみ圧縮する。
    pub fn should_compress(&self) -> bool {
        let min = self.compress_min_length;
        if self.raw_body.len() <= min && self.gzip_body.len() <= min && self.br_body.len() <= min {
            return false;
        }
        let content_type = match self.header("content-type").map(std::str::from_utf8) {
            Some(Ok(ct)) => ct,
            _ => return false,
        };
        self.filter().map_or(false, |re| re.is_match(content_type))
    }

    /// 生データを取得
    ///
    /// 生データがなければ gzip、次に brotli から解凍する。
    pub fn raw(&self) -> Result<Cow<'_, [u8]>> {
        if !self.raw_body.is_empty() {
            return Ok(Cow::Borrowed(&self.raw_body));
        }
        if !self.gzip_body.is_empty() {
            return super::compress::gunzip(&self.gzip_body).map(Cow::Owned);
        }
        if !self.br_body.is_empty() {
            return super::compress::brotli_decode(&self.br_body).map(Cow::Owned);
        }
        Ok(Cow::Borrowed(&[]))
    }

    /// gzip と brotli のデータを生成する
    ///
    /// 両方揃っていれば何もしない。生成後は生データを破棄する
    /// （gzip から常に復元できるため）。
    pub fn compress(&mut self, compressor: &Compressor) -> Result<()> {
        if !self.should_compress() {
            return Ok(());
        }
        if !self.gzip_body.is_empty() && !self.br_body.is_empty() {
            return Ok(());
        }
        let raw = self.raw()?.into_owned();
        if raw.is_empty() {
            return Err(CacheError::BodyIsNil);
        }
        if self.gzip_body.is_empty() {
            self.gzip_body = compressor.gzip(&raw)?;
        }
        if self.br_body.is_empty() {
            self.br_body = compressor.brotli(&raw)?;
        }
        self.raw_body = Vec::new();
        Ok(())
    }

    /// Accept-Encoding に応じたボディを選択
    ///
    /// 保存済みの br → gzip の順に優先し、なければ生データから
    /// クライアントが受け入れるエンコーディングで都度圧縮する。
    /// 圧縮対象外のデータは圧縮しない。
    pub fn select_by_accept_encoding(
        &self,
        accept_encoding: &str,
        compressor: &Compressor,
    ) -> Result<(Option<&'static str>, Cow<'_, [u8]>)> {
        let accept_br = accepts_encoding(accept_encoding, ENCODING_BROTLI);
        if accept_br && !self.br_body.is_empty() {
            return Ok((Some(ENCODING_BROTLI), Cow::Borrowed(&self.br_body)));
        }
        let accept_gzip = accepts_encoding(accept_encoding, ENCODING_GZIP);
        if accept_gzip && !self.gzip_body.is_empty() {
            return Ok((Some(ENCODING_GZIP), Cow::Borrowed(&self.gzip_body)));
        }

        let raw = self.raw()?;
        if !self.should_compress() {
            return Ok((None, raw));
        }
        if accept_br {
            return Ok((Some(ENCODING_BROTLI), Cow::Owned(compressor.brotli(&raw)?)));
        }
        if accept_gzip {
            return Ok((Some(ENCODING_GZIP), Cow::Owned(compressor.gzip(&raw)?)));
        }
        Ok((None, raw))
    }

    /// HTTP層へ渡すレスポンスを組み立てる
    pub fn encoded_response(
        &self,
        accept_encoding: &str,
        compressor: &Compressor,
    ) -> Result<EncodedResponse> {
        let (encoding, body) = self.select_by_accept_encoding(accept_encoding, compressor)?;
        let body = body.into_owned();

        let mut headers = self.headers.clone();
        if let Some(enc) = encoding {
            headers.push((b"content-encoding".as_slice().into(), enc.as_bytes().into()));
        }
        headers.push((
            b"content-length".as_slice().into(),
            body.len().to_string().into_bytes().into(),
        ));

        Ok(EncodedResponse {
            status_code: self.status_code,
            headers,
            encoding,
            body,
        })
    }

    /// 概算メモリ使用量
    pub fn memory_usage(&self) -> usize {
        let mut size = std::mem::size_of::<Self>();
        for (name, value) in &self.headers {
            size += name.len() + value.len();
        }
        size += self.raw_body.len() + self.gzip_body.len() + self.br_body.len();
        if let Some(filter) = &self.content_type_filter {
            size += filter.len();
        }
        size
    }

    /// ストア保存用にシリアライズ
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    /// ストアのデータから復元
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (payload, _): (Self, usize) =
            bincode::serde::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| CacheError::Codec(e.to_string()))?;
        Ok(payload)
    }
}
