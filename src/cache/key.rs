//! キャッシュキー
//!
//! デフォルトのキー形式 `METHOD host uri` を生成する。
//! キー形式は呼び出し側が自由に決めてよく、ディスパッチャは不透明なバイト列として扱う。

/// キャッシュ可能なHTTPメソッド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheableMethod {
    Get,
    Head,
}

impl CacheableMethod {
    /// バイト列からパース
    pub fn from_bytes(method: &[u8]) -> Option<Self> {
        if method.eq_ignore_ascii_case(b"GET") {
            Some(CacheableMethod::Get)
        } else if method.eq_ignore_ascii_case(b"HEAD") {
            Some(CacheableMethod::Head)
        } else {
            None
        }
    }

    /// 文字列として取得
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheableMethod::Get => "GET",
            CacheableMethod::Head => "HEAD",
        }
    }
}

/// リクエスト情報からキャッシュキーを生成
///
/// `uri` はパスとクエリを含んだリクエストURI。
/// GET/HEAD 以外はキャッシュ対象外として `None` を返す。
pub fn http_cache_key(method: &[u8], host: &str, uri: &str) -> Option<Vec<u8>> {
    let method = CacheableMethod::from_bytes(method)?;
    let method = method.as_str();

    let mut key = Vec::with_capacity(method.len() + host.len() + uri.len() + 2);
    key.extend_from_slice(method.as_bytes());
    key.push(b' ');
    key.extend_from_slice(host.as_bytes());
    key.push(b' ');
    key.extend_from_slice(uri.as_bytes());
    Some(key)
}
