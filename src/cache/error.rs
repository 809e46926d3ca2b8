//! キャッシュエラー

use std::fmt;
use std::io;

/// キャッシュ層のエラー
///
/// 状態遷移そのものはエラーを返さない。
/// 圧縮・ストアI/O・設定などのデータパスのみがこの型を返す。
#[derive(Debug)]
pub enum CacheError {
    /// 圧縮しようとしたがボディが空（復元もできない）
    BodyIsNil,
    /// ストアにキーが存在しない
    NotFound,
    /// I/O エラー
    Io(io::Error),
    /// 圧縮・解凍の失敗
    Compression {
        encoding: &'static str,
        message: String,
    },
    /// 未対応の Content-Encoding
    UnsupportedEncoding(String),
    /// ストアURLを解決できない
    InvalidStoreUrl(String),
    /// ペイロードのシリアライズ/デシリアライズ失敗
    Codec(String),
    /// 設定エラー
    Config(String),
}

impl CacheError {
    /// ストアの NotFound かどうか
    ///
    /// NotFound はメモリ上のキャッシュミスと同じ扱いになる。
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub(crate) fn compression<S: Into<String>>(encoding: &'static str, msg: S) -> Self {
        Self::Compression {
            encoding,
            message: msg.into(),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyIsNil => write!(f, "body is nil"),
            Self::NotFound => write!(f, "not found"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Compression { encoding, message } => {
                write!(f, "{} codec error: {}", encoding, message)
            }
            Self::UnsupportedEncoding(enc) => write!(f, "unsupported encoding: {}", enc),
            Self::InvalidStoreUrl(url) => write!(f, "invalid store url: {}", url),
            Self::Codec(msg) => write!(f, "payload codec error: {}", msg),
            Self::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// キャッシュ層の Result
pub type Result<T> = std::result::Result<T, CacheError>;
