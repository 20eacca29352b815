use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    Encryption,

    #[error("AEAD decryption failed (malformed blob or authentication tag mismatch)")]
    Decryption,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Failures reported by a raw key/value backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("quota exceeded: {needed} bytes requested, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Write capacity exhausted or the device storage is unavailable.
    #[error("Storage quota exceeded or storage unavailable while writing \"{key}\": {source}")]
    QuotaExceeded {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("Quiz content parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Question {question}: {locale} lists {found} options, expected {expected}")]
    OptionCountMismatch {
        question: String,
        locale: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Quiz has no questions")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot determine data directory")]
    NoDataDir,

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported locale: {0}")]
pub struct ParseLocaleError(pub String);
