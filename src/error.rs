use crate::store::StoreError;

/// Error type for summary persistence and protocol steps
#[derive(Debug)]
pub enum TopKError {
    /// Store command failed
    Store(StoreError),
    /// Persisted record could not be decoded
    Codec { key: String, reason: String },
    /// Lock on the given key could not be taken
    LockUnavailable(String),
    /// JSON payload could not be encoded or decoded
    Json(serde_json::Error),
}

impl TopKError {
    pub(crate) fn codec(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TopKError::Codec {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for TopKError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopKError::Store(e) => write!(f, "store error: {}", e),
            TopKError::Codec { key, reason } => {
                write!(f, "malformed record at '{}': {}", key, reason)
            }
            TopKError::LockUnavailable(key) => write!(f, "could not lock '{}'", key),
            TopKError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for TopKError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TopKError::Store(e) => Some(e),
            TopKError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TopKError {
    fn from(e: StoreError) -> Self {
        TopKError::Store(e)
    }
}

impl From<serde_json::Error> for TopKError {
    fn from(e: serde_json::Error) -> Self {
        TopKError::Json(e)
    }
}
