use thiserror::Error;

use tgscan_core::ScannerState;

/// Errors reported by a [`RemoteClient`](crate::remote::RemoteClient)
/// implementation.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Connection reset, timeout, or similar transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote side demands a mandatory wait before further calls.
    #[error("flood wait of {seconds}s required")]
    FloodWait { seconds: u64 },

    /// The account may not read this group (private, banned, admin-only).
    #[error("access denied to group {group_id}: {reason}")]
    PermissionDenied { group_id: i64, reason: String },

    /// Session revoked or credentials invalid; needs re-authentication.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("remote error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("group cache not found at {path}")]
    NotFound { path: String },

    #[error("group cache at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("group cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("flood control: remote requires a {seconds}s wait")]
    FloodWait { seconds: u64 },

    #[error("rate limit exceeded: required wait {required_secs:.1}s exceeds max {max_wait_secs:.1}s")]
    RateLimitExceeded {
        required_secs: f64,
        max_wait_secs: f64,
    },

    #[error("permission denied for group {group_id}: {reason}")]
    PermissionDenied { group_id: i64, reason: String },

    #[error("fatal session error: {0}")]
    Fatal(String),

    #[error("invalid pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("remote error: {0}")]
    Remote(String),
}

impl ScanError {
    /// Errors worth retrying at the call site with a back-off delay.
    ///
    /// [`ScanError::RateLimitExceeded`] is retryable only at a higher level
    /// (the next scan cycle) and is deliberately excluded here.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ScanError::TransientNetwork(_) | ScanError::FloodWait { .. }
        )
    }

    /// Errors that must stop the whole run and move the scanner to `Error`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Fatal(_))
    }
}

impl From<RemoteError> for ScanError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => ScanError::TransientNetwork(msg),
            RemoteError::FloodWait { seconds } => ScanError::FloodWait { seconds },
            RemoteError::PermissionDenied { group_id, reason } => {
                ScanError::PermissionDenied { group_id, reason }
            }
            RemoteError::Unauthorized(msg) => ScanError::Fatal(msg),
            RemoteError::Other(msg) => ScanError::Remote(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("match sink is closed")]
    Closed,

    #[error("match sink rejected result: {0}")]
    Rejected(String),
}

/// Errors returned by the scanner control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot {operation} while scanner is {state}")]
    InvalidState {
        operation: &'static str,
        state: ScannerState,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),
}
