use thiserror::Error;

use crate::manager::Phase;

/// Result type alias for offline cache operations
pub type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Install of {generation} failed: {reason}")]
    InstallFailed { generation: String, reason: String },

    #[error("Activate failed - could not delete: {}", .generations.join(", "))]
    ActivateFailed { generations: Vec<String> },

    #[error("Cannot {operation} while {phase}")]
    Lifecycle {
        operation: &'static str,
        phase: Phase,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

impl OfflineError {
    /// Truncate a body preview so failed installs don't log whole assets
    pub(crate) fn truncate_body(body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        if text.len() <= MAX_ERROR_BODY_LENGTH {
            text.into_owned()
        } else {
            let cut: String = text.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, body.len())
        }
    }

    /// True when the failure came from the wire rather than the cache store.
    pub fn is_network(&self) -> bool {
        matches!(self, OfflineError::Network(_) | OfflineError::Http(_))
    }
}
