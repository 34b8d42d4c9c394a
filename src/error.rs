//! Error taxonomy for portal operations
//!
//! Internal steps return `PortalResult` and propagate with `?`. The public
//! operations of `PortalSessionClient` never return these: they degrade to
//! empty/zero/placeholder values, or to `LoginOutcome::Failure`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response shape: {0}")]
    ParseMiss(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortalError {
    /// Network, timeout, TLS or HTTP-status failures
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PortalError::Http(_) | PortalError::Io(_) | PortalError::Status { .. }
        )
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
