use thiserror::Error;

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Failure kinds of a transfer.
///
/// Only `InvalidUrl` ever crosses the manager's public boundary; everything
/// else is folded into a record's `Failed` status (or, for
/// `ResumeUnsupported`, into a restart).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The url does not parse or has no file name to store it under.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Network or HTTP error while transferring.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The server (or the local partial file) cannot continue a paused transfer.
    #[error("resume unsupported: {0}")]
    ResumeUnsupported(String),

    /// The completed content could not be written to the local store.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl DownloadError {
    pub fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::TransportFailure(reason.into())
    }

    pub fn resume_unsupported(reason: impl Into<String>) -> Self {
        Self::ResumeUnsupported(reason.into())
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::StorageFailure(reason.into())
    }

    pub fn is_resume_unsupported(&self) -> bool {
        matches!(self, Self::ResumeUnsupported(_))
    }
}
