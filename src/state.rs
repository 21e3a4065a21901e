use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::engine::{TransferHandle, TransferId};
use crate::error::{DownloadError, Result};

/// Lifecycle of one url's download.
///
/// A cancel removes the record, so callers observe it as an untracked url
/// rather than as `Canceled`. `Idle` is only held between a reset and the
/// engine launch that follows it. Both still count as states a new cycle may
/// start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Idle,
    Downloading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl DownloadStatus {
    /// Downloading or Paused.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Downloading | Self::Paused)
    }

    /// A new cycle may begin from this status.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// In-memory state of one url's download, owned by the manager task.
///
/// `engine` is `Some` exactly while `status == Downloading` and
/// `resume_data` is `Some` only while `status == Paused`.
#[derive(Debug)]
pub struct TransferRecord {
    pub url: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub resume_data: Option<Bytes>,
    pub engine: Option<TransferHandle>,
    pub failure: Option<String>,
    pub local_path: Option<PathBuf>,
    pub pause_requested: bool,
    pub updated_at: DateTime<Local>,
}

impl TransferRecord {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status: DownloadStatus::Idle,
            progress: 0.0,
            resume_data: None,
            engine: None,
            failure: None,
            local_path: None,
            pause_requested: false,
            updated_at: Local::now(),
        }
    }

    pub fn transfer_id(&self) -> Option<TransferId> {
        self.engine.as_ref().map(|h| h.id())
    }

    /// Clear everything a previous cycle left behind.
    pub fn reset(&mut self) {
        self.status = DownloadStatus::Idle;
        self.progress = 0.0;
        self.resume_data = None;
        self.engine = None;
        self.failure = None;
        self.local_path = None;
        self.pause_requested = false;
    }

    pub fn touch(&mut self) {
        self.updated_at = Local::now();
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            url: self.url.clone(),
            status: self.status,
            progress: self.progress,
            resume_data: self.resume_data.clone(),
            failure: self.failure.clone(),
            local_path: self.local_path.clone(),
            pause_requested: self.pause_requested,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only copy of a record handed out to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub url: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub resume_data: Option<Bytes>,
    pub failure: Option<String>,
    pub local_path: Option<PathBuf>,
    pub pause_requested: bool,
    pub updated_at: DateTime<Local>,
}

/// What the HTTP engine needs to continue a paused transfer. Travels through
/// the manager as opaque resume bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub url: String,
    pub part_path: PathBuf,
    pub received: u64,
    pub total: Option<u64>,
    /// `ETag` or `Last-Modified` of the first response, sent back as `If-Range`.
    pub validator: Option<String>,
}

impl ResumeState {
    pub fn encode(&self) -> Bytes {
        serde_json::to_vec(self).map(Bytes::from).unwrap_or_default()
    }

    /// Decode resume bytes without checking who they belong to.
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| DownloadError::resume_unsupported(format!("unreadable resume data: {}", e)))
    }

    /// Decode resume bytes captured from a transfer of `url`. Whether the
    /// partial file still holds `received` bytes is checked by the transfer
    /// itself, off the caller's task.
    pub fn decode(data: &[u8], url: &str) -> Result<Self> {
        let state = Self::parse(data)?;
        if state.url != url {
            return Err(DownloadError::resume_unsupported(format!(
                "resume data belongs to {}",
                state.url
            )));
        }
        Ok(state)
    }
}
