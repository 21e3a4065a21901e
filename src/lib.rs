//! Download manager for catalog preview files.
//!
//! - [`manager`] - registry of concurrent, pausable, resumable transfers keyed by url
//! - [`engine`] - the transfer engine seam and its event/control plumbing
//! - [`downloader`] - HTTP engine with range-request resumption
//! - [`store`] - where finished files live and how a url maps to one
//! - [`config`] - runtime settings

pub mod config;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod manager;
pub mod state;
pub mod store;
mod utils;

pub use config::ManagerConfig;
pub use downloader::HttpDownloader;
pub use engine::{EngineEvent, EngineEventKind, EventSink, TransferEngine, TransferHandle, TransferId};
pub use error::{DownloadError, Result};
pub use manager::{DownloadManager, RecordChanged};
pub use state::{DownloadStatus, RecordSnapshot, ResumeState};
pub use store::{LocalStore, StoredFile};
