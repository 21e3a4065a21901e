//! Local store: where completed downloads live on disk.
//!
//! A url maps to `<root>/<last path segment>` with no persisted metadata, so a
//! file finished in an earlier run is found again from its url alone.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::engine::TransferId;
use crate::error::Result;
use crate::utils::{get_filename_from_url, part_path, sanitize_filename};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

/// A completed file found under the store root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, url: &str) -> Result<PathBuf> {
        let filename = get_filename_from_url(url)?;
        Ok(self.root.join(sanitize_filename(&filename)))
    }

    /// Partial file of one transfer of `url`.
    pub fn part_path_for(&self, url: &str, transfer: TransferId) -> Result<PathBuf> {
        let tag = transfer.simple().to_string();
        Ok(part_path(&self.path_for(url)?, &tag[..8]))
    }

    /// True when a regular file sits at `path_for(url)`. Unusable urls are
    /// never downloaded.
    pub fn exists(&self, url: &str) -> bool {
        match self.path_for(url) {
            Ok(path) => std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Completed files under the root, partial files excluded.
    pub async fn list(&self) -> std::io::Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".part") || name == ".DS_Store" {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            files.push(StoredFile {
                name,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Local>::from),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
