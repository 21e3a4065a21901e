use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{DownloadError, Result};

/// Last path segment of the url, percent-decoded (`My%20Song.m4a` -> `My Song.m4a`).
pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).map_err(|e| DownloadError::invalid_url(url_str, e.to_string()))?;

    if let Some(segments) = url.path_segments() {
        if let Some(segment) = segments.last() {
            let filename = percent_decode_str(segment).decode_utf8_lossy();
            if !matches!(filename.as_ref(), "" | "." | "..") {
                return Ok(filename.into_owned());
            }
        }
    }

    Err(DownloadError::invalid_url(url_str, "no file name in url path"))
}

/// Only characters that would split or truncate the path are replaced.
pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| matches!(c, '/' | '\\' | '\0'), "_")
}

/// `song.mp3` -> `song.mp3.<tag>.part`. Each transfer writes its own partial
/// file, so a canceled transfer still unwinding never touches its successor's.
pub fn part_path(filepath: &Path, tag: &str) -> PathBuf {
    let mut name = filepath.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.part", tag));
    filepath.with_file_name(name)
}
