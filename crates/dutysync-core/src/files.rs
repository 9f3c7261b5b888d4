//! Pending-file discovery and the moves that follow a file's disposition.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Files admitted to this cycle, in processing order.
    pub admitted: Vec<PendingFile>,
    /// Files left for a later cycle because of the batch cap.
    pub deferred: usize,
}

/// What a cycle decided for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDisposition {
    /// Not yet decided; left untouched.
    Pending,
    /// Fully reconciled; moved to the processed directory when moves are enabled.
    Advanced,
    /// Kept in place for the next cycle.
    Retained,
    /// Retry ceiling reached; moved to the failed directory.
    Quarantined,
}

impl FileDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileDisposition::Pending => "pending",
            FileDisposition::Advanced => "advanced",
            FileDisposition::Retained => "retained",
            FileDisposition::Quarantined => "quarantined",
        }
    }
}

/// Lists `*.csv` files in `dir` sorted by file name and admits the first
/// `batch_size` of them.
pub fn discover(dir: &Path, batch_size: usize) -> Result<Discovery> {
    let pattern = format!("{}/*.csv", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut files: Vec<PendingFile> = Vec::new();
    for entry in glob::glob_with(&pattern, options)? {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                debug!(error = %err, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        files.push(PendingFile { path, name });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));

    let deferred = files.len().saturating_sub(batch_size);
    files.truncate(batch_size);

    info!(
        directory = %dir.display(),
        admitted = files.len(),
        deferred,
        "Discovered CSV files"
    );
    Ok(Discovery {
        admitted: files,
        deferred,
    })
}

/// Moves `path` into `dir`, creating it if needed. A name already taken in the
/// destination gets a `_YYYYMMDD_HHMMSS` suffix.
pub fn move_into(path: &Path, dir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut destination = dir.join(file_name);

    if destination.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = now.format("%Y%m%d_%H%M%S");
        let renamed = match path.extension() {
            Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}_{suffix}"),
        };
        destination = dir.join(renamed);
    }

    if fs::rename(path, &destination).is_err() {
        // Destination on another filesystem.
        fs::copy(path, &destination)?;
        fs::remove_file(path)?;
    }

    Ok(destination)
}
