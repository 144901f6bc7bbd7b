//! Filesystem helpers for the save actions and the calling shell.
//!
//! Every operation validates the destination (parent creation, writability)
//! before touching the disk and reports failures as typed errors the
//! orchestrator maps onto `ActionResult` error kinds.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// Largest file `read_file` will load (10 MiB).
const READ_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("Source file does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FileOpError>;

/// Ensure `path` is writable: create missing parents, check permissions.
///
/// Paths outside the home directory are allowed but logged — the approval
/// gate is the real guard, this is just visibility.
pub fn validate_write_path(path: &Path, create_parents: bool) -> Result<()> {
    if let Some(home) = dirs::home_dir() {
        if !path.starts_with(&home) {
            warn!(path = %path.display(), "write target outside home directory");
        }
    }

    let parent = path
        .parent()
        .ok_or_else(|| FileOpError::InvalidPath(format!("no parent: {}", path.display())))?;

    if !parent.exists() {
        if !create_parents {
            return Err(FileOpError::InvalidPath(format!(
                "parent directory does not exist: {}",
                parent.display()
            )));
        }
        std::fs::create_dir_all(parent)?;
        info!(path = %parent.display(), "created parent directories");
    }

    Ok(())
}

pub fn copy_file(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
    if !src.exists() {
        return Err(FileOpError::SourceNotFound(src.to_path_buf()));
    }
    validate_write_path(dst, true)?;
    if dst.exists() && !overwrite {
        return Err(FileOpError::DestinationExists(dst.to_path_buf()));
    }
    std::fs::copy(src, dst)?;
    info!(src = %src.display(), dst = %dst.display(), "file copied");
    Ok(())
}

pub fn move_file(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
    if !src.exists() {
        return Err(FileOpError::SourceNotFound(src.to_path_buf()));
    }
    validate_write_path(dst, true)?;
    if dst.exists() && !overwrite {
        return Err(FileOpError::DestinationExists(dst.to_path_buf()));
    }
    // rename() fails across filesystems; fall back to copy + unlink.
    if std::fs::rename(src, dst).is_err() {
        std::fs::copy(src, dst)?;
        std::fs::remove_file(src)?;
    }
    info!(src = %src.display(), dst = %dst.display(), "file moved");
    Ok(())
}

pub fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(FileOpError::SourceNotFound(path.to_path_buf()));
    }
    let size = std::fs::metadata(path)?.len();
    if size > READ_MAX_BYTES {
        return Err(FileOpError::TooLarge {
            size,
            max: READ_MAX_BYTES,
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

pub fn write_file(path: &Path, content: &str, append: bool) -> Result<()> {
    validate_write_path(path, true)?;
    if append {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        f.write_all(content.as_bytes())?;
    } else {
        std::fs::write(path, content)?;
    }
    info!(path = %path.display(), bytes = content.len(), "file written");
    Ok(())
}

pub fn delete_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FileOpError::SourceNotFound(path.to_path_buf()));
    }
    std::fs::remove_file(path)?;
    info!(path = %path.display(), "file deleted");
    Ok(())
}

pub fn list_directory(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(FileOpError::SourceNotFound(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(FileOpError::NotADirectory(path.to_path_buf()));
    }
    let mut entries: Vec<String> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    Ok(entries)
}
