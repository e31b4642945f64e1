//! Low-level FS primitives (spec §4.2).
//!
//! Thin wrappers over directory/file syscalls that translate OS errors into
//! the closed taxonomy and enforce platform path-length limits before the
//! syscall runs, so a too-long path never causes a partial operation.

use crate::error::{Result, StorageError, io_to_storage_error};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Conservative path-length ceiling checked before any syscall that would
/// otherwise fail midway through a multi-step operation (e.g. rename).
const MAX_PATH_LEN: usize = 4096;
const MAX_NAME_LEN: usize = 255;

fn check_path_len(path: &Path) -> Result<()> {
    let s = path.as_os_str().len();
    if s > MAX_PATH_LEN {
        return Err(StorageError::NameTooLong(path.display().to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_NAME_LEN {
            return Err(StorageError::NameTooLong(path.display().to_string()));
        }
    }
    Ok(())
}

/// Create parent directories for `path` (not `path` itself).
pub async fn create_parents(path: &Path) -> Result<()> {
    check_path_len(path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(io_to_storage_error)?;
    }
    Ok(())
}

pub async fn create_dir_all(path: &Path) -> Result<()> {
    check_path_len(path)?;
    fs::create_dir_all(path).await.map_err(io_to_storage_error)
}

/// Create a fresh directory, failing with `Exists` if it's already there.
pub async fn create_dir(path: &Path) -> Result<()> {
    check_path_len(path)?;
    fs::create_dir(path).await.map_err(io_to_storage_error)
}

/// Write `data` to `path` via a user-sized buffer, truncating any existing
/// contents, and return the number of bytes actually transferred.
pub async fn create_file(path: &Path, data: &[u8]) -> Result<u64> {
    check_path_len(path)?;
    let mut file = fs::File::create(path).await.map_err(io_to_storage_error)?;
    file.write_all(data).await.map_err(io_to_storage_error)?;
    file.flush().await.map_err(io_to_storage_error)?;
    Ok(data.len() as u64)
}

pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).await.map_err(io_to_storage_error)
}

/// Read at most `max_len` bytes, rejecting files larger than the policy
/// maximum (spec §4.5).
pub async fn read_file_capped(path: &Path, max_len: u64) -> Result<Vec<u8>> {
    let meta = fs::metadata(path).await.map_err(io_to_storage_error)?;
    if meta.len() > max_len {
        return Err(StorageError::Unexpected(format!(
            "{}: file exceeds policy maximum of {} bytes",
            path.display(),
            max_len
        )));
    }
    read_file(path).await
}

/// Rename requires the destination's parent to exist; it is the atomicity
/// primitive for puts (spec §4.6 step 8).
pub async fn rename_file(from: &Path, to: &Path) -> Result<()> {
    check_path_len(to)?;
    fs::rename(from, to).await.map_err(io_to_storage_error)
}

pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_to_storage_error(e)),
    }
}

/// Delete a file, then prune now-empty ancestor directories upward, never
/// removing `stop_at` itself (spec §4.2).
pub async fn delete_file_prune(path: &Path, stop_at: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_to_storage_error(e)),
    }
    prune_ancestors(path, stop_at).await
}

/// Delete a directory object (an empty directory standing in for a
/// zero-byte key ending in `/`), then prune upward the same way.
pub async fn delete_dir_prune(path: &Path, stop_at: &Path) -> Result<()> {
    match fs::remove_dir(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_to_storage_error(e)),
    }
    prune_ancestors(path, stop_at).await
}

async fn prune_ancestors(path: &Path, stop_at: &Path) -> Result<()> {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        match fs::remove_dir(d).await {
            Ok(()) => dir = d.parent(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => dir = d.parent(),
            Err(_) => break, // not empty, or other error: stop pruning silently
        }
    }
    Ok(())
}

pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_to_storage_error(e)),
    }
}

pub async fn remove_dir(path: &Path) -> Result<()> {
    fs::remove_dir(path).await.map_err(io_to_storage_error)
}

pub async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

pub async fn stat(path: &Path) -> Result<std::fs::Metadata> {
    fs::metadata(path).await.map_err(io_to_storage_error)
}

/// Copy exactly `length` bytes from `reader` (positioned at an offset by
/// the caller) into `writer`, in chunks of `buf_size`.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, length: u64, buf_size: usize) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut remaining = length;
    let mut buf = vec![0u8; buf_size.max(1)];
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = reader
            .read(&mut buf[..to_read])
            .await
            .map_err(io_to_storage_error)?;
        if n == 0 {
            return Err(StorageError::Unexpected(
                "unexpected EOF while copying object bytes".into(),
            ));
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(io_to_storage_error)?;
        remaining -= n as u64;
    }
    Ok(())
}
