//! Metadata Codec (spec §4.5).
//!
//! Reads/writes the per-object sidecar `fs.json` and the per-disk
//! `format.json`. Unknown top-level fields round-trip unchanged so a newer
//! writer's fields survive an older reader (forward-compatibility).

use crate::error::{Result, StorageError};
use crate::lockpool::{ExclusiveGuard, SharedGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

/// Sidecar metadata is small; reject anything past this to bound reader
/// memory (spec §4.5: "size bounded by a policy maximum").
pub const MAX_SIDECAR_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsMeta {
    pub version: String,
    pub format: String,
    pub meta: BTreeMap<String, String>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl FsMeta {
    pub fn new(meta: BTreeMap<String, String>) -> Self {
        Self {
            version: "1.0.0".to_string(),
            format: "fs".to_string(),
            meta,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatFs {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub version: String,
    pub format: String,
    pub fs: FormatFs,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl FormatDescriptor {
    pub fn current() -> Self {
        Self {
            version: "1".to_string(),
            format: "fs".to_string(),
            fs: FormatFs {
                version: "1".to_string(),
            },
            unknown: BTreeMap::new(),
        }
    }
}

/// Read the full sidecar file through a held shared or exclusive lock.
fn read_locked(mut file: &std::fs::File) -> Result<Vec<u8>> {
    let size = file
        .metadata()
        .map_err(|e| StorageError::Io(e.to_string()))?
        .len();
    if size > MAX_SIDECAR_BYTES {
        return Err(StorageError::Unexpected(format!(
            "sidecar exceeds policy maximum of {MAX_SIDECAR_BYTES} bytes"
        )));
    }
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StorageError::Io(e.to_string()))?;
    let mut buf = Vec::with_capacity(size as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(buf)
}

/// Serialize `value`, truncate the locked file, and write in one pass —
/// readers never observe a partial document (spec §3 invariant).
fn write_locked(mut file: &std::fs::File, bytes: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StorageError::Io(e.to_string()))?;
    file.set_len(0).map_err(|e| StorageError::Io(e.to_string()))?;
    file.write_all(bytes)
        .map_err(|e| StorageError::Io(e.to_string()))?;
    file.flush().map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(())
}

pub fn read_fs_meta(guard: &SharedGuard) -> Result<Option<FsMeta>> {
    let bytes = read_locked(&guard.file)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Unexpected(format!("corrupt fs.json: {e}")))
}

pub fn read_fs_meta_exclusive(guard: &ExclusiveGuard) -> Result<Option<FsMeta>> {
    let bytes = read_locked(&guard.file)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Unexpected(format!("corrupt fs.json: {e}")))
}

pub fn write_fs_meta(guard: &ExclusiveGuard, meta: &FsMeta) -> Result<()> {
    let bytes = serde_json::to_vec(meta)
        .map_err(|e| StorageError::Unexpected(format!("failed to encode fs.json: {e}")))?;
    write_locked(&guard.file, &bytes)
}

pub fn read_format(path: &std::path::Path) -> Result<FormatDescriptor> {
    let bytes = std::fs::read(path).map_err(crate::error::io_to_storage_error)?;
    let parsed: FormatDescriptor = serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::UnformattedDisk(format!("corrupt format.json: {e}")))?;
    if parsed.format != "fs" {
        return Err(StorageError::UnformattedDisk(format!(
            "unsupported format {:?}",
            parsed.format
        )));
    }
    Ok(parsed)
}

pub fn write_format(path: &std::path::Path, descriptor: &FormatDescriptor) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(descriptor)
        .map_err(|e| StorageError::Unexpected(format!("failed to encode format.json: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(crate::error::io_to_storage_error)?;
    }
    std::fs::write(path, bytes).map_err(crate::error::io_to_storage_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockpool::LockPool;
    use tempfile::tempdir;

    #[test]
    fn fs_meta_roundtrip_through_exclusive_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        let pool = LockPool::new();
        let guard = pool.create(&path).unwrap();
        let mut m = BTreeMap::new();
        m.insert("md5Sum".to_string(), "abc123".to_string());
        let meta = FsMeta::new(m);
        write_fs_meta(&guard, &meta).unwrap();
        let read_back = read_fs_meta_exclusive(&guard).unwrap().unwrap();
        assert_eq!(read_back.meta.get("md5Sum").unwrap(), "abc123");
    }

    #[test]
    fn unknown_fields_round_trip() {
        let json = r#"{"version":"1.0.0","format":"fs","meta":{},"futureField":"x"}"#;
        let meta: FsMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.unknown.get("futureField").unwrap(), "x");
        let out = serde_json::to_string(&meta).unwrap();
        assert!(out.contains("futureField"));
    }

    #[test]
    fn format_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("format.json");
        write_format(&path, &FormatDescriptor::current()).unwrap();
        let read_back = read_format(&path).unwrap();
        assert_eq!(read_back.format, "fs");
        assert_eq!(read_back.fs.version, "1");
    }

    #[test]
    fn rejects_non_fs_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("format.json");
        std::fs::write(&path, br#"{"version":"1","format":"xl","fs":{"version":"1"}}"#).unwrap();
        assert!(matches!(read_format(&path), Err(StorageError::UnformattedDisk(_))));
    }
}
