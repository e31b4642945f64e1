//! Disk Probe and Admission (spec §4.3).
//!
//! Returns free bytes and free inodes and decides whether a put should be
//! admitted before any staging file is reserved.

use crate::error::{Result, StorageError};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct DiskSpaceInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub fs_type_is_nfs: bool,
}

/// Probe free space and inode counts for the filesystem backing `path`.
///
/// Hosts where the underlying syscall is prohibitively slow can disable
/// this via [`DiskProbe::disabled`], in which case every admission check
/// passes unconditionally (spec §4.3).
pub struct DiskProbe {
    enabled: bool,
}

impl DiskProbe {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn stat(&self, path: &Path) -> Result<DiskSpaceInfo> {
        if !self.enabled {
            return Ok(DiskSpaceInfo {
                total_bytes: u64::MAX,
                free_bytes: u64::MAX,
                total_inodes: 0,
                free_inodes: u64::MAX,
                fs_type_is_nfs: false,
            });
        }
        let vfs = nix::sys::statvfs::statvfs(path).map_err(|e| {
            StorageError::Unexpected(format!("statvfs({}) failed: {e}", path.display()))
        })?;
        let block_size = vfs.fragment_size().max(1) as u64;
        let fs_type_is_nfs = detect_nfs(path);
        Ok(DiskSpaceInfo {
            total_bytes: vfs.blocks() as u64 * block_size,
            free_bytes: vfs.blocks_available() as u64 * block_size,
            total_inodes: vfs.files() as u64,
            free_inodes: vfs.files_available() as u64,
            fs_type_is_nfs,
        })
    }

    /// `admissible = floor(free_bytes * 0.95) > minFreeSpace`, and — when
    /// the filesystem reports a finite inode total and is not NFS (or any
    /// configured whitelisted network filesystem) — `free_inodes >
    /// minFreeInodes`. A failed check yields `DiskFull` without reserving a
    /// staging file.
    pub fn check_admission(
        &self,
        path: &Path,
        min_free_bytes: u64,
        min_free_inodes: u64,
        skip_inode_check_fstypes: &[String],
    ) -> Result<()> {
        let info = self.stat(path)?;
        let usable = (info.free_bytes as f64 * 0.95).floor() as u64;
        if usable <= min_free_bytes {
            warn!(free_bytes = info.free_bytes, min_free_bytes, "disk admission rejected: low space");
            return Err(StorageError::DiskFull);
        }
        let skip_inodes = info.fs_type_is_nfs
            || skip_inode_check_fstypes
                .iter()
                .any(|f| f.eq_ignore_ascii_case("nfs"));
        if info.total_inodes > 0 && !skip_inodes && info.free_inodes <= min_free_inodes {
            warn!(free_inodes = info.free_inodes, min_free_inodes, "disk admission rejected: low inodes");
            return Err(StorageError::DiskFull);
        }
        Ok(())
    }
}

impl Default for DiskProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn detect_nfs(path: &Path) -> bool {
    match nix::sys::statfs::statfs(path) {
        Ok(s) => s.filesystem_type() == nix::sys::statfs::NFS_SUPER_MAGIC,
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn detect_nfs(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disabled_probe_is_always_admissible() {
        let dir = tempdir().unwrap();
        let probe = DiskProbe::disabled();
        assert!(probe.check_admission(dir.path(), u64::MAX - 1, u64::MAX - 1, &[]).is_ok());
    }

    #[test]
    fn enabled_probe_reports_stats() {
        let dir = tempdir().unwrap();
        let probe = DiskProbe::new();
        let info = probe.stat(dir.path()).unwrap();
        assert!(info.total_bytes >= info.free_bytes);
    }

    #[test]
    fn admission_rejects_absurd_threshold() {
        let dir = tempdir().unwrap();
        let probe = DiskProbe::new();
        let result = probe.check_admission(dir.path(), u64::MAX / 2, 0, &[]);
        assert!(matches!(result, Err(StorageError::DiskFull)));
    }
}
