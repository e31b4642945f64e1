//! Disk configuration (spec §6 "Configuration recognized at mount").
//!
//! Env-var-driven, following the teacher crate's `Config::from_env`
//! pattern; the CLI/server bootstrap binaries layer `clap` overrides on
//! top of these defaults.

use crate::error::{Result, StorageError};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Absolute path to the disk root. Required; there is no sensible
    /// default for where object bytes live.
    pub root: PathBuf,
    pub min_free_bytes: u64,
    pub min_free_inodes: u64,
    pub walk_idle_timeout_secs: u64,
    pub max_list_page_size: usize,
    pub default_io_buffer_size: usize,
    /// Filesystem type names for which the inode-availability check is
    /// skipped outright (spec §9 open question (a)).
    pub skip_inode_check_fstypes: Vec<String>,
    pub log_level: String,
}

const DEFAULT_MIN_FREE_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB
const DEFAULT_MIN_FREE_INODES: u64 = 1000;
const DEFAULT_WALK_IDLE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_LIST_PAGE_SIZE: usize = 1000;
const DEFAULT_IO_BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

impl DiskConfig {
    pub fn from_env() -> Self {
        Self {
            root: PathBuf::from(env::var("OBJFS_ROOT").unwrap_or_else(|_| "./data".into())),
            min_free_bytes: env::var("OBJFS_MIN_FREE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_FREE_BYTES),
            min_free_inodes: env::var("OBJFS_MIN_FREE_INODES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_FREE_INODES),
            walk_idle_timeout_secs: env::var("OBJFS_WALK_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WALK_IDLE_TIMEOUT_SECS),
            max_list_page_size: env::var("OBJFS_MAX_LIST_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_LIST_PAGE_SIZE),
            default_io_buffer_size: env::var("OBJFS_IO_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_IO_BUFFER_SIZE),
            skip_inode_check_fstypes: env::var("OBJFS_SKIP_INODE_CHECK_FSTYPES")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.split(',').map(|o| o.trim().to_lowercase()).collect())
                .unwrap_or_else(|| vec!["nfs".to_string()]),
            log_level: env::var("OBJFS_LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }
}

/// On-disk TOML overlay, applied before environment variables so that
/// `OBJFS_*` still wins over a checked-in config file (spec §6).
#[derive(Debug, Deserialize, Default)]
struct DiskConfigFile {
    root: Option<PathBuf>,
    min_free_bytes: Option<u64>,
    min_free_inodes: Option<u64>,
    walk_idle_timeout_secs: Option<u64>,
    max_list_page_size: Option<usize>,
    default_io_buffer_size: Option<usize>,
    skip_inode_check_fstypes: Option<Vec<String>>,
    log_level: Option<String>,
}

impl DiskConfig {
    /// Load defaults from a TOML file at `path`, then apply any `OBJFS_*`
    /// environment overrides on top.
    pub fn from_file_and_env(path: &Path) -> Result<Self> {
        let bytes = std::fs::read_to_string(path).map_err(crate::error::io_to_storage_error)?;
        let overlay: DiskConfigFile =
            toml::from_str(&bytes).map_err(|e| StorageError::Unexpected(format!("invalid config file: {e}")))?;
        let mut config = Self::from_env();
        if env::var("OBJFS_ROOT").is_err() {
            if let Some(root) = overlay.root {
                config.root = root;
            }
        }
        if env::var("OBJFS_MIN_FREE_BYTES").is_err() {
            if let Some(v) = overlay.min_free_bytes {
                config.min_free_bytes = v;
            }
        }
        if env::var("OBJFS_MIN_FREE_INODES").is_err() {
            if let Some(v) = overlay.min_free_inodes {
                config.min_free_inodes = v;
            }
        }
        if env::var("OBJFS_WALK_IDLE_TIMEOUT_SECS").is_err() {
            if let Some(v) = overlay.walk_idle_timeout_secs {
                config.walk_idle_timeout_secs = v;
            }
        }
        if env::var("OBJFS_MAX_LIST_PAGE_SIZE").is_err() {
            if let Some(v) = overlay.max_list_page_size {
                config.max_list_page_size = v;
            }
        }
        if env::var("OBJFS_IO_BUFFER_SIZE").is_err() {
            if let Some(v) = overlay.default_io_buffer_size {
                config.default_io_buffer_size = v;
            }
        }
        if env::var("OBJFS_SKIP_INODE_CHECK_FSTYPES").is_err() {
            if let Some(v) = overlay.skip_inode_check_fstypes {
                config.skip_inode_check_fstypes = v;
            }
        }
        if env::var("OBJFS_LOG_LEVEL").is_err() {
            if let Some(v) = overlay.log_level {
                config.log_level = v;
            }
        }
        Ok(config)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            min_free_inodes: DEFAULT_MIN_FREE_INODES,
            walk_idle_timeout_secs: DEFAULT_WALK_IDLE_TIMEOUT_SECS,
            max_list_page_size: DEFAULT_MAX_LIST_PAGE_SIZE,
            default_io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            skip_inode_check_fstypes: vec!["nfs".to_string()],
            log_level: "info".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_skip_nfs_inode_checks() {
        let cfg = DiskConfig::default();
        assert_eq!(cfg.skip_inode_check_fstypes, vec!["nfs".to_string()]);
    }

    #[test]
    fn file_overlay_applies_when_env_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objfs.toml");
        std::fs::write(&path, "min_free_inodes = 42\nlog_level = \"debug\"\n").unwrap();
        unsafe {
            env::remove_var("OBJFS_MIN_FREE_INODES");
            env::remove_var("OBJFS_LOG_LEVEL");
        }
        let cfg = DiskConfig::from_file_and_env(&path).unwrap();
        assert_eq!(cfg.min_free_inodes, 42);
        assert_eq!(cfg.log_level, "debug");
    }
}
