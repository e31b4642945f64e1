//! Mount & format bootstrap (spec §3 invariants, §6).
//!
//! Establishes the on-disk format descriptor the first time a root is used,
//! validates it on every later mount, and hands out a process-unique
//! staging directory that `PutObject` reserves temp files under. Kept
//! separate from `objectlayer.rs` so the façade itself doesn't also own
//! process bootstrap.

use crate::error::{Result, StorageError};
use crate::fsops;
use crate::metacodec::{self, FormatDescriptor};
use crate::path::META_BUCKET_NAME;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

fn format_path(root: &Path) -> PathBuf {
    root.join(META_BUCKET_NAME).join("format.json")
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub root: PathBuf,
    pub mount_id: Uuid,
    pub staging_dir: PathBuf,
}

/// Validate (or create, on first use) the format descriptor at `root`, then
/// reserve a fresh mount-UUID staging directory for this running instance.
pub async fn mount(root: &Path) -> Result<Mount> {
    if !root.is_absolute() {
        return Err(StorageError::InvalidArg(format!(
            "disk root must be an absolute path: {}",
            root.display()
        )));
    }
    fsops::create_dir_all(root).await?;

    let fmt_path = format_path(root);
    if fsops::exists(&fmt_path).await {
        let descriptor = metacodec::read_format(&fmt_path)?;
        info!(version = %descriptor.version, "validated existing disk format");
    } else {
        metacodec::write_format(&fmt_path, &FormatDescriptor::current())?;
        info!("wrote new disk format descriptor");
    }

    let mount_id = Uuid::new_v4();
    let staging_dir = root.join(META_BUCKET_NAME).join("tmp").join(mount_id.to_string());
    fsops::create_dir_all(&staging_dir).await?;
    info!(mount_id = %mount_id, root = %root.display(), "mounted disk");

    Ok(Mount {
        root: root.to_path_buf(),
        mount_id,
        staging_dir,
    })
}

/// Remove the mount-UUID staging directory in its entirety (spec §5
/// Shutdown). Idempotent.
pub async fn unmount(mount: &Mount) -> Result<()> {
    fsops::remove_dir_all_if_exists(&mount.staging_dir).await?;
    info!(mount_id = %mount.mount_id, "unmounted disk");
    Ok(())
}

impl Mount {
    /// Path for a fresh staging file under this mount's scratch area.
    pub fn new_staging_path(&self) -> PathBuf {
        self.staging_dir.join(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn mount_creates_format_and_staging_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("disk1");
        let m = mount(&root).await.unwrap();
        assert!(format_path(&root).exists());
        assert!(m.staging_dir.exists());
    }

    #[tokio::test]
    async fn remount_validates_existing_format() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("disk1");
        let _m1 = mount(&root).await.unwrap();
        let m2 = mount(&root).await.unwrap();
        assert!(m2.staging_dir.exists());
    }

    #[tokio::test]
    async fn remount_rejects_foreign_format() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("disk1");
        fsops::create_dir_all(&root.join(META_BUCKET_NAME)).await.unwrap();
        std::fs::write(
            format_path(&root),
            br#"{"version":"1","format":"xl","fs":{"version":"1"}}"#,
        )
        .unwrap();
        assert!(matches!(mount(&root).await, Err(StorageError::UnformattedDisk(_))));
    }

    #[tokio::test]
    async fn unmount_removes_staging_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("disk1");
        let m = mount(&root).await.unwrap();
        unmount(&m).await.unwrap();
        assert!(!m.staging_dir.exists());
    }

    #[tokio::test]
    async fn rejects_relative_root() {
        let result = mount(Path::new("relative/path")).await;
        assert!(matches!(result, Err(StorageError::InvalidArg(_))));
    }
}
