//! Background Append Registry hook (spec §2 item 8, §9).
//!
//! The multipart state machine itself — part upload, checksum tracking,
//! completion — is an external collaborator outside this layer's scope.
//! What this module owns is narrower: reserving and releasing the
//! per-upload staging directory under the meta bucket so that collaborator
//! has somewhere durable to append parts, and making sure an abandoned
//! reservation doesn't leak on disk forever.

use crate::error::{Result, StorageError};
use crate::fsops;
use crate::path::META_BUCKET_NAME;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MULTIPART_DIR: &str = "multipart";

#[derive(Debug, Clone)]
pub struct UploadReservation {
    pub upload_id: String,
    pub staging_dir: PathBuf,
}

/// Tracks live multipart reservations so `Shutdown` and stray-cleanup can
/// find every staging directory a collaborator might still be writing
/// into. Holds no part data or checksums — that lives with the collaborator.
#[derive(Default)]
pub struct UploadRegistry {
    root: Mutex<Option<PathBuf>>,
    live: Mutex<HashMap<String, UploadReservation>>,
}

impl UploadRegistry {
    pub fn new(disk_root: &Path) -> Self {
        Self {
            root: Mutex::new(Some(disk_root.join(META_BUCKET_NAME).join(MULTIPART_DIR))),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a fresh staging directory for `bucket`/`key` and hand back
    /// an opaque upload id the collaborator threads through subsequent
    /// part-append calls.
    pub async fn reserve(&self, bucket: &str, key: &str) -> Result<UploadReservation> {
        let root = self
            .root
            .lock()
            .clone()
            .ok_or_else(|| StorageError::Unexpected("upload registry is shut down".into()))?;
        let upload_id = Uuid::new_v4().to_string();
        let staging_dir = root.join(bucket).join(key).join(&upload_id);
        fsops::create_dir_all(&staging_dir).await?;
        let reservation = UploadReservation {
            upload_id: upload_id.clone(),
            staging_dir,
        };
        self.live.lock().insert(upload_id, reservation.clone());
        Ok(reservation)
    }

    pub fn lookup(&self, upload_id: &str) -> Option<UploadReservation> {
        self.live.lock().get(upload_id).cloned()
    }

    /// Release a reservation, removing its staging directory whether the
    /// upload completed or was aborted — the collaborator has already
    /// moved any finished object out of the staging tree before calling
    /// this.
    pub async fn release(&self, upload_id: &str) -> Result<()> {
        let reservation = self.live.lock().remove(upload_id);
        if let Some(reservation) = reservation {
            fsops::remove_dir_all_if_exists(&reservation.staging_dir).await?;
        }
        Ok(())
    }

    pub fn live_upload_ids(&self) -> Vec<String> {
        self.live.lock().keys().cloned().collect()
    }

    /// Release every outstanding reservation (spec §4.12 Shutdown hook).
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.live.lock().drain().map(|(k, _)| k).collect();
        for id in ids {
            let reservation = self.live.lock().remove(&id);
            if let Some(reservation) = reservation {
                fsops::remove_dir_all_if_exists(&reservation.staging_dir).await?;
            }
        }
        *self.root.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reserve_creates_staging_dir() {
        let dir = tempdir().unwrap();
        let registry = UploadRegistry::new(dir.path());
        let reservation = registry.reserve("photos", "big.bin").await.unwrap();
        assert!(reservation.staging_dir.exists());
        assert!(registry.lookup(&reservation.upload_id).is_some());
    }

    #[tokio::test]
    async fn release_removes_staging_dir() {
        let dir = tempdir().unwrap();
        let registry = UploadRegistry::new(dir.path());
        let reservation = registry.reserve("photos", "big.bin").await.unwrap();
        registry.release(&reservation.upload_id).await.unwrap();
        assert!(!reservation.staging_dir.exists());
        assert!(registry.lookup(&reservation.upload_id).is_none());
    }

    #[tokio::test]
    async fn shutdown_clears_all_reservations() {
        let dir = tempdir().unwrap();
        let registry = UploadRegistry::new(dir.path());
        let r1 = registry.reserve("photos", "a").await.unwrap();
        let r2 = registry.reserve("photos", "b").await.unwrap();
        registry.shutdown().await.unwrap();
        assert!(!r1.staging_dir.exists());
        assert!(!r2.staging_dir.exists());
        assert!(registry.live_upload_ids().is_empty());
    }
}
