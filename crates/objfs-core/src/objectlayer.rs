//! Object Layer Facade (spec §4.6-4.9, §4.12).
//!
//! Composes path validation, the lock pool, the metadata codec, the disk
//! probe, and the tree-walker/continuation pool into the public operations
//! listed in spec §6: bucket ops, put/get/copy/delete, listing, storage
//! info, and shutdown. Exposed behind the [`StorageLayer`] trait so a
//! future erasure-coded backend can sit beside this one (spec §9).

use crate::config::DiskConfig;
use crate::continuation::{ContinuationKey, ContinuationPool};
use crate::diskprobe::DiskProbe;
use crate::error::{Result, StorageError, io_to_storage_error};
use crate::fsops;
use crate::lockpool::LockPool;
use crate::metacodec::{self, FsMeta};
use crate::mount::{self, Mount};
use crate::multipart::UploadRegistry;
use crate::path::{self, META_BUCKET_NAME};
use crate::walker::{PeekableWalker, TreeWalker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub meta: BTreeMap<String, String>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    pub next_marker: String,
    pub is_truncated: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StorageInfoResult {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub backend: &'static str,
}

/// The abstract capability set spec §9 describes: bucket ops, object ops,
/// list ops, and heal ops. `FsObjectLayer` is the one concrete backend
/// implementing it today.
#[async_trait]
pub trait StorageLayer: Send + Sync {
    async fn make_bucket(&self, bucket: &str) -> Result<()>;
    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo>;
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: i64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        meta: BTreeMap<String, String>,
        expected_md5_hex: Option<&str>,
        sha256_hex: Option<&str>,
    ) -> Result<ObjectInfo>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        offset: i64,
        length: i64,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;

    async fn get_object_info(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        meta: BTreeMap<String, String>,
    ) -> Result<ObjectInfo>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListObjectsResult>;

    async fn storage_info(&self) -> Result<StorageInfoResult>;

    async fn shutdown(&self) -> Result<()>;

    async fn heal_bucket(&self, _bucket: &str) -> Result<()> {
        Err(StorageError::NotImplemented)
    }

    async fn heal_object(&self, _bucket: &str, _key: &str) -> Result<()> {
        Err(StorageError::NotImplemented)
    }
}

pub struct FsObjectLayer {
    mount: Mount,
    config: DiskConfig,
    locks: Arc<LockPool>,
    disk_probe: DiskProbe,
    continuations: Arc<ContinuationPool>,
    sweeper: tokio::task::JoinHandle<()>,
    uploads: UploadRegistry,
}

impl FsObjectLayer {
    pub async fn mount(config: DiskConfig) -> Result<Self> {
        let mounted = mount::mount(&config.root).await?;
        let continuations = Arc::new(ContinuationPool::with_idle_timeout(std::time::Duration::from_secs(
            config.walk_idle_timeout_secs,
        )));
        let sweeper = continuations.clone().spawn_sweeper();
        Ok(Self {
            uploads: UploadRegistry::new(&mounted.root),
            continuations,
            sweeper,
            disk_probe: DiskProbe::new(),
            locks: LockPool::new(),
            mount: mounted,
            config,
        })
    }

    pub fn uploads(&self) -> &UploadRegistry {
        &self.uploads
    }

    fn guard_user_bucket(&self, bucket: &str) -> Result<()> {
        if path::is_meta_bucket(bucket) {
            return Err(StorageError::InvalidBucketName(bucket.to_string()));
        }
        Ok(())
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        path::bucket_path(&self.mount.root, bucket)
    }

    fn object_data_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        path::object_path(&self.mount.root, bucket, key)
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.mount
            .root
            .join(META_BUCKET_NAME)
            .join("buckets")
            .join(bucket)
            .join(key)
            .join("fs.json")
    }

    fn bucket_meta_root(&self, bucket: &str) -> PathBuf {
        self.mount.root.join(META_BUCKET_NAME).join("buckets").join(bucket)
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !fsops::exists(&dir).await {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(dir)
    }

    async fn object_info_from_stat(
        &self,
        bucket: &str,
        key: &str,
        metadata: &std::fs::Metadata,
        user_meta: BTreeMap<String, String>,
    ) -> ObjectInfo {
        let mod_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            mod_time,
            meta: user_meta,
            is_dir: metadata.is_dir(),
        }
    }

    async fn read_sidecar_meta(&self, sidecar: &Path) -> Result<BTreeMap<String, String>> {
        if !fsops::exists(sidecar).await {
            return Ok(BTreeMap::new());
        }
        let guard = self.locks.open(sidecar)?;
        let parsed = metacodec::read_fs_meta(&guard)?;
        Ok(parsed.map(|m| m.meta).unwrap_or_default())
    }

    /// Stream `reader` into `dest`, hashing as it goes. Stops at `size`
    /// bytes when `size >= 0`; reads to EOF otherwise (spec §4.6 steps 4-6).
    async fn stream_to_staging(
        reader: &mut (dyn AsyncRead + Unpin + Send),
        dest: &Path,
        size: i64,
        buf_size: usize,
        want_sha256: bool,
    ) -> Result<(u64, String, Option<String>)> {
        let mut file = tokio::fs::File::create(dest).await.map_err(io_to_storage_error)?;
        let mut md5 = Md5::new();
        let mut sha256 = want_sha256.then(Sha256::new);
        let cap = if size >= 0 {
            (size as u64).min(buf_size as u64).max(1) as usize
        } else {
            buf_size.max(1)
        };
        let mut buf = vec![0u8; cap];
        let mut written: u64 = 0;
        loop {
            let to_read = if size >= 0 {
                let remaining = size as u64 - written;
                if remaining == 0 {
                    break;
                }
                remaining.min(buf.len() as u64) as usize
            } else {
                buf.len()
            };
            let n = reader.read(&mut buf[..to_read]).await.map_err(io_to_storage_error)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await.map_err(io_to_storage_error)?;
            md5.update(&buf[..n]);
            if let Some(h) = sha256.as_mut() {
                h.update(&buf[..n]);
            }
            written += n as u64;
        }
        file.flush().await.map_err(io_to_storage_error)?;
        if size >= 0 && written != size as u64 {
            return Err(StorageError::IncompleteBody {
                expected: size,
                got: written,
            });
        }
        let md5_hex = hex::encode(md5.finalize());
        let sha256_hex = sha256.map(|h| hex::encode(h.finalize()));
        Ok((written, md5_hex, sha256_hex))
    }

    /// Resolve a walker entry into a full [`ObjectInfo`]. Returns `Ok(None)`
    /// on a stat failure so the caller can skip it and keep listing rather
    /// than aborting the whole page (spec §9 open question (b)).
    async fn resolve_listed_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        let data_path = match self.object_data_path(bucket, key.trim_end_matches('/')) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        let metadata = match fsops::stat(&data_path).await {
            Ok(m) => m,
            Err(e) if e.is_walk_ignorable() => return Ok(None),
            Err(e) => {
                warn!(bucket, key, error = %e, "skipping entry: conversion to object info failed");
                return Ok(None);
            }
        };
        let sidecar = self.sidecar_path(bucket, key.trim_end_matches('/'));
        let user_meta = self.read_sidecar_meta(&sidecar).await.unwrap_or_default();
        Ok(Some(self.object_info_from_stat(bucket, key, &metadata, user_meta).await))
    }
}

#[async_trait]
impl StorageLayer for FsObjectLayer {
    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.guard_user_bucket(bucket)?;
        let dir = self.bucket_dir(bucket)?;
        if fsops::exists(&dir).await {
            return Err(StorageError::BucketExists(bucket.to_string()));
        }
        debug!(bucket, "creating bucket");
        fsops::create_dir(&dir).await
    }

    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo> {
        self.guard_user_bucket(bucket)?;
        let dir = self.require_bucket(bucket).await?;
        let metadata = fsops::stat(&dir).await?;
        let created = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(BucketInfo {
            name: bucket.to_string(),
            created,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.mount.root)
            .await
            .map_err(io_to_storage_error)?;
        while let Some(entry) = rd.next_entry().await.map_err(io_to_storage_error)? {
            let file_type = entry.file_type().await.map_err(io_to_storage_error)?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if path::is_meta_bucket(&name) || path::validate_bucket_name(&name).is_err() {
                continue;
            }
            let metadata = entry.metadata().await.map_err(io_to_storage_error)?;
            let created = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(BucketInfo { name, created });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.guard_user_bucket(bucket)?;
        let dir = self.require_bucket(bucket).await?;
        tokio::fs::remove_dir(&dir).await.map_err(|e| {
            if crate::error::classify_io_error(&e) == crate::error::FsErrorKind::NotEmpty {
                StorageError::BucketNotEmpty(bucket.to_string())
            } else {
                io_to_storage_error(e)
            }
        })?;
        fsops::remove_dir_all_if_exists(&self.mount.root.join(META_BUCKET_NAME).join("multipart").join(bucket))
            .await?;
        fsops::remove_dir_all_if_exists(&self.bucket_meta_root(bucket)).await?;
        info!(bucket, "deleted bucket");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: i64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        meta: BTreeMap<String, String>,
        expected_md5_hex: Option<&str>,
        sha256_hex: Option<&str>,
    ) -> Result<ObjectInfo> {
        self.guard_user_bucket(bucket)?;
        self.require_bucket(bucket).await?;

        if key.ends_with('/') && size == 0 {
            let dir_path = self.object_data_path(bucket, key)?;
            fsops::create_dir_all(&dir_path).await?;
            let metadata = fsops::stat(&dir_path).await?;
            return Ok(self.object_info_from_stat(bucket, key, &metadata, meta).await);
        }

        self.disk_probe.check_admission(
            &self.mount.root,
            self.config.min_free_bytes,
            self.config.min_free_inodes,
            &self.config.skip_inode_check_fstypes,
        )?;

        let sidecar = self.sidecar_path(bucket, key);
        let guard = self.locks.create(&sidecar)?;

        let staging_path = self.mount.new_staging_path();
        fsops::create_parents(&staging_path).await?;

        let want_sha256 = sha256_hex.is_some();
        let stream_result =
            Self::stream_to_staging(reader, &staging_path, size, self.config.default_io_buffer_size, want_sha256)
                .await;
        let (written, md5_hex, sha256_computed) = match stream_result {
            Ok(v) => v,
            Err(e) => {
                fsops::remove_file_if_exists(&staging_path).await.ok();
                return Err(e);
            }
        };

        if let Some(expected) = expected_md5_hex {
            if !expected.eq_ignore_ascii_case(&md5_hex) {
                fsops::remove_file_if_exists(&staging_path).await.ok();
                return Err(StorageError::BadDigest);
            }
        }
        if let (Some(expected), Some(computed)) = (sha256_hex, sha256_computed.as_deref()) {
            if !expected.eq_ignore_ascii_case(computed) {
                fsops::remove_file_if_exists(&staging_path).await.ok();
                return Err(StorageError::Sha256Mismatch);
            }
        }

        let object_path = self.object_data_path(bucket, key)?;
        fsops::create_parents(&object_path).await?;
        if let Err(e) = fsops::rename_file(&staging_path, &object_path).await {
            fsops::remove_file_if_exists(&staging_path).await.ok();
            return Err(e);
        }

        let mut stored_meta = meta;
        stored_meta.insert("md5Sum".to_string(), md5_hex);
        metacodec::write_fs_meta(&guard, &FsMeta::new(stored_meta.clone()))?;

        let metadata = fsops::stat(&object_path).await?;
        debug!(bucket, key, bytes = written, "object written");
        Ok(self.object_info_from_stat(bucket, key, &metadata, stored_meta).await)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        offset: i64,
        length: i64,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        self.guard_user_bucket(bucket)?;
        self.require_bucket(bucket).await?;
        if offset < 0 {
            return Err(StorageError::InvalidArg("offset must not be negative".into()));
        }

        let data_path = self.object_data_path(bucket, key)?;
        let sidecar = self.sidecar_path(bucket, key);
        let _guard = if fsops::exists(&sidecar).await {
            Some(self.locks.open(&sidecar)?)
        } else {
            None
        };

        let metadata = fsops::stat(&data_path).await.map_err(|_| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let size = metadata.len();
        let offset = offset as u64;
        if offset > size {
            return Err(StorageError::InvalidRange);
        }
        let effective_length = if length < 0 { size - offset } else { length as u64 };
        if offset + effective_length > size {
            return Err(StorageError::InvalidRange);
        }

        let mut file = tokio::fs::File::open(&data_path).await.map_err(io_to_storage_error)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io_to_storage_error)?;
        let buf_size = (self.config.default_io_buffer_size as u64).min(effective_length.max(1)) as usize;
        fsops::copy_exact(&mut file, writer, effective_length, buf_size.max(1)).await
    }

    async fn get_object_info(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.guard_user_bucket(bucket)?;
        self.require_bucket(bucket).await?;
        let data_path = self.object_data_path(bucket, key)?;
        let metadata = fsops::stat(&data_path).await.map_err(|_| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let sidecar = self.sidecar_path(bucket, key);
        let user_meta = self.read_sidecar_meta(&sidecar).await?;
        Ok(self.object_info_from_stat(bucket, key, &metadata, user_meta).await)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        meta: BTreeMap<String, String>,
    ) -> Result<ObjectInfo> {
        self.guard_user_bucket(src_bucket)?;
        self.guard_user_bucket(dst_bucket)?;
        self.require_bucket(src_bucket).await?;
        self.require_bucket(dst_bucket).await?;

        let same = format!("{src_bucket}/{src_key}").eq_ignore_ascii_case(&format!("{dst_bucket}/{dst_key}"));
        if same {
            let sidecar = self.sidecar_path(src_bucket, src_key);
            let guard = self.locks.write(&sidecar)?;
            let existing = metacodec::read_fs_meta_exclusive(&guard)?.unwrap_or_else(|| FsMeta::new(BTreeMap::new()));
            let mut new_meta = meta;
            if let Some(md5) = existing.meta.get("md5Sum") {
                new_meta.entry("md5Sum".to_string()).or_insert_with(|| md5.clone());
            }
            metacodec::write_fs_meta(&guard, &FsMeta::new(new_meta.clone()))?;
            let data_path = self.object_data_path(src_bucket, src_key)?;
            let metadata = fsops::stat(&data_path).await?;
            return Ok(self.object_info_from_stat(dst_bucket, dst_key, &metadata, new_meta).await);
        }

        let buf_size = self.config.default_io_buffer_size;
        let (mut tx_half, mut rx_half) = tokio::io::duplex(buf_size.max(1));
        let src_bucket_owned = src_bucket.to_string();
        let src_key_owned = src_key.to_string();

        let producer = async {
            self.get_object(&src_bucket_owned, &src_key_owned, 0, -1, &mut tx_half)
                .await?;
            tx_half.shutdown().await.map_err(io_to_storage_error)?;
            Ok::<(), StorageError>(())
        };
        let consumer = self.put_object(dst_bucket, dst_key, -1, &mut rx_half, meta, None, None);
        let (_, info) = tokio::try_join!(producer, consumer)?;
        Ok(info)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.guard_user_bucket(bucket)?;
        self.require_bucket(bucket).await?;

        let data_path = self.object_data_path(bucket, key)?;
        let sidecar = self.sidecar_path(bucket, key);
        let _guard = if fsops::exists(&sidecar).await {
            Some(self.locks.write(&sidecar)?)
        } else {
            None
        };

        let bucket_dir = self.bucket_dir(bucket)?;
        if key.ends_with('/') {
            fsops::delete_dir_prune(&data_path, &bucket_dir).await?;
        } else {
            fsops::delete_file_prune(&data_path, &bucket_dir).await?;
        }
        fsops::delete_file_prune(&sidecar, &self.bucket_meta_root(bucket)).await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListObjectsResult> {
        self.guard_user_bucket(bucket)?;
        let bucket_dir = self.require_bucket(bucket).await?;
        let recursive = delimiter.is_empty();
        let max_keys = max_keys.min(self.config.max_list_page_size);

        let lookup_key = ContinuationKey {
            bucket: bucket.to_string(),
            recursive,
            prefix: prefix.to_string(),
            marker: marker.to_string(),
            heal: false,
        };
        let mut walker = self.continuations.take(&lookup_key).unwrap_or_else(|| {
            PeekableWalker::new(TreeWalker::spawn(
                bucket_dir,
                prefix.to_string(),
                marker.to_string(),
                recursive,
            ))
        });

        let mut result = ListObjectsResult::default();
        let mut last_key = marker.to_string();
        while result.objects.len() + result.prefixes.len() < max_keys {
            match walker.next().await {
                None => break,
                Some(Err(e)) => {
                    walker.cancel();
                    return Err(e);
                }
                Some(Ok(entry)) => {
                    last_key = entry.key.clone();
                    if entry.is_prefix {
                        result.prefixes.push(entry.key);
                    } else if let Some(info) = self.resolve_listed_object(bucket, &entry.key).await? {
                        result.objects.push(info);
                    }
                }
            }
        }

        if walker.peek().await.is_some() {
            result.is_truncated = true;
            result.next_marker = last_key;
            self.continuations.park(
                ContinuationKey {
                    bucket: bucket.to_string(),
                    recursive,
                    prefix: prefix.to_string(),
                    marker: result.next_marker.clone(),
                    heal: false,
                },
                walker,
            );
        } else {
            walker.cancel();
        }

        Ok(result)
    }

    async fn storage_info(&self) -> Result<StorageInfoResult> {
        let info = self.disk_probe.stat(&self.mount.root)?;
        Ok(StorageInfoResult {
            total_bytes: info.total_bytes,
            free_bytes: info.free_bytes,
            backend: "fs",
        })
    }

    async fn shutdown(&self) -> Result<()> {
        self.sweeper.abort();
        self.continuations.shutdown();
        self.uploads.shutdown().await?;
        mount::unmount(&self.mount).await
    }
}
