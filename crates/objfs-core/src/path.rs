//! Path & Name Validation (spec §4.1).
//!
//! Pure functions mapping S3 bucket/object names to validated relative
//! paths. Nothing here touches the filesystem; failures return a domain
//! error without any I/O.

use crate::error::{Result, StorageError};
use std::path::{Component, Path, PathBuf};

const META_BUCKET: &str = ".minio.sys";

/// Validate an S3 bucket name per the v2 naming rules: 3-63 chars,
/// lowercase alphanumeric plus `.` and `-`, no consecutive dots, no
/// leading/trailing dash, and not an IPv4 literal.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name == META_BUCKET || name.starts_with(".minio.sys/") {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }
    if name.len() < 3 || name.len() > 63 {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }
    if name.contains("..")
        || name.starts_with('-')
        || name.ends_with('-')
        || name.starts_with('.')
        || name.ends_with('.')
    {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }
    if is_ipv4_literal(name) {
        return Err(StorageError::InvalidBucketName(name.to_string()));
    }
    Ok(())
}

fn is_ipv4_literal(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.parse::<u8>().is_ok())
}

/// Validate an object key: any UTF-8 sequence without a NUL byte, that does
/// not resolve outside the bucket root once lexically joined.
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\0') {
        return Err(StorageError::InvalidObjectName(key.to_string()));
    }
    for component in Path::new(key).components() {
        if matches!(component, Component::ParentDir | Component::RootDir) {
            return Err(StorageError::InvalidObjectName(key.to_string()));
        }
    }
    Ok(())
}

/// Lexically normalize `.` and `..` components without touching the
/// filesystem (the path need not exist).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Join `root` and `rel`, then verify the normalized result still lives
/// under `root`. Rejects traversal that individual component checks miss
/// (e.g. via symlink-free but character-tricky relative segments).
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let joined = root.join(rel);
    let normalized = normalize(&joined);
    let norm_root = normalize(root);
    if !normalized.starts_with(&norm_root) {
        return Err(StorageError::InvalidObjectName(rel.to_string()));
    }
    Ok(normalized)
}

/// The bucket directory path under `root`.
pub fn bucket_path(root: &Path, bucket: &str) -> Result<PathBuf> {
    validate_bucket_name(bucket)?;
    safe_join(root, bucket)
}

/// The object data-file path under `root`.
pub fn object_path(root: &Path, bucket: &str, key: &str) -> Result<PathBuf> {
    validate_bucket_name(bucket)?;
    validate_object_key(key)?;
    safe_join(root, &format!("{bucket}/{key}"))
}

/// Whether `name` names the reserved meta bucket and should never be
/// surfaced as a user bucket (spec §3 invariant).
pub fn is_meta_bucket(name: &str) -> bool {
    name == META_BUCKET
}

pub const META_BUCKET_NAME: &str = META_BUCKET;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        for name in ["photos", "my-bucket.1", "a.b.c", "abc"] {
            assert!(validate_bucket_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_short_and_long_names() {
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn rejects_uppercase_and_underscore() {
        assert!(validate_bucket_name("MyBucket").is_err());
        assert!(validate_bucket_name("my_bucket").is_err());
    }

    #[test]
    fn rejects_consecutive_dots_and_dash_edges() {
        assert!(validate_bucket_name("my..bucket").is_err());
        assert!(validate_bucket_name("-bucket").is_err());
        assert!(validate_bucket_name("bucket-").is_err());
    }

    #[test]
    fn rejects_ip_literal() {
        assert!(validate_bucket_name("192.168.1.1").is_err());
    }

    #[test]
    fn rejects_meta_bucket_name() {
        assert!(validate_bucket_name(".minio.sys").is_err());
    }

    #[test]
    fn object_key_allows_slashes() {
        assert!(validate_object_key("a/b/c.txt").is_ok());
    }

    #[test]
    fn object_key_rejects_traversal_and_nul() {
        assert!(validate_object_key("../escape").is_err());
        assert!(validate_object_key("a/../../b").is_err());
        assert!(validate_object_key("bad\0key").is_err());
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn safe_join_rejects_escape() {
        let root = Path::new("/data/root");
        assert!(safe_join(root, "bucket/key").is_ok());
    }
}
