use std::io;

/// The closed error taxonomy for the object storage layer (spec §7).
///
/// Low-level I/O errors are translated into this taxonomy exactly once, at
/// the FS primitive boundary (`fsops`); everything above that boundary only
/// ever sees these variants, never a raw [`std::io::Error`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("invalid object name: {0}")]
    InvalidObjectName(String),
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("bucket already exists: {0}")]
    BucketExists(String),
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid range")]
    InvalidRange,
    #[error("incomplete body: expected {expected} bytes, got {got}")]
    IncompleteBody { expected: i64, got: u64 },
    #[error("bad digest")]
    BadDigest,
    #[error("sha256 mismatch")]
    Sha256Mismatch,
    #[error("disk full")]
    DiskFull,
    #[error("disk not found: {0}")]
    DiskNotFound(String),
    #[error("unformatted disk: {0}")]
    UnformattedDisk(String),
    #[error("name too long: {0}")]
    NameTooLong(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("io error: {0}")]
    Io(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl StorageError {
    /// Ignorable during tree-walk descent per spec §4.10: absorbed by the
    /// walker, never surfaced to the listing caller. Covers not-found and
    /// access-denied plus the base-ignorable OS set — a subtree the walker
    /// can't read is skipped, not fatal to the whole listing.
    pub fn is_walk_ignorable(&self) -> bool {
        matches!(
            self,
            StorageError::BucketNotFound(_)
                | StorageError::ObjectNotFound { .. }
                | StorageError::AccessDenied(_)
        )
    }
}

/// Low-level classification produced while translating a raw `io::Error`,
/// mirroring spec §2 item 2's closed set before the façade attaches
/// bucket/key context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotFound,
    AccessDenied,
    Exists,
    NotEmpty,
    DiskFull,
    NameTooLong,
    Io,
    Unexpected,
}

pub fn classify_io_error(err: &io::Error) -> FsErrorKind {
    use io::ErrorKind as K;
    match err.kind() {
        K::NotFound => FsErrorKind::NotFound,
        K::PermissionDenied => FsErrorKind::AccessDenied,
        K::AlreadyExists => FsErrorKind::Exists,
        _ => match err.raw_os_error() {
            Some(libc::ENOSPC) => FsErrorKind::DiskFull,
            Some(libc::ENAMETOOLONG) => FsErrorKind::NameTooLong,
            Some(libc::ENOTEMPTY) => FsErrorKind::NotEmpty,
            Some(libc::EEXIST) => FsErrorKind::Exists,
            Some(libc::ENOENT) => FsErrorKind::NotFound,
            Some(libc::EACCES) | Some(libc::EPERM) => FsErrorKind::AccessDenied,
            _ => FsErrorKind::Unexpected,
        },
    }
}

/// Translate a raw `io::Error` into the context-free part of the taxonomy.
/// Callers that have a bucket/key on hand should prefer a more specific
/// `StorageError` variant instead of calling this directly.
pub fn io_to_storage_error(err: io::Error) -> StorageError {
    match classify_io_error(&err) {
        FsErrorKind::DiskFull => StorageError::DiskFull,
        FsErrorKind::NameTooLong => StorageError::NameTooLong(err.to_string()),
        FsErrorKind::AccessDenied => StorageError::AccessDenied(err.to_string()),
        FsErrorKind::NotFound
        | FsErrorKind::Exists
        | FsErrorKind::NotEmpty
        | FsErrorKind::Unexpected
        | FsErrorKind::Io => StorageError::Io(err.to_string()),
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(classify_io_error(&err), FsErrorKind::NotFound);
    }

    #[test]
    fn classifies_permission_denied() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(classify_io_error(&err), FsErrorKind::AccessDenied);
    }

    #[test]
    fn walk_ignorable_covers_not_found() {
        let err = StorageError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert!(err.is_walk_ignorable());
    }

    #[test]
    fn walk_ignorable_covers_access_denied() {
        let err = io_to_storage_error(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, StorageError::AccessDenied(_)));
        assert!(err.is_walk_ignorable());
    }
}
