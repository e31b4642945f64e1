pub mod router;

use objfs_core::objectlayer::FsObjectLayer;
use std::sync::Arc;

/// Shared state for the bootstrap HTTP surface: a health/readiness probe in
/// front of a mounted disk. SigV4, bucket policy, and the S3 XML wire
/// format are out of scope here — that front-end is an external
/// collaborator (spec §1).
pub struct AppState {
    pub layer: Arc<FsObjectLayer>,
    pub start_time: std::time::Instant,
}
