pub mod config;
pub mod continuation;
pub mod diskprobe;
pub mod error;
pub mod fsops;
pub mod lockpool;
pub mod metacodec;
pub mod mount;
pub mod multipart;
pub mod objectlayer;
pub mod path;
pub mod walker;

pub use config::DiskConfig;
pub use error::StorageError;
pub use objectlayer::{FsObjectLayer, StorageLayer};
