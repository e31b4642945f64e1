use clap::{Parser, Subcommand};
use objfs_core::config::DiskConfig;
use objfs_core::objectlayer::{FsObjectLayer, StorageLayer};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "objfs-cli", about = "Drive a filesystem-backed object disk directly")]
struct Cli {
    /// Disk root to mount (overrides OBJFS_ROOT)
    #[arg(long, env = "OBJFS_ROOT")]
    root: Option<String>,

    /// Path to a TOML config file, applied before OBJFS_* env overrides
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bucket management
    Bucket {
        #[command(subcommand)]
        action: BucketAction,
    },
    /// Object operations
    Object {
        #[command(subcommand)]
        action: ObjectAction,
    },
}

#[derive(Subcommand)]
enum BucketAction {
    /// Create a new bucket
    Create { name: String },
    /// List all buckets
    List,
    /// Delete a bucket
    Delete { name: String },
}

#[derive(Subcommand)]
enum ObjectAction {
    /// List objects in a bucket under an optional prefix
    List {
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Upload a local file as an object
    Put {
        bucket: String,
        key: String,
        file: PathBuf,
    },
    /// Download an object to a local file
    Get {
        bucket: String,
        key: String,
        file: PathBuf,
    },
    /// Delete an object
    Delete { bucket: String, key: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DiskConfig::from_file_and_env(std::path::Path::new(path)).unwrap_or_else(|e| {
            eprintln!("Error loading config file: {e}");
            std::process::exit(1);
        }),
        None => DiskConfig::from_env(),
    };
    if let Some(root) = cli.root {
        config.root = root.into();
    }

    let layer = FsObjectLayer::mount(config).await.unwrap_or_else(|e| {
        eprintln!("Error mounting disk: {e}");
        std::process::exit(1);
    });

    match cli.command {
        Commands::Bucket { action } => match action {
            BucketAction::Create { name } => commands::bucket::create(&layer, &name).await,
            BucketAction::List => commands::bucket::list(&layer).await,
            BucketAction::Delete { name } => commands::bucket::delete(&layer, &name).await,
        },
        Commands::Object { action } => match action {
            ObjectAction::List { bucket, prefix } => commands::object::list(&layer, &bucket, &prefix).await,
            ObjectAction::Put { bucket, key, file } => commands::object::put(&layer, &bucket, &key, &file).await,
            ObjectAction::Get { bucket, key, file } => commands::object::get(&layer, &bucket, &key, &file).await,
            ObjectAction::Delete { bucket, key } => commands::object::remove(&layer, &bucket, &key).await,
        },
    }

    if let Err(e) = layer.shutdown().await {
        eprintln!("Warning: failed to unmount cleanly: {e}");
    }
}
