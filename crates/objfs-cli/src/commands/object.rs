use objfs_core::objectlayer::{FsObjectLayer, StorageLayer};
use std::collections::BTreeMap;
use std::path::Path;
use tabled::Tabled;

#[derive(Tabled)]
struct ObjectRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Size")]
    size: u64,
    #[tabled(rename = "Modified")]
    modified: String,
}

pub async fn list(layer: &FsObjectLayer, bucket: &str, prefix: &str) {
    let mut marker = String::new();
    let mut rows = Vec::new();
    loop {
        let page = match layer.list_objects(bucket, prefix, &marker, "", 1000).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        };
        for prefix_key in &page.prefixes {
            rows.push(ObjectRow {
                key: prefix_key.clone(),
                size: 0,
                modified: String::new(),
            });
        }
        for object in &page.objects {
            rows.push(ObjectRow {
                key: object.key.clone(),
                size: object.size,
                modified: object.mod_time.to_rfc3339(),
            });
        }
        if !page.is_truncated {
            break;
        }
        marker = page.next_marker;
    }
    if rows.is_empty() {
        println!("No objects found.");
        return;
    }
    println!("{}", tabled::Table::new(rows));
}

pub async fn put(layer: &FsObjectLayer, bucket: &str, key: &str, file: &Path) {
    let metadata = match tokio::fs::metadata(file).await {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", file.display());
            std::process::exit(1);
        }
    };
    let mut reader = match tokio::fs::File::open(file).await {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {e}", file.display());
            std::process::exit(1);
        }
    };
    match layer
        .put_object(bucket, key, metadata.len() as i64, &mut reader, BTreeMap::new(), None, None)
        .await
    {
        Ok(info) => println!("Uploaded '{key}' ({} bytes).", info.size),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

pub async fn get(layer: &FsObjectLayer, bucket: &str, key: &str, dest: &Path) {
    let mut writer = match tokio::fs::File::create(dest).await {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error creating '{}': {e}", dest.display());
            std::process::exit(1);
        }
    };
    match layer.get_object(bucket, key, 0, -1, &mut writer).await {
        Ok(()) => println!("Downloaded '{key}' to '{}'.", dest.display()),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

pub async fn remove(layer: &FsObjectLayer, bucket: &str, key: &str) {
    match layer.delete_object(bucket, key).await {
        Ok(()) => println!("Deleted '{key}'."),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
