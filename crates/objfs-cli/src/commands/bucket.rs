use objfs_core::objectlayer::{FsObjectLayer, StorageLayer};
use tabled::Tabled;

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Created")]
    created: String,
}

pub async fn create(layer: &FsObjectLayer, name: &str) {
    match layer.make_bucket(name).await {
        Ok(()) => println!("Bucket '{name}' created."),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

pub async fn list(layer: &FsObjectLayer) {
    match layer.list_buckets().await {
        Ok(buckets) => {
            if buckets.is_empty() {
                println!("No buckets found.");
                return;
            }
            let rows: Vec<BucketRow> = buckets
                .into_iter()
                .map(|b| BucketRow {
                    name: b.name,
                    created: b.created.to_rfc3339(),
                })
                .collect();
            println!("{}", tabled::Table::new(rows));
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

pub async fn delete(layer: &FsObjectLayer, name: &str) {
    match layer.delete_bucket(name).await {
        Ok(()) => println!("Bucket '{name}' deleted."),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
