use std::path::PathBuf;

use ambercoin_node::run_node;

#[tokio::main]
async fn main() {
    let path = std::env::var("AMBERCOIN_CONFIG").unwrap_or_else(|_| "config/ambercoin.toml".to_string());
    if let Err(err) = run_node(PathBuf::from(path)).await {
        eprintln!("node failed: {err:?}");
        std::process::exit(1);
    }
}
