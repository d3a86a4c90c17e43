use std::path::PathBuf;

use ambercoin_config::NodeConfig;
use ambercoin_node::run_node;
use ambercoin_wallet::{RpcClient, Wallet};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "ambercoin", version, about = "ambercoin node and wallet CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter node configuration.
    Init {
        #[arg(long, default_value = "config/ambercoin.toml")]
        config: PathBuf,
    },
    /// Run the full node process.
    Node {
        #[command(subcommand)]
        cmd: NodeCmd,
    },
    /// Query a running node.
    Chain {
        #[command(subcommand)]
        cmd: ChainCmd,
    },
    /// Wallet operations against a node's REST API.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCmd,
    },
}

#[derive(Subcommand)]
enum NodeCmd {
    Start {
        #[arg(long, default_value = "config/ambercoin.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ChainCmd {
    Status {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        rpc: String,
    },
}

#[derive(Subcommand)]
enum WalletCmd {
    New {
        #[arg(long, default_value = "default")]
        name: String,
    },
    List,
    Balance {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        rpc: String,
        #[arg(long)]
        asset: Option<String>,
    },
    Send {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value_t = 0.0)]
        fee: f64,
        #[arg(long)]
        asset: Option<String>,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        rpc: String,
    },
    History {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        rpc: String,
    },
}

/// Plaintext on-disk wallet record. Passphrase-based at-rest encryption is
/// explicitly out of scope (spec.md §1); this is the CLI's own bookkeeping,
/// not a concern of `ambercoin-wallet` itself.
#[derive(Serialize, Deserialize)]
struct WalletFile {
    name: String,
    private_key_hex: String,
    public_key_hex: String,
}

impl From<&Wallet> for WalletFile {
    fn from(w: &Wallet) -> Self {
        Self {
            name: w.name.clone(),
            private_key_hex: w.private_key_hex.clone(),
            public_key_hex: w.public_key_hex.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { config } => init_config(config)?,
        Commands::Node { cmd } => match cmd {
            NodeCmd::Start { config } => run_node(config).await?,
        },
        Commands::Chain { cmd } => match cmd {
            ChainCmd::Status { rpc } => {
                let client = RpcClient::new(rpc);
                let height = client.get_height().await?;
                println!("height: {height}");
            }
        },
        Commands::Wallet { cmd } => wallet_command(cmd).await?,
    }
    Ok(())
}

async fn wallet_command(cmd: WalletCmd) -> Result<()> {
    match cmd {
        WalletCmd::New { name } => {
            let wallet = Wallet::generate(&name);
            save_wallet(&wallet)?;
            println!("created wallet {} address {}", wallet.name, wallet.address());
        }
        WalletCmd::List => {
            for wallet in load_all_wallets()? {
                println!("{} -> {}", wallet.name, wallet.public_key_hex);
            }
        }
        WalletCmd::Balance { name, rpc, asset } => {
            let wallet = load_wallet(&name)?;
            let client = RpcClient::new(rpc);
            let balance = client.get_balance(wallet.address(), asset.as_deref()).await?;
            println!("{}: {balance}", wallet.address());
        }
        WalletCmd::Send { name, to, amount, fee, asset, rpc } => {
            let wallet = load_wallet(&name)?;
            let tx = wallet.build_transaction(&to, amount, fee, asset.as_deref())?;
            let client = RpcClient::new(rpc);
            let tx_hash = client.submit_transaction(&tx).await?;
            println!("submitted {tx_hash}");
        }
        WalletCmd::History { name, rpc } => {
            let wallet = load_wallet(&name)?;
            let client = RpcClient::new(rpc);
            for tx in client.get_history(wallet.address()).await? {
                println!(
                    "{} {} -> {} amount={} fee={} type={:?}",
                    tx.tx_hash, tx.source, tx.destination, tx.amount, tx.fee, tx.tx_type
                );
            }
        }
    }
    Ok(())
}

fn init_config(path: PathBuf) -> Result<()> {
    if path.exists() {
        println!("config already exists at {path:?}");
        return Ok(());
    }
    let cfg = NodeConfig::example();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, toml::to_string_pretty(&cfg)?)?;
    println!("wrote config to {path:?}");
    Ok(())
}

fn wallet_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ambercoin")
        .join("wallets");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn save_wallet(wallet: &Wallet) -> Result<()> {
    let path = wallet_dir()?.join(format!("{}.json", wallet.name));
    let file = WalletFile::from(wallet);
    std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
    Ok(())
}

fn load_wallet(name: &str) -> Result<Wallet> {
    let path = wallet_dir()?.join(format!("{name}.json"));
    let bytes = std::fs::read(&path).with_context(|| format!("no wallet named {name}"))?;
    let file: WalletFile = serde_json::from_slice(&bytes)?;
    Wallet::from_private_key(file.name, file.private_key_hex).map_err(Into::into)
}

fn load_all_wallets() -> Result<Vec<Wallet>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(wallet_dir()?)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let bytes = std::fs::read(entry.path())?;
            let file: WalletFile = serde_json::from_slice(&bytes)?;
            out.push(Wallet::from_private_key(file.name, file.private_key_hex)?);
        }
    }
    Ok(out)
}
