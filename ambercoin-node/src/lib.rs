//! Assembles config, chain store, mempool, consensus, network and RPC into
//! one process. §5 calls this a deployment choice, not a requirement — the
//! seams below (`ChainStore`, `Mempool`, `GossipWorker`, `NetworkService`,
//! RPC server) are exactly where a real deployment would split into
//! separate processes instead.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ambercoin_chain::{build_genesis_block, ChainStore};
use ambercoin_config::NodeConfig;
use ambercoin_consensus::{Miner, Validator};
use ambercoin_mempool::{Mempool, SqlMempool};
use ambercoin_network::{GossipMessage, GossipWorker, InboundMessage, NetworkService, PeerRegistry};
use ambercoin_rpc::RpcState;
use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const INBOUND_QUEUE_CAPACITY: usize = 1024;
const MINER_IDLE_BACKOFF: Duration = Duration::from_millis(500);

pub async fn run_node(config_path: PathBuf) -> Result<()> {
    let cfg = NodeConfig::load(&config_path)?;
    init_logging();
    info!(?config_path, "starting ambercoin node");

    let chain = Arc::new(
        ChainStore::connect(&cfg.db.path, cfg.db.pool_size, cfg.consensus.clone()).await?,
    );
    let genesis = build_genesis_block()?;
    chain.ensure_genesis(&genesis).await?;

    let mempool: Arc<dyn Mempool> = Arc::new(SqlMempool::connect(&format!("{}-mempool.sqlite3", cfg.db.path)).await?);
    let validator = Arc::new(Validator::new(chain.clone()));

    let peer_options = SqliteConnectOptions::from_str(&format!("{}-peers.sqlite3", cfg.db.path))?
        .create_if_missing(true);
    let peer_pool = SqlitePool::connect_with(peer_options).await?;
    let peers = Arc::new(PeerRegistry::connect(peer_pool, cfg.network.downtime_threshold as u32).await?);

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE_CAPACITY);

    let network = NetworkService::spawn(
        &cfg.network.listen_addr,
        &cfg.network.version,
        chain.clone(),
        mempool.clone(),
        inbound_tx.clone(),
    )?;

    let now = chrono::Utc::now().timestamp();
    for seed in &cfg.network.seed_nodes {
        peers.add_peer(seed, now).await?;
        if let Ok(addr) = seed.parse() {
            if let Err(err) = network.dial(addr).await {
                warn!(seed, %err, "node: failed to dial seed node");
            }
        }
    }

    let worker = GossipWorker::new(
        chain.clone(),
        validator.clone(),
        mempool.clone(),
        peers.clone(),
        network.clone(),
        network.clone(),
        cfg.network.max_peers as u32,
    );
    let gossip_task = tokio::spawn(async move {
        while let Some(inbound) = inbound_rx.recv().await {
            if let Err(err) = worker.handle(inbound).await {
                warn!(%err, "node: dropping invalid gossip message");
            }
        }
    });

    let rpc_state = RpcState {
        chain: chain.clone(),
        mempool: mempool.clone(),
        inbound_tx: inbound_tx.clone(),
    };
    let rpc_cfg = cfg.clone();
    let rpc_task = tokio::spawn(async move { ambercoin_rpc::start_server(&rpc_cfg, rpc_state).await });

    let miner_task = if cfg.mining.enabled {
        match cfg.mining.reward_address.clone() {
            Some(address) => {
                let miner = Miner::new(chain.clone());
                let chain = chain.clone();
                let mempool = mempool.clone();
                let inbound_tx = inbound_tx.clone();
                let max_transactions = cfg.consensus.max_transactions_per_block;
                Some(tokio::spawn(async move {
                    mining_loop(miner, chain, mempool, inbound_tx, address, max_transactions).await
                }))
            }
            None => {
                warn!("node: mining.enabled is true but mining.reward_address is unset; mining disabled");
                None
            }
        }
    } else {
        None
    };

    tokio::select! {
        res = gossip_task => { res?; }
        res = rpc_task => { res??; }
    }
    if let Some(miner_task) = miner_task {
        miner_task.abort();
    }
    Ok(())
}

async fn mining_loop(
    miner: Miner,
    chain: Arc<ChainStore>,
    mempool: Arc<dyn Mempool>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    reward_address: String,
    max_transactions: usize,
) {
    loop {
        match miner.mine_candidate(mempool.as_ref(), &reward_address, max_transactions).await {
            Ok(Some(block)) => {
                let hash = match block.hash() {
                    Ok(hash) => hash,
                    Err(err) => {
                        error!(%err, "node: mined block failed to hash");
                        continue;
                    }
                };
                match chain.add_block(&block).await {
                    Ok(true) => {
                        let confirmed: Vec<String> =
                            block.transactions[1..].iter().map(|t| t.tx_hash.clone()).collect();
                        if let Err(err) = mempool.remove_unconfirmed_transactions(&confirmed).await {
                            warn!(%err, "node: failed to clear mined transactions from mempool");
                        }
                        if let Err(err) = chain.prune().await {
                            warn!(%err, "node: prune after mined block failed");
                        }
                        let header = block.block_header.clone();
                        let _ = inbound_tx
                            .send(InboundMessage {
                                sender: "local".into(),
                                self_originated: true,
                                message: GossipMessage::BlockHeader { header },
                            })
                            .await;
                        info!(%hash, height = block.height, "node: mined and committed block");
                    }
                    Ok(false) => {
                        debug_assert!(false, "miner produced a block that was already known");
                    }
                    Err(err) => error!(%err, "node: failed to commit mined block"),
                }
            }
            Ok(None) => {
                tokio::time::sleep(MINER_IDLE_BACKOFF).await;
            }
            Err(err) => {
                error!(%err, "node: miner iteration failed");
                tokio::time::sleep(MINER_IDLE_BACKOFF).await;
            }
        }
    }
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
