use std::collections::HashMap;
use std::sync::Arc;

use ambercoin_chain::{ChainStore, PRIMARY_BRANCH};
use ambercoin_consensus::Validator;
use ambercoin_core::{Block, BlockHeader, Transaction};
use ambercoin_mempool::Mempool;
use tracing::warn;

use crate::api::{ApiClient, Broadcaster};
use crate::error::Result;
use crate::message::{GossipMessage, InboundMessage};
use crate::peer_registry::PeerRegistry;

/// Bounds the backward walk a SYNCHRONIZE/unknown-parent header can
/// trigger, so a malicious or confused peer can't make us walk forever.
const MAX_WALKBACK: usize = 2_016;

/// Processes one dequeued inbound message at a time against the pseudo
/// state machine: validate, commit, and re-broadcast what was newly
/// admitted. Generic over the peer transport so the state machine itself
/// can be exercised without a real libp2p swarm.
pub struct GossipWorker<A: ApiClient, B: Broadcaster> {
    chain: Arc<ChainStore>,
    validator: Arc<Validator>,
    mempool: Arc<dyn Mempool>,
    peers: Arc<PeerRegistry>,
    api: A,
    broadcaster: B,
    max_peers: u32,
}

impl<A: ApiClient, B: Broadcaster> GossipWorker<A, B> {
    pub fn new(
        chain: Arc<ChainStore>,
        validator: Arc<Validator>,
        mempool: Arc<dyn Mempool>,
        peers: Arc<PeerRegistry>,
        api: A,
        broadcaster: B,
        max_peers: u32,
    ) -> Self {
        Self {
            chain,
            validator,
            mempool,
            peers,
            api,
            broadcaster,
            max_peers,
        }
    }

    pub async fn handle(&self, inbound: InboundMessage) -> Result<()> {
        match inbound.message {
            GossipMessage::BlockHeader { header } => {
                if inbound.self_originated {
                    let hash = header.hash()?;
                    self.broadcast_to_known(GossipMessage::BlockInv { hashes: vec![hash] }).await?;
                } else {
                    self.process_block_header(&inbound.sender, header).await?;
                }
            }
            GossipMessage::BlockInv { hashes } => {
                for hash in hashes {
                    if self.chain.get_block_header_by_hash(&hash).await?.is_some() {
                        continue;
                    }
                    if let Some(header) = self.api.request_block_header(&inbound.sender, &hash).await? {
                        self.process_block_header(&inbound.sender, header).await?;
                    }
                }
            }
            GossipMessage::UnconfirmedTransaction { transaction } => {
                let valid = if inbound.self_originated {
                    true
                } else {
                    self.validate_transaction(&transaction).await?
                };
                if valid {
                    self.mempool.push_unconfirmed_transaction(transaction.clone()).await?;
                    self.broadcast_to_known(GossipMessage::UnconfirmedTransactionInv {
                        hashes: vec![transaction.tx_hash],
                    })
                    .await?;
                }
            }
            GossipMessage::UnconfirmedTransactionInv { hashes } => {
                let mut admitted = Vec::new();
                for hash in hashes {
                    if self.chain.find_duplicate_transactions(&hash).await? {
                        continue;
                    }
                    if self.mempool.get_unconfirmed_transaction(&hash).await?.is_some() {
                        continue;
                    }
                    if let Some(tx) = self.api.request_transaction(&inbound.sender, &hash).await? {
                        if self.validate_transaction(&tx).await? {
                            self.mempool.push_unconfirmed_transaction(tx.clone()).await?;
                            admitted.push(tx.tx_hash);
                        }
                    }
                }
                if !admitted.is_empty() {
                    self.broadcast_to_known(GossipMessage::UnconfirmedTransactionInv { hashes: admitted })
                        .await?;
                }
            }
            GossipMessage::Synchronize { height, tip_hash } => {
                let our_height = self.chain.get_height().await?;
                let tip_known = self.chain.get_block_header_by_hash(&tip_hash).await?.is_some();
                if height > our_height && !tip_known {
                    if let Some(header) = self.api.request_block_header(&inbound.sender, &tip_hash).await? {
                        self.process_block_header(&inbound.sender, header).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_block_header(&self, sender: &str, header: BlockHeader) -> Result<()> {
        let hash = header.hash()?;
        let tx_inv = self.api.request_transactions_inv(sender, &hash).await?;

        match self.validator.validate_block_header(&header, &tx_inv).await {
            Ok(None) => self.synchronize_walkback(sender, header).await,
            Ok(Some(height)) => self.assemble_and_commit(sender, header, height, tx_inv).await,
            Err(err) => {
                warn!(%err, %hash, "gossip worker: header failed validation");
                Ok(())
            }
        }
    }

    async fn assemble_and_commit(
        &self,
        sender: &str,
        header: BlockHeader,
        height: u64,
        tx_inv: Vec<String>,
    ) -> Result<()> {
        let hash = header.hash()?;
        let (present, missing) = self
            .validator
            .validate_block_transactions_inv(&tx_inv, self.mempool.as_ref())
            .await?;

        let mut by_hash: HashMap<String, Transaction> =
            present.into_iter().map(|t| (t.tx_hash.clone(), t)).collect();
        for missing_hash in &missing {
            if let Some(tx) = self.api.request_transaction(sender, missing_hash).await? {
                by_hash.insert(tx.tx_hash.clone(), tx);
            }
        }

        let mut transactions = Vec::with_capacity(tx_inv.len());
        for (idx, tx_hash) in tx_inv.iter().enumerate() {
            let Some(tx) = by_hash.remove(tx_hash) else {
                warn!(tx_hash, %hash, "gossip worker: could not fetch a transaction, dropping block");
                return Ok(());
            };
            if idx > 0 && !tx.verify() {
                warn!(tx_hash, %hash, "gossip worker: fetched transaction failed verification, dropping block");
                return Ok(());
            }
            transactions.push(tx);
        }

        let block = Block {
            height,
            transactions,
            block_header: header.clone(),
        };
        self.validator.validate_block(&block, &header.merkle_root).await?;
        if self.chain.add_block(&block).await? {
            self.broadcast_to_known(GossipMessage::BlockInv { hashes: vec![hash] }).await?;
        }
        Ok(())
    }

    async fn synchronize_walkback(&self, sender: &str, unknown_header: BlockHeader) -> Result<()> {
        let mut walk = vec![unknown_header];
        for _ in 0..MAX_WALKBACK {
            let cursor = walk.last().expect("walk always has at least one entry").previous_hash.clone();
            if cursor.is_empty() || self.chain.get_block_header_by_hash(&cursor).await?.is_some() {
                break;
            }
            match self.api.request_block_header(sender, &cursor).await? {
                Some(parent) => walk.push(parent),
                None => return Ok(()),
            }
        }
        for header in walk.into_iter().rev() {
            self.process_block_header(sender, header).await?;
        }
        Ok(())
    }

    async fn validate_transaction(&self, tx: &Transaction) -> Result<bool> {
        if !tx.verify() {
            return Ok(false);
        }
        if self.chain.find_duplicate_transactions(&tx.tx_hash).await? {
            return Ok(false);
        }
        let balance = self.chain.get_balance(&tx.source, &tx.asset, PRIMARY_BRANCH).await?;
        Ok(balance >= tx.amount + tx.fee)
    }

    async fn broadcast_to_known(&self, message: GossipMessage) -> Result<()> {
        let peers = self.peers.get_all_peers(self.max_peers).await?;
        self.broadcaster.broadcast(message, &peers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambercoin_chain::build_genesis_block;
    use ambercoin_config::ConsensusConfig;
    use ambercoin_core::{TxType, NATIVE_ASSET_ID, PROTOCOL_ADDRESS};
    use ambercoin_mempool::InMemoryMempool;
    use parking_lot::Mutex;
    use sqlx::SqlitePool;

    fn params() -> ConsensusConfig {
        ConsensusConfig {
            initial_coins_per_block: 50.0,
            halving_frequency: 210_000,
            max_transactions_per_block: 1_000,
            minimum_hash_difficulty: 0,
            target_time_per_block: 600,
            difficulty_adjustment_span: 5,
            significant_digits: 8,
            short_chain_tolerance: 10,
        }
    }

    fn coinbase(prev_hash: &str, amount: f64) -> Transaction {
        let mut tx = Transaction::new(
            PROTOCOL_ADDRESS,
            "miner",
            amount,
            0.0,
            1_700_000_001,
            TxType::Coinbase,
            NATIVE_ASSET_ID,
            "",
            prev_hash,
        );
        tx.recompute_hash();
        tx
    }

    /// Hands back canned responses keyed by what was asked, so the state
    /// machine can be driven deterministically without a real swarm.
    #[derive(Default)]
    struct MockApi {
        headers: HashMap<String, BlockHeader>,
        invs: HashMap<String, Vec<String>>,
        txs: HashMap<String, Transaction>,
    }

    #[async_trait::async_trait]
    impl ApiClient for MockApi {
        async fn request_transactions_inv(&self, _peer: &str, block_hash: &str) -> Result<Vec<String>> {
            Ok(self.invs.get(block_hash).cloned().unwrap_or_default())
        }
        async fn request_block_header(&self, _peer: &str, hash: &str) -> Result<Option<BlockHeader>> {
            Ok(self.headers.get(hash).cloned())
        }
        async fn request_transaction(&self, _peer: &str, tx_hash: &str) -> Result<Option<Transaction>> {
            Ok(self.txs.get(tx_hash).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: Mutex<Vec<(String, GossipMessage)>>,
    }

    #[async_trait::async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn send_to(&self, peer: &str, message: GossipMessage) -> Result<()> {
            self.sent.lock().push((peer.to_string(), message));
            Ok(())
        }
    }

    async fn seeded() -> (Arc<ChainStore>, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.sqlite3");
        let store = ChainStore::connect(path.to_str().unwrap(), 1, params()).await.unwrap();
        let genesis = build_genesis_block().unwrap();
        store.add_block(&genesis).await.unwrap();
        let hash = genesis.hash().unwrap();
        (Arc::new(store), dir, hash)
    }

    async fn peer_registry() -> Arc<PeerRegistry> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        Arc::new(PeerRegistry::connect(pool, 5).await.unwrap())
    }

    #[tokio::test]
    async fn new_block_header_commits_and_rebroadcasts() {
        let (chain, _dir, genesis_hash) = seeded().await;
        let validator = Arc::new(Validator::new(Arc::clone(&chain)));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let peers = peer_registry().await;
        peers.add_peer("peer-a", 0).await.unwrap();

        let reward = chain.get_reward(1);
        let cb = coinbase(&genesis_hash, reward);
        let block = Block::new(1, vec![cb.clone()], genesis_hash.clone(), Some(1_700_000_001), 0).unwrap();
        let header = block.block_header.clone();
        let hash = header.hash().unwrap();

        let mut api = MockApi::default();
        api.invs.insert(hash.clone(), vec![cb.tx_hash.clone()]);
        api.txs.insert(cb.tx_hash.clone(), cb);

        let broadcaster = RecordingBroadcaster::default();
        let worker = GossipWorker::new(Arc::clone(&chain), validator, mempool, peers, api, broadcaster, 10);

        worker
            .handle(InboundMessage {
                sender: "peer-a".into(),
                self_originated: false,
                message: GossipMessage::BlockHeader { header },
            })
            .await
            .unwrap();

        assert_eq!(chain.get_height().await.unwrap(), 1);
        let sent = worker.broadcaster.sent.lock();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            GossipMessage::BlockInv { hashes } => assert_eq!(hashes, &vec![hash]),
            other => panic!("expected BlockInv, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_originated_header_only_broadcasts_inv() {
        let (chain, _dir, genesis_hash) = seeded().await;
        let validator = Arc::new(Validator::new(Arc::clone(&chain)));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let peers = peer_registry().await;
        peers.add_peer("peer-a", 0).await.unwrap();

        let reward = chain.get_reward(1);
        let cb = coinbase(&genesis_hash, reward);
        let block = Block::new(1, vec![cb], genesis_hash, Some(1_700_000_001), 0).unwrap();
        let header = block.block_header.clone();
        let hash = header.hash().unwrap();

        let api = MockApi::default();
        let broadcaster = RecordingBroadcaster::default();
        let worker = GossipWorker::new(chain, validator, mempool, peers, api, broadcaster, 10);

        worker
            .handle(InboundMessage {
                sender: "self".into(),
                self_originated: true,
                message: GossipMessage::BlockHeader { header },
            })
            .await
            .unwrap();

        let sent = worker.broadcaster.sent.lock();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            GossipMessage::BlockInv { hashes } => assert_eq!(hashes, &vec![hash]),
            other => panic!("expected BlockInv, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfirmed_transaction_inv_pulls_and_rebroadcasts_only_new() {
        let (chain, _dir, _genesis_hash) = seeded().await;
        let validator = Arc::new(Validator::new(Arc::clone(&chain)));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let peers = peer_registry().await;
        peers.add_peer("peer-a", 0).await.unwrap();

        let kp = ambercoin_crypto::generate_keypair();
        let mut tx = Transaction::new(
            kp.public_key_hex.clone(),
            "dest",
            1.0,
            0.01,
            1_700_000_002,
            TxType::Standard,
            NATIVE_ASSET_ID,
            "",
            "",
        );
        tx.sign(&kp.private_key_hex).unwrap();

        let mut api = MockApi::default();
        api.txs.insert(tx.tx_hash.clone(), tx.clone());
        let broadcaster = RecordingBroadcaster::default();
        let worker = GossipWorker::new(chain, validator, mempool, peers, api, broadcaster, 10);

        worker
            .handle(InboundMessage {
                sender: "peer-a".into(),
                self_originated: false,
                message: GossipMessage::UnconfirmedTransactionInv {
                    hashes: vec![tx.tx_hash.clone()],
                },
            })
            .await
            .unwrap();

        assert!(worker.mempool.get_unconfirmed_transaction(&tx.tx_hash).await.unwrap().is_some());
        let sent = worker.broadcaster.sent.lock();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn unknown_parent_triggers_walkback_and_commits_in_order() {
        let (chain, _dir, genesis_hash) = seeded().await;
        let validator = Arc::new(Validator::new(Arc::clone(&chain)));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let peers = peer_registry().await;
        peers.add_peer("peer-a", 0).await.unwrap();

        let reward1 = chain.get_reward(1);
        let cb1 = coinbase(&genesis_hash, reward1);
        let block1 = Block::new(1, vec![cb1.clone()], genesis_hash, Some(1_700_000_001), 0).unwrap();
        let hash1 = block1.hash().unwrap();

        let reward2 = chain.get_reward(2);
        let cb2 = coinbase(&hash1, reward2);
        let block2 = Block::new(2, vec![cb2.clone()], hash1.clone(), Some(1_700_000_002), 0).unwrap();
        let hash2 = block2.hash().unwrap();

        let mut api = MockApi::default();
        api.headers.insert(hash1.clone(), block1.block_header.clone());
        api.invs.insert(hash1.clone(), vec![cb1.tx_hash.clone()]);
        api.txs.insert(cb1.tx_hash.clone(), cb1);
        api.invs.insert(hash2.clone(), vec![cb2.tx_hash.clone()]);
        api.txs.insert(cb2.tx_hash.clone(), cb2);

        let broadcaster = RecordingBroadcaster::default();
        let worker = GossipWorker::new(Arc::clone(&chain), validator, mempool, peers, api, broadcaster, 10);

        // Only block2's header arrives first; its parent (block1) is unknown
        // to us, so the worker must walk back, fetch block1, and commit
        // both in height order.
        worker
            .handle(InboundMessage {
                sender: "peer-a".into(),
                self_originated: false,
                message: GossipMessage::BlockHeader {
                    header: block2.block_header.clone(),
                },
            })
            .await
            .unwrap();

        assert_eq!(chain.get_height().await.unwrap(), 2);
        assert!(chain.get_block_header_by_hash(&hash1).await.unwrap().is_some());
        assert!(chain.get_block_header_by_hash(&hash2).await.unwrap().is_some());
    }
}
