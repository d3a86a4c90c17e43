use std::sync::Arc;

use ambercoin_chain::{ChainStore, PRIMARY_BRANCH};
use ambercoin_core::{Block, Transaction, TxType, NATIVE_ASSET_ID, PROTOCOL_ADDRESS};
use ambercoin_mempool::Mempool;
use tracing::{debug, info};

use crate::error::Result;

/// Drives the proof-of-work loop for a single candidate block. Meant to run
/// as one dedicated task; every nonce iteration re-checks the store's tip
/// and bails out the instant a competing block preempts the one being
/// mined.
pub struct Miner {
    chain: Arc<ChainStore>,
}

impl Miner {
    pub fn new(chain: Arc<ChainStore>) -> Self {
        Self { chain }
    }

    /// Assembles a candidate block on top of the current tallest header and
    /// mines it. Returns `Ok(None)` if a competing tip preempted this
    /// attempt before a valid nonce was found.
    pub async fn mine_candidate(
        &self,
        mempool: &dyn Mempool,
        miner_address: &str,
        max_transactions: usize,
    ) -> Result<Option<Block>> {
        let (previous_hash, height) = match self.chain.get_tallest_block_header(PRIMARY_BRANCH).await? {
            Some((header, _, tip_height)) => (header.hash()?, tip_height + 1),
            None => (String::new(), 1),
        };

        let coinbase_prev_hash = if previous_hash.is_empty() {
            "0".to_string()
        } else {
            self.chain
                .get_coinbase_hash_by_block_hash(&previous_hash)
                .await?
                .unwrap_or_else(|| "0".to_string())
        };

        let mut transactions = mempool
            .get_unconfirmed_transactions_chunk(max_transactions)
            .await?;
        let fees: f64 = transactions.iter().map(|t| t.fee).sum();
        let reward = self.chain.get_reward(height);

        let mut coinbase = Transaction::new(
            PROTOCOL_ADDRESS,
            miner_address,
            reward + fees,
            0.0,
            now_seconds(),
            TxType::Coinbase,
            NATIVE_ASSET_ID,
            "",
            &coinbase_prev_hash,
        );
        coinbase.signature = String::new();
        coinbase.recompute_hash();
        transactions.insert(0, coinbase);

        let mut block = Block::new(height, transactions, previous_hash.clone(), None, 0)?;
        let target_difficulty = self.chain.calculate_hash_difficulty(height).await?;

        debug!(height, target_difficulty, "miner: starting PoW loop");
        loop {
            if block.block_header.hash_difficulty()? >= target_difficulty {
                info!(height, hash = %block.hash()?, "miner: found valid nonce");
                return Ok(Some(block));
            }

            match self.chain.get_tallest_block_header(PRIMARY_BRANCH).await? {
                Some((tallest_header, _, tallest_height)) => {
                    let tallest_hash = tallest_header.hash()?;
                    if tallest_height >= height || (!previous_hash.is_empty() && tallest_hash != previous_hash) {
                        debug!(height, "miner: preempted by a new tip, aborting");
                        return Ok(None);
                    }
                }
                None if !previous_hash.is_empty() => {
                    debug!(height, "miner: tip vanished out from under us, aborting");
                    return Ok(None);
                }
                None => {}
            }

            block.set_nonce(block.block_header.nonce.wrapping_add(1));
        }
    }
}

fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambercoin_chain::build_genesis_block;
    use ambercoin_config::ConsensusConfig;
    use ambercoin_mempool::InMemoryMempool;

    fn params() -> ConsensusConfig {
        ConsensusConfig {
            initial_coins_per_block: 50.0,
            halving_frequency: 210_000,
            max_transactions_per_block: 1_000,
            // difficulty 0 so the PoW loop succeeds on the first nonce in tests.
            minimum_hash_difficulty: 0,
            target_time_per_block: 600,
            difficulty_adjustment_span: 5,
            significant_digits: 8,
            short_chain_tolerance: 10,
        }
    }

    #[tokio::test]
    async fn mines_on_top_of_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.sqlite3");
        let store = ChainStore::connect(path.to_str().unwrap(), 1, params()).await.unwrap();
        let genesis = build_genesis_block().unwrap();
        store.add_block(&genesis).await.unwrap();
        let genesis_hash = genesis.hash().unwrap();

        let miner = Miner::new(Arc::new(store));
        let mempool = InMemoryMempool::new();
        let block = miner
            .mine_candidate(&mempool, "miner-addr", 1_000)
            .await
            .unwrap()
            .expect("mining should succeed against a minimum difficulty of zero");

        assert_eq!(block.height, 1);
        assert_eq!(block.block_header.previous_hash, genesis_hash);
        assert_eq!(block.transactions[0].tx_type, TxType::Coinbase);
        assert_eq!(block.transactions[0].destination, "miner-addr");
    }

    #[tokio::test]
    async fn preempted_by_concurrent_tip_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.sqlite3");
        let mut mining_params = params();
        mining_params.minimum_hash_difficulty = 64; // unreachable within the test's budget
        let store = Arc::new(
            ChainStore::connect(path.to_str().unwrap(), 1, mining_params)
                .await
                .unwrap(),
        );
        let genesis = build_genesis_block().unwrap();
        store.add_block(&genesis).await.unwrap();
        let genesis_hash = genesis.hash().unwrap();

        // Start mining against an unreachable difficulty so the PoW loop
        // keeps re-checking the tip instead of finishing immediately.
        let mining_store = Arc::clone(&store);
        let miner_task = tokio::spawn(async move {
            let miner = Miner::new(mining_store);
            let mempool = InMemoryMempool::new();
            miner.mine_candidate(&mempool, "miner-addr", 1_000).await
        });

        // Race a competing block onto the same parent while the miner is
        // still spinning; it must notice on its next tip check and bail.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let reward = store.get_reward(1);
        let mut coinbase = Transaction::new(
            PROTOCOL_ADDRESS,
            "other-miner",
            reward,
            0.0,
            1_700_000_001,
            TxType::Coinbase,
            NATIVE_ASSET_ID,
            "",
            "0",
        );
        coinbase.recompute_hash();
        let competing = Block::new(1, vec![coinbase], genesis_hash, Some(1_700_000_001), 0).unwrap();
        store.add_block(&competing).await.unwrap();

        let result = miner_task.await.unwrap().unwrap();
        assert!(result.is_none());
    }
}
