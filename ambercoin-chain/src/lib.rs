//! Durable multi-branch block and transaction repository: the chain
//! store, branch reorganization, reward/difficulty arithmetic, and the
//! deterministic genesis block.

mod error;
mod genesis;
mod reward;
mod rows;
mod store;

pub use error::{ChainError, Result};
pub use genesis::build_genesis_block;
pub use reward::get_reward;
pub use store::{ChainStore, PRIMARY_BRANCH};

#[cfg(test)]
mod tests {
    use super::*;
    use ambercoin_config::ConsensusConfig;
    use ambercoin_core::{Block, Transaction, TxType, NATIVE_ASSET_ID, PROTOCOL_ADDRESS};

    fn params() -> ConsensusConfig {
        ConsensusConfig {
            initial_coins_per_block: 50.0,
            halving_frequency: 210_000,
            max_transactions_per_block: 1_000,
            minimum_hash_difficulty: 1,
            target_time_per_block: 600,
            difficulty_adjustment_span: 5,
            significant_digits: 8,
            short_chain_tolerance: 10,
        }
    }

    async fn temp_store() -> (ChainStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.sqlite3");
        let store = ChainStore::connect(path.to_str().unwrap(), 1, params()).await.unwrap();
        (store, dir)
    }

    fn coinbase(prev_hash: &str, height: u64, store_reward: f64, fees: f64) -> Transaction {
        let mut tx = Transaction::new(
            PROTOCOL_ADDRESS,
            "miner",
            store_reward + fees,
            0.0,
            1_700_000_000 + height as i64,
            TxType::Coinbase,
            NATIVE_ASSET_ID,
            "",
            prev_hash,
        );
        tx.recompute_hash();
        tx
    }

    fn mined_block(height: u64, previous_hash: &str, reward: f64) -> Block {
        let cb = coinbase(previous_hash, height, reward, 0.0);
        Block::new(height, vec![cb], previous_hash.to_string(), Some(1_700_000_000 + height as u32), 0).unwrap()
    }

    #[tokio::test]
    async fn add_block_extends_primary_branch() {
        let (store, _dir) = temp_store().await;
        let genesis = build_genesis_block().unwrap();
        assert!(store.add_block(&genesis).await.unwrap());
        assert_eq!(store.get_height().await.unwrap(), 0);

        let b1 = mined_block(1, &genesis.hash().unwrap(), store.get_reward(1));
        assert!(store.add_block(&b1).await.unwrap());
        assert_eq!(store.get_height().await.unwrap(), 1);
        assert_eq!(store.get_branch_by_hash(&b1.hash().unwrap()).await.unwrap(), PRIMARY_BRANCH);
    }

    #[tokio::test]
    async fn add_block_is_idempotent() {
        let (store, _dir) = temp_store().await;
        let genesis = build_genesis_block().unwrap();
        assert!(store.add_block(&genesis).await.unwrap());
        assert!(!store.add_block(&genesis).await.unwrap());
    }

    #[tokio::test]
    async fn fork_then_reorg_swaps_branch_labels() {
        let (store, _dir) = temp_store().await;
        let genesis = build_genesis_block().unwrap();
        store.add_block(&genesis).await.unwrap();
        let genesis_hash = genesis.hash().unwrap();

        let b1a = mined_block(1, &genesis_hash, store.get_reward(1));
        store.add_block(&b1a).await.unwrap();
        let hash_1a = b1a.hash().unwrap();

        // A competing block at height 1 forks off branch 0.
        let mut b1b = mined_block(1, &genesis_hash, store.get_reward(1));
        b1b.set_nonce(b1a.block_header.nonce + 1);
        // distinct coinbase destination to get a distinct hash
        b1b.transactions[0].destination = "other-miner".into();
        b1b.transactions[0].recompute_hash();
        b1b.block_header.merkle_root =
            ambercoin_core::merkle_root(&[b1b.transactions[0].tx_hash.clone()]);
        let hash_1b = b1b.hash().unwrap();
        assert!(store.add_block(&b1b).await.unwrap());
        assert_eq!(store.get_branch_by_hash(&hash_1b).await.unwrap(), 1);
        assert_eq!(store.get_branch_by_hash(&hash_1a).await.unwrap(), PRIMARY_BRANCH);

        // Now extend the fork past the primary tip: triggers a restructure.
        let b2b = mined_block(2, &hash_1b, store.get_reward(2));
        let hash_2b = b2b.hash().unwrap();
        assert!(store.add_block(&b2b).await.unwrap());

        assert_eq!(store.get_height().await.unwrap(), 2);
        assert_eq!(store.get_branch_by_hash(&hash_2b).await.unwrap(), PRIMARY_BRANCH);
        assert_eq!(store.get_branch_by_hash(&hash_1b).await.unwrap(), PRIMARY_BRANCH);
        assert_eq!(store.get_branch_by_hash(&hash_1a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn difficulty_floor_holds_below_first_span() {
        let (store, _dir) = temp_store().await;
        assert_eq!(store.calculate_hash_difficulty(1).await.unwrap(), 1);
        assert_eq!(store.calculate_hash_difficulty(5).await.unwrap(), 1);
    }
}
