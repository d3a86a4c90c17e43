use std::sync::Arc;

use ambercoin_chain::{ChainStore, PRIMARY_BRANCH};
use ambercoin_core::{merkle_root, BlockHeader, TxType, BLOCK_VERSION};
use ambercoin_mempool::Mempool;

use crate::error::{ConsensusError, Result};

/// Stateless and stateful header/block rules. Holds no state of its own
/// beyond a handle to the chain it validates against.
pub struct Validator {
    chain: Arc<ChainStore>,
}

impl Validator {
    pub fn new(chain: Arc<ChainStore>) -> Self {
        Self { chain }
    }

    /// Returns the candidate height on success. Returns `Ok(None)` when the
    /// header's parent is unknown — callers must treat that as "out of
    /// sync" and synchronize against the header's sender rather than as a
    /// validation failure.
    pub async fn validate_block_header(
        &self,
        header: &BlockHeader,
        ordered_tx_hashes: &[String],
    ) -> Result<Option<u64>> {
        if header.version != BLOCK_VERSION {
            return Err(ConsensusError::VersionMismatch {
                expected: BLOCK_VERSION,
                got: header.version,
            });
        }

        let hash = header.hash()?;
        if self.chain.get_block_header_by_hash(&hash).await?.is_some() {
            return Err(ConsensusError::DuplicateBlock(hash));
        }

        let Some((_, _, parent_height)) =
            self.chain.get_block_header_by_hash(&header.previous_hash).await?
        else {
            return Ok(None);
        };
        let candidate_height = parent_height + 1;

        let required = self.chain.calculate_hash_difficulty(candidate_height).await?;
        let actual = header.hash_difficulty()?;
        if actual < required {
            return Err(ConsensusError::InsufficientDifficulty {
                actual,
                required,
            });
        }

        let expected_root = merkle_root(ordered_tx_hashes);
        if header.merkle_root != expected_root {
            return Err(ConsensusError::MerkleMismatch);
        }

        Ok(Some(candidate_height))
    }

    /// Full block-contents check: transaction ordering against the header's
    /// Merkle root, the coinbase/reward invariant, and per-transaction
    /// signature, duplication, and balance checks.
    pub async fn validate_block(
        &self,
        block: &ambercoin_core::Block,
        merkle_root_from_header: &str,
    ) -> Result<()> {
        let tx_hashes: Vec<String> = block.transactions.iter().map(|t| t.tx_hash.clone()).collect();
        if merkle_root(&tx_hashes) != merkle_root_from_header {
            return Err(ConsensusError::MerkleMismatch);
        }

        self.check_block_reward(block).await?;

        for tx in block.transactions.iter().skip(1) {
            if tx.tx_type == TxType::Coinbase {
                return Err(ConsensusError::InvalidCoinbase(
                    "more than one coinbase transaction in block".into(),
                ));
            }
            if !tx.verify() {
                return Err(ConsensusError::BadSignature(tx.tx_hash.clone()));
            }
            if self.chain.find_duplicate_transactions(&tx.tx_hash).await? {
                return Err(ConsensusError::DuplicateTransaction(tx.tx_hash.clone()));
            }
            let balance = self.chain.get_balance(&tx.source, &tx.asset, PRIMARY_BRANCH).await?;
            if balance < tx.amount + tx.fee {
                return Err(ConsensusError::InsufficientBalance(tx.source.clone()));
            }
        }

        Ok(())
    }

    async fn check_block_reward(&self, block: &ambercoin_core::Block) -> Result<()> {
        let coinbase = block
            .transactions
            .first()
            .ok_or_else(|| ConsensusError::InvalidCoinbase("block has no transactions".into()))?;

        if coinbase.tx_type == TxType::Genesis {
            return Ok(());
        }
        if coinbase.tx_type != TxType::Coinbase {
            return Err(ConsensusError::InvalidCoinbase(
                "transactions[0] is not a coinbase".into(),
            ));
        }
        if coinbase.source != ambercoin_core::PROTOCOL_ADDRESS {
            return Err(ConsensusError::InvalidCoinbase(
                "coinbase source must be the protocol address".into(),
            ));
        }

        let fees: f64 = block.transactions[1..].iter().map(|t| t.fee).sum();
        let expected = self.chain.get_reward(block.height) + fees;
        if (coinbase.amount - expected).abs() > 1e-8 {
            return Err(ConsensusError::InvalidCoinbase(format!(
                "coinbase amount {} does not match reward+fees {}",
                coinbase.amount, expected
            )));
        }
        Ok(())
    }

    /// Splits an inventory of transaction hashes into those already sitting
    /// in the mempool and those that still need to be requested. Fails
    /// immediately if any hash is already confirmed on any branch.
    pub async fn validate_block_transactions_inv(
        &self,
        tx_hashes: &[String],
        mempool: &dyn Mempool,
    ) -> Result<(Vec<ambercoin_core::Transaction>, Vec<String>)> {
        let mut present = Vec::new();
        let mut missing = Vec::new();
        for hash in tx_hashes {
            if self.chain.find_duplicate_transactions(hash).await? {
                return Err(ConsensusError::DuplicateTransaction(hash.clone()));
            }
            match mempool.get_unconfirmed_transaction(hash).await? {
                Some(tx) => present.push(tx),
                None => missing.push(hash.clone()),
            }
        }
        Ok((present, missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambercoin_chain::build_genesis_block;
    use ambercoin_config::ConsensusConfig;
    use ambercoin_core::{Block, Transaction, NATIVE_ASSET_ID, PROTOCOL_ADDRESS};
    use ambercoin_mempool::InMemoryMempool;

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

    async fn seeded_store() -> (Arc<ChainStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.sqlite3");
        let store = ChainStore::connect(path.to_str().unwrap(), 1, params()).await.unwrap();
        let genesis = build_genesis_block().unwrap();
        store.add_block(&genesis).await.unwrap();
        (Arc::new(store), dir)
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

    #[tokio::test]
    async fn unknown_parent_yields_sentinel() {
        let (store, _dir) = seeded_store().await;
        let validator = Validator::new(store);
        let header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash: "not-a-real-hash".into(),
            merkle_root: String::new(),
            timestamp: 1_700_000_001,
            nonce: 0,
        };
        let outcome = validator.validate_block_header(&header, &[]).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn reward_mismatch_is_rejected() {
        let (store, _dir) = seeded_store().await;
        let genesis_hash = build_genesis_block().unwrap().hash().unwrap();
        let cb = coinbase(&genesis_hash, 999.0);
        let block = Block::new(1, vec![cb], genesis_hash, Some(1_700_000_001), 0).unwrap();
        let validator = Validator::new(store);
        let err = validator
            .validate_block(&block, &block.block_header.merkle_root)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidCoinbase(_)));
    }

    #[tokio::test]
    async fn reward_matching_coinbase_passes() {
        let (store, _dir) = seeded_store().await;
        let genesis_hash = build_genesis_block().unwrap().hash().unwrap();
        let reward = store.get_reward(1);
        let cb = coinbase(&genesis_hash, reward);
        let block = Block::new(1, vec![cb], genesis_hash, Some(1_700_000_001), 0).unwrap();
        let validator = Validator::new(store);
        validator
            .validate_block(&block, &block.block_header.merkle_root)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transactions_inv_splits_mempool_hits_from_missing() {
        let (store, _dir) = seeded_store().await;
        let mempool = InMemoryMempool::new();
        let known = coinbase("prev", 1.0);
        mempool
            .push_unconfirmed_transaction(known.clone())
            .await
            .unwrap();
        let validator = Validator::new(store);
        let (present, missing) = validator
            .validate_block_transactions_inv(&[known.tx_hash.clone(), "absent".into()], &mempool)
            .await
            .unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(missing, vec!["absent".to_string()]);
    }
}
