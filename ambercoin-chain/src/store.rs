use ambercoin_config::ConsensusConfig;
use ambercoin_core::{Block, BlockHeader, CoreError, Transaction};
use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Sqlite, SqlitePool, Transaction as SqlxTransaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ChainError, Result};
use crate::reward;
use crate::rows::{assemble_block, BlockRow, TransactionRow};

pub const PRIMARY_BRANCH: i64 = 0;

/// Durable, multi-branch block and transaction repository. All mutating
/// operations (`add_block`, `restructure_primary_branch`, `prune`) run
/// serialized behind `write_lock`; readers go straight to the pool and see
/// whatever snapshot SQLite's own transaction semantics give them.
pub struct ChainStore {
    pool: SqlitePool,
    params: ConsensusConfig,
    write_lock: Mutex<()>,
}

impl ChainStore {
    pub async fn connect(db_path: &str, pool_size: u32, params: ConsensusConfig) -> Result<Self> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(db_path)
            .map_err(ChainError::Sql)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .disable_statement_logging();
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            params,
            write_lock: Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                hash TEXT PRIMARY KEY,
                prevhash TEXT NOT NULL,
                merkle_root TEXT NOT NULL,
                height INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                version INTEGER NOT NULL,
                branch INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_prevhash ON blocks(prevhash);
            CREATE INDEX IF NOT EXISTS idx_blocks_branch_height ON blocks(branch, height);

            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                src TEXT NOT NULL,
                dest TEXT NOT NULL,
                amount REAL NOT NULL,
                fee REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                signature TEXT NOT NULL,
                tx_type TEXT NOT NULL,
                block_hash TEXT NOT NULL,
                asset TEXT NOT NULL,
                data TEXT NOT NULL,
                branch INTEGER NOT NULL,
                prev_hash TEXT NOT NULL,
                tx_index INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tx_block_hash ON transactions(block_hash);
            CREATE INDEX IF NOT EXISTS idx_tx_src_dest ON transactions(src, dest);

            CREATE TABLE IF NOT EXISTS branches (
                id INTEGER PRIMARY KEY,
                current_hash TEXT NOT NULL,
                current_height INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO branches (id, current_hash, current_height) VALUES (0, '', 0)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Synthesizes the genesis block deterministically on first boot, or
    /// verifies a bit-for-bit match against what's already stored. A
    /// mismatch is fatal, per the genesis-mismatch design note.
    pub async fn ensure_genesis(&self, genesis: &Block) -> Result<()> {
        let expected_hash = genesis.hash()?;
        match self.get_block_header_by_height(0, PRIMARY_BRANCH).await? {
            None => {
                self.add_block(genesis).await?;
                info!(hash = %expected_hash, "synthesized genesis block");
                Ok(())
            }
            Some((header, _, _)) => {
                let observed_hash = header.hash()?;
                if observed_hash != expected_hash {
                    return Err(ChainError::Core(CoreError::GenesisMismatch(format!(
                        "expected {expected_hash}, found {observed_hash}"
                    ))));
                }
                Ok(())
            }
        }
    }

    pub async fn add_block(&self, block: &Block) -> Result<bool> {
        let hash = block.hash()?;
        let _guard = self.write_lock.lock().await;

        if block_row_by_hash(&self.pool, &hash).await?.is_some() {
            debug!(%hash, "add_block: already present, no-op");
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        let prev_hash = block.block_header.previous_hash.clone();
        let parent_branch = branch_for_hash(&mut tx, &prev_hash).await?;
        let tallest = tallest_branch_row(&mut tx).await?;
        let mut branch = parent_branch.unwrap_or(PRIMARY_BRANCH);

        let becomes_tallest = match tallest.as_ref() {
            Some((_, height, _)) => block.height as i64 > *height,
            None => true,
        };

        if becomes_tallest {
            if branch > PRIMARY_BRANCH {
                self.restructure_primary_branch(&mut tx, branch).await?;
                branch = PRIMARY_BRANCH;
            }
        } else if has_child_with_prevhash(&mut tx, &prev_hash, branch).await? {
            branch = new_branch_id(&mut tx).await?;
        }

        insert_block_and_txs(&mut tx, block, &hash, branch).await?;
        set_branch_tip(&mut tx, branch, &hash, block.height as i64).await?;

        tx.commit().await?;
        info!(%hash, height = block.height, branch, "block committed");
        Ok(true)
    }

    /// Walks the alternate branch back to its fork point with branch 0,
    /// then swaps labels so the alternate becomes branch 0 and the
    /// displaced primary segment becomes `new_branch`.
    async fn restructure_primary_branch(
        &self,
        tx: &mut SqlxTransaction<'_, Sqlite>,
        new_branch: i64,
    ) -> Result<()> {
        let (_, original_tip_height, original_tip_hash) = branch_row(&mut *tx, new_branch)
            .await?
            .ok_or_else(|| ChainError::ChainContinuity(format!("unknown branch {new_branch}")))?;

        let mut walked = Vec::new();
        let mut cursor = original_tip_hash.clone();
        let fork_height;
        loop {
            let row = block_row_by_hash(&mut *tx, &cursor).await?.ok_or_else(|| {
                ChainError::ChainContinuity(format!("missing block {cursor} while walking branch {new_branch}"))
            })?;
            if row.branch == PRIMARY_BRANCH {
                fork_height = row.height;
                break;
            }
            walked.push(cursor.clone());
            cursor = row.prevhash;
        }
        let fork_hash = cursor;

        let (_, prior_tallest_height, _) = branch_row(&mut *tx, PRIMARY_BRANCH)
            .await?
            .expect("branch 0 always exists");

        let displaced = hashes_range(&mut *tx, fork_height + 1, prior_tallest_height, PRIMARY_BRANCH).await?;

        for hash in &walked {
            relabel_block(&mut *tx, hash, PRIMARY_BRANCH).await?;
        }
        for hash in &displaced {
            relabel_block(&mut *tx, hash, new_branch).await?;
        }

        set_branch_tip(&mut *tx, PRIMARY_BRANCH, &original_tip_hash, original_tip_height).await?;
        match displaced.last() {
            Some(tip) => set_branch_tip(&mut *tx, new_branch, tip, prior_tallest_height).await?,
            None => set_branch_tip(&mut *tx, new_branch, &fork_hash, fork_height).await?,
        }

        warn!(new_branch, fork_height, "primary branch restructured");
        Ok(())
    }

    pub async fn get_height(&self) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT MAX(current_height) FROM branches").fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.0).unwrap_or(0) as u64)
    }

    pub async fn get_tallest_block_header(&self, branch: i64) -> Result<Option<(BlockHeader, i64, u64)>> {
        let Some((_, _, hash)) = branch_row(&self.pool, branch).await? else {
            return Ok(None);
        };
        if hash.is_empty() {
            return Ok(None);
        }
        self.get_block_header_by_hash(&hash).await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let Some(block_row) = block_row_by_hash(&self.pool, hash).await? else {
            return Ok(None);
        };
        let tx_rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions WHERE block_hash = ?1 ORDER BY tx_index ASC",
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(assemble_block(block_row, tx_rows)?))
    }

    pub async fn get_block_header_by_hash(&self, hash: &str) -> Result<Option<(BlockHeader, i64, u64)>> {
        let Some(row) = block_row_by_hash(&self.pool, hash).await? else {
            return Ok(None);
        };
        let branch = row.branch;
        let height = row.height as u64;
        Ok(Some((row.into_header(), branch, height)))
    }

    pub async fn get_block_header_by_height(
        &self,
        height: u64,
        branch: i64,
    ) -> Result<Option<(BlockHeader, i64, u64)>> {
        let row: Option<BlockRow> =
            sqlx::query_as("SELECT * FROM blocks WHERE height = ?1 AND branch = ?2")
                .bind(height as i64)
                .bind(branch)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| {
            let branch = r.branch;
            let height = r.height as u64;
            (r.into_header(), branch, height)
        }))
    }

    pub async fn get_branch_by_hash(&self, hash: &str) -> Result<i64> {
        Ok(branch_for_hash(&self.pool, hash).await?.unwrap_or(PRIMARY_BRANCH))
    }

    pub async fn get_branches_by_prevhash(&self, prev_hash: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT b.id FROM branches b JOIN blocks bl ON bl.hash = b.current_hash WHERE bl.prevhash = ?1",
        )
        .bind(prev_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn get_hashes_range(&self, start_h: u64, end_h: u64, branch: i64) -> Result<Vec<String>> {
        hashes_range(&self.pool, start_h as i64, end_h as i64, branch).await
    }

    /// A `Vec` stands in for the "lazy sequence" the spec describes;
    /// SQLite under sqlx doesn't give us a cheap async cursor worth the
    /// extra plumbing at the row counts this store deals with.
    pub async fn get_block_headers_range_iter(
        &self,
        start_h: u64,
        end_h: u64,
        branch: i64,
    ) -> Result<Vec<BlockHeader>> {
        let rows: Vec<BlockRow> = sqlx::query_as(
            "SELECT * FROM blocks WHERE branch = ?1 AND height BETWEEN ?2 AND ?3 ORDER BY height ASC",
        )
        .bind(branch)
        .bind(start_h as i64)
        .bind(end_h as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_header()).collect())
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        let row: Option<TransactionRow> =
            sqlx::query_as("SELECT * FROM transactions WHERE hash = ?1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.into_transaction()).transpose()
    }

    pub async fn get_transactions_by_block_hash(&self, block_hash: &str) -> Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions WHERE block_hash = ?1 ORDER BY tx_index ASC",
        )
        .bind(block_hash)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_transaction()).collect()
    }

    pub async fn get_transaction_hashes_by_block_hash(&self, block_hash: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT hash FROM transactions WHERE block_hash = ?1 ORDER BY tx_index ASC",
        )
        .bind(block_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn get_coinbase_hash_by_block_hash(&self, block_hash: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT hash FROM transactions WHERE block_hash = ?1 AND tx_index = 0",
        )
        .bind(block_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn get_balance(&self, addr: &str, asset: &str, branch: i64) -> Result<f64> {
        let incoming: (Option<f64>,) = sqlx::query_as(
            "SELECT SUM(amount) FROM transactions WHERE dest = ?1 AND asset = ?2 AND branch = ?3",
        )
        .bind(addr)
        .bind(asset)
        .bind(branch)
        .fetch_one(&self.pool)
        .await?;
        let outgoing: (Option<f64>,) = sqlx::query_as(
            "SELECT SUM(amount + fee) FROM transactions WHERE src = ?1 AND asset = ?2 AND branch = ?3",
        )
        .bind(addr)
        .bind(asset)
        .bind(branch)
        .fetch_one(&self.pool)
        .await?;
        Ok(incoming.0.unwrap_or(0.0) - outgoing.0.unwrap_or(0.0))
    }

    pub async fn get_transaction_history(&self, addr: &str, branch: i64) -> Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT * FROM transactions WHERE (src = ?1 OR dest = ?1) AND branch = ?2 ORDER BY timestamp ASC",
        )
        .bind(addr)
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_transaction()).collect()
    }

    pub async fn find_duplicate_transactions(&self, tx_hash: &str) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM transactions WHERE hash = ?1)")
            .bind(tx_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 != 0)
    }

    pub fn get_reward(&self, height: u64) -> f64 {
        reward::get_reward(&self.params, height)
    }

    /// Every `DIFFICULTY_ADJUSTMENT_SPAN` blocks, compares the elapsed time
    /// of the preceding span to `TARGET_TIME_PER_BLOCK * span`: faster
    /// raises difficulty by one, slower lowers it by one, equal leaves it
    /// unchanged. Below the first span boundary, returns the network
    /// minimum.
    pub async fn calculate_hash_difficulty(&self, height: u64) -> Result<u32> {
        let span = self.params.difficulty_adjustment_span;
        if height <= span {
            return Ok(self.params.minimum_hash_difficulty);
        }

        let (parent_header, _, _) = self
            .get_block_header_by_height(height - 1, PRIMARY_BRANCH)
            .await?
            .ok_or_else(|| ChainError::ChainContinuity(format!("missing header at height {}", height - 1)))?;
        let prior_difficulty = parent_header.hash_difficulty()?;

        let (span_start_header, _, _) = self
            .get_block_header_by_height(height - 1 - span, PRIMARY_BRANCH)
            .await?
            .ok_or_else(|| {
                ChainError::ChainContinuity(format!("missing header at height {}", height - 1 - span))
            })?;

        let timestamp_delta = parent_header.timestamp as i64 - span_start_header.timestamp as i64;
        let target = self.params.target_time_per_block as i64 * span as i64;

        let next = match timestamp_delta.cmp(&target) {
            std::cmp::Ordering::Less => prior_difficulty + 1,
            std::cmp::Ordering::Greater => prior_difficulty.saturating_sub(1),
            std::cmp::Ordering::Equal => prior_difficulty,
        };
        Ok(next.max(self.params.minimum_hash_difficulty))
    }

    /// Deletes every branch whose tip has fallen more than
    /// `SHORT_CHAIN_TOLERANCE` below the tallest block, cascading their
    /// blocks and transactions. Branch 0 is never pruned.
    pub async fn prune(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let tallest = self.get_height().await?;
        let threshold = tallest.saturating_sub(self.params.short_chain_tolerance);

        let stale: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM branches WHERE id != 0 AND current_height < ?1",
        )
        .bind(threshold as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        for (branch_id,) in &stale {
            sqlx::query("DELETE FROM transactions WHERE branch = ?1").bind(branch_id).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM blocks WHERE branch = ?1").bind(branch_id).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM branches WHERE id = ?1").bind(branch_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(stale.len() as u64)
    }
}

async fn block_row_by_hash<'e, E>(executor: E, hash: &str) -> Result<Option<BlockRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_as("SELECT * FROM blocks WHERE hash = ?1")
        .bind(hash)
        .fetch_optional(executor)
        .await?)
}

async fn branch_for_hash<'e, E>(executor: E, hash: &str) -> Result<Option<i64>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT branch FROM blocks WHERE hash = ?1")
        .bind(hash)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|r| r.0))
}

async fn branch_row<'e, E>(executor: E, branch: i64) -> Result<Option<(i64, i64, String)>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64, String, i64)> =
        sqlx::query_as("SELECT id, current_hash, current_height FROM branches WHERE id = ?1")
            .bind(branch)
            .fetch_optional(executor)
            .await?;
    Ok(row.map(|(id, hash, height)| (id, height, hash)))
}

async fn tallest_branch_row<'e, E>(executor: E) -> Result<Option<(i64, i64, String)>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64, String, i64)> = sqlx::query_as(
        "SELECT id, current_hash, current_height FROM branches ORDER BY current_height DESC, id ASC LIMIT 1",
    )
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(id, hash, height)| (id, height, hash)))
}

async fn has_child_with_prevhash<'e, E>(executor: E, prev_hash: &str, branch: i64) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM blocks WHERE prevhash = ?1 AND branch = ?2)",
    )
    .bind(prev_hash)
    .bind(branch)
    .fetch_one(executor)
    .await?;
    Ok(row.0 != 0)
}

async fn new_branch_id(tx: &mut SqlxTransaction<'_, Sqlite>) -> Result<i64> {
    let result = sqlx::query("INSERT INTO branches (current_hash, current_height) VALUES ('', 0)")
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn set_branch_tip<'e, E>(executor: E, branch: i64, hash: &str, height: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO branches (id, current_hash, current_height) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET current_hash = excluded.current_hash, current_height = excluded.current_height",
    )
    .bind(branch)
    .bind(hash)
    .bind(height)
    .execute(executor)
    .await?;
    Ok(())
}

async fn relabel_block(tx: &mut SqlxTransaction<'_, Sqlite>, hash: &str, branch: i64) -> Result<()> {
    sqlx::query("UPDATE blocks SET branch = ?2 WHERE hash = ?1")
        .bind(hash)
        .bind(branch)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE transactions SET branch = ?2 WHERE block_hash = ?1")
        .bind(hash)
        .bind(branch)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn hashes_range<'e, E>(executor: E, start_h: i64, end_h: i64, branch: i64) -> Result<Vec<String>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT hash FROM blocks WHERE branch = ?1 AND height BETWEEN ?2 AND ?3 ORDER BY height ASC",
    )
    .bind(branch)
    .bind(start_h)
    .bind(end_h)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

async fn insert_block_and_txs(
    tx: &mut SqlxTransaction<'_, Sqlite>,
    block: &Block,
    hash: &str,
    branch: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO blocks (hash, prevhash, merkle_root, height, nonce, timestamp, version, branch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(hash)
    .bind(&block.block_header.previous_hash)
    .bind(&block.block_header.merkle_root)
    .bind(block.height as i64)
    .bind(block.block_header.nonce as i64)
    .bind(block.block_header.timestamp as i64)
    .bind(block.block_header.version as i64)
    .bind(branch)
    .execute(&mut **tx)
    .await?;

    for (index, transaction) in block.transactions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO transactions
                (hash, src, dest, amount, fee, timestamp, signature, tx_type, block_hash, asset, data, branch, prev_hash, tx_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&transaction.tx_hash)
        .bind(&transaction.source)
        .bind(&transaction.destination)
        .bind(transaction.amount)
        .bind(transaction.fee)
        .bind(transaction.timestamp)
        .bind(&transaction.signature)
        .bind(transaction.tx_type.as_str())
        .bind(hash)
        .bind(&transaction.asset)
        .bind(&transaction.data)
        .bind(branch)
        .bind(&transaction.prev_hash)
        .bind(index as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
