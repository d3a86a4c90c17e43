//! Fee-ordered pool of unconfirmed transactions. Two implementations share
//! one trait: an in-memory variant (list + hash-keyed map reconciled under
//! a single lock) and a persistent sqlx-backed variant (a keyed table with
//! a fee index), matching the pool's dual persistent/in-memory design.

use std::collections::HashMap;
use std::str::FromStr;

use ambercoin_core::{Transaction, TxType};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("unknown tx_type in storage: {0}")]
    UnknownTxType(String),
}

pub type Result<T> = std::result::Result<T, MempoolError>;

#[async_trait]
pub trait Mempool: Send + Sync {
    /// Inserts only if `tx_hash` is absent. Returns whether it was newly
    /// admitted.
    async fn push_unconfirmed_transaction(&self, tx: Transaction) -> Result<bool>;
    async fn get_unconfirmed_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>>;
    async fn get_unconfirmed_transactions_count(&self) -> Result<usize>;
    /// Top-`n` by fee, stable among equal fees.
    async fn get_unconfirmed_transactions_chunk(&self, n: usize) -> Result<Vec<Transaction>>;
    async fn get_all_unconfirmed_transactions(&self) -> Result<Vec<Transaction>>;
    async fn remove_unconfirmed_transaction(&self, tx_hash: &str) -> Result<()>;
    async fn remove_unconfirmed_transactions(&self, tx_hashes: &[String]) -> Result<()>;
}

struct Entry {
    seq: u64,
    tx: Transaction,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// In-memory mempool: a hash-keyed map plus an insertion-order counter
/// used to break fee ties, all behind one lock.
pub struct InMemoryMempool {
    state: parking_lot::Mutex<State>,
}

impl InMemoryMempool {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryMempool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mempool for InMemoryMempool {
    async fn push_unconfirmed_transaction(&self, tx: Transaction) -> Result<bool> {
        let mut state = self.state.lock();
        if state.entries.contains_key(&tx.tx_hash) {
            debug!(hash = %tx.tx_hash, "mempool: duplicate push, no-op");
            return Ok(false);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(hash = %tx.tx_hash, fee = tx.fee, "mempool: admitted transaction");
        state.entries.insert(tx.tx_hash.clone(), Entry { seq, tx });
        Ok(true)
    }

    async fn get_unconfirmed_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        Ok(self.state.lock().entries.get(tx_hash).map(|e| e.tx.clone()))
    }

    async fn get_unconfirmed_transactions_count(&self) -> Result<usize> {
        Ok(self.state.lock().entries.len())
    }

    async fn get_unconfirmed_transactions_chunk(&self, n: usize) -> Result<Vec<Transaction>> {
        let state = self.state.lock();
        let mut sorted: Vec<&Entry> = state.entries.values().collect();
        sorted.sort_by(|a, b| b.tx.fee.total_cmp(&a.tx.fee).then(a.seq.cmp(&b.seq)));
        Ok(sorted.into_iter().take(n).map(|e| e.tx.clone()).collect())
    }

    async fn get_all_unconfirmed_transactions(&self) -> Result<Vec<Transaction>> {
        self.get_unconfirmed_transactions_chunk(usize::MAX).await
    }

    async fn remove_unconfirmed_transaction(&self, tx_hash: &str) -> Result<()> {
        self.state.lock().entries.remove(tx_hash);
        Ok(())
    }

    async fn remove_unconfirmed_transactions(&self, tx_hashes: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        for hash in tx_hashes {
            state.entries.remove(hash);
        }
        Ok(())
    }
}

/// Persistent mempool backed by a SQLite table with a `fee` index, for
/// nodes that want unconfirmed transactions to survive a restart.
pub struct SqlMempool {
    pool: SqlitePool,
}

impl SqlMempool {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unconfirmed_transactions (
                hash TEXT PRIMARY KEY,
                src TEXT NOT NULL,
                dest TEXT NOT NULL,
                amount REAL NOT NULL,
                fee REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                signature TEXT NOT NULL,
                tx_type TEXT NOT NULL,
                asset TEXT NOT NULL,
                data TEXT NOT NULL,
                prev_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_unconfirmed_fee ON unconfirmed_transactions(fee DESC);
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn row_to_tx(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let tx_type_str: String = row.try_get("tx_type")?;
        let tx_type = TxType::from_str(&tx_type_str).map_err(MempoolError::UnknownTxType)?;
        Ok(Transaction {
            source: row.try_get("src")?,
            destination: row.try_get("dest")?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            timestamp: row.try_get("timestamp")?,
            tx_type,
            asset: row.try_get("asset")?,
            data: row.try_get("data")?,
            prev_hash: row.try_get("prev_hash")?,
            signature: row.try_get("signature")?,
            tx_hash: row.try_get("hash")?,
        })
    }
}

#[async_trait]
impl Mempool for SqlMempool {
    async fn push_unconfirmed_transaction(&self, tx: Transaction) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO unconfirmed_transactions
                (hash, src, dest, amount, fee, timestamp, signature, tx_type, asset, data, prev_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&tx.tx_hash)
        .bind(&tx.source)
        .bind(&tx.destination)
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(tx.timestamp)
        .bind(&tx.signature)
        .bind(tx.tx_type.as_str())
        .bind(&tx.asset)
        .bind(&tx.data)
        .bind(&tx.prev_hash)
        .execute(&self.pool)
        .await?;
        let admitted = result.rows_affected() > 0;
        debug!(hash = %tx.tx_hash, admitted, "sql mempool: push");
        Ok(admitted)
    }

    async fn get_unconfirmed_transaction(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM unconfirmed_transactions WHERE hash = ?1")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_tx).transpose()
    }

    async fn get_unconfirmed_transactions_count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM unconfirmed_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    async fn get_unconfirmed_transactions_chunk(&self, n: usize) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM unconfirmed_transactions ORDER BY fee DESC, rowid ASC LIMIT ?1",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_tx).collect()
    }

    async fn get_all_unconfirmed_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query("SELECT * FROM unconfirmed_transactions ORDER BY fee DESC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_tx).collect()
    }

    async fn remove_unconfirmed_transaction(&self, tx_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM unconfirmed_transactions WHERE hash = ?1")
            .bind(tx_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_unconfirmed_transactions(&self, tx_hashes: &[String]) -> Result<()> {
        for hash in tx_hashes {
            self.remove_unconfirmed_transaction(hash).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambercoin_core::{NATIVE_ASSET_ID, PROTOCOL_ADDRESS};

    fn tx(hash: &str, fee: f64) -> Transaction {
        let mut t = Transaction::new(
            PROTOCOL_ADDRESS,
            "dest",
            1.0,
            fee,
            0,
            TxType::Standard,
            NATIVE_ASSET_ID,
            "",
            "",
        );
        t.tx_hash = hash.to_string();
        t
    }

    #[tokio::test]
    async fn in_memory_orders_by_fee_descending() {
        let pool = InMemoryMempool::new();
        pool.push_unconfirmed_transaction(tx("a", 0.1)).await.unwrap();
        pool.push_unconfirmed_transaction(tx("b", 0.5)).await.unwrap();
        pool.push_unconfirmed_transaction(tx("c", 0.3)).await.unwrap();
        let chunk = pool.get_unconfirmed_transactions_chunk(10).await.unwrap();
        let hashes: Vec<&str> = chunk.iter().map(|t| t.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn in_memory_push_is_idempotent() {
        let pool = InMemoryMempool::new();
        assert!(pool.push_unconfirmed_transaction(tx("a", 0.1)).await.unwrap());
        assert!(!pool.push_unconfirmed_transaction(tx("a", 0.1)).await.unwrap());
        assert_eq!(pool.get_unconfirmed_transactions_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sql_mempool_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mempool.sqlite3");
        let pool = SqlMempool::connect(path.to_str().unwrap()).await.unwrap();
        pool.push_unconfirmed_transaction(tx("a", 0.2)).await.unwrap();
        pool.push_unconfirmed_transaction(tx("b", 0.9)).await.unwrap();
        let chunk = pool.get_unconfirmed_transactions_chunk(10).await.unwrap();
        assert_eq!(chunk[0].tx_hash, "b");
        pool.remove_unconfirmed_transaction("b").await.unwrap();
        assert_eq!(pool.get_unconfirmed_transactions_count().await.unwrap(), 1);
    }
}
