use ambercoin_core::{Block, BlockHeader, Transaction, TxType};
use std::str::FromStr;

use crate::error::{ChainError, Result};

#[derive(Debug, sqlx::FromRow)]
pub struct BlockRow {
    pub hash: String,
    pub prevhash: String,
    pub merkle_root: String,
    pub height: i64,
    pub nonce: i64,
    pub timestamp: i64,
    pub version: i64,
    pub branch: i64,
}

impl BlockRow {
    pub fn into_header(self) -> BlockHeader {
        BlockHeader {
            version: self.version as u32,
            previous_hash: self.prevhash,
            merkle_root: self.merkle_root,
            timestamp: self.timestamp as u32,
            nonce: self.nonce as u32,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TransactionRow {
    pub hash: String,
    pub src: String,
    pub dest: String,
    pub amount: f64,
    pub fee: f64,
    pub timestamp: i64,
    pub signature: String,
    pub tx_type: String,
    #[allow(dead_code)]
    pub block_hash: String,
    pub asset: String,
    pub data: String,
    #[allow(dead_code)]
    pub branch: i64,
    pub prev_hash: String,
    #[allow(dead_code)]
    pub tx_index: i64,
}

impl TransactionRow {
    pub fn into_transaction(self) -> Result<Transaction> {
        let tx_type = TxType::from_str(&self.tx_type)
            .map_err(|_| ChainError::UnknownTxType(self.tx_type.clone()))?;
        Ok(Transaction {
            source: self.src,
            destination: self.dest,
            amount: self.amount,
            fee: self.fee,
            timestamp: self.timestamp,
            tx_type,
            asset: self.asset,
            data: self.data,
            prev_hash: self.prev_hash,
            signature: self.signature,
            tx_hash: self.hash,
        })
    }
}

/// Assembles a `Block` from a header row and its ordered transaction rows.
pub fn assemble_block(block_row: BlockRow, tx_rows: Vec<TransactionRow>) -> Result<Block> {
    let height = block_row.height as u64;
    let header = block_row.into_header();
    let mut transactions = Vec::with_capacity(tx_rows.len());
    for row in tx_rows {
        transactions.push(row.into_transaction()?);
    }
    Ok(Block {
        height,
        transactions,
        block_header: header,
    })
}
