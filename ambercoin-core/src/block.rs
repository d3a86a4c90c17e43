use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::transaction::Transaction;

/// The only block format version this node emits or accepts.
pub const BLOCK_VERSION: u32 = 1;

/// Header fields hashed for proof of work. `serialized()` is the exact byte
/// layout fed to scrypt: zero-padded 8-hex `version`, hex `previous_hash`,
/// hex `merkle_root`, zero-padded 8-hex `timestamp`, zero-padded 8-hex
/// `nonce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn serialized(&self) -> String {
        format!(
            "{:08x}{}{}{:08x}{:08x}",
            self.version, self.previous_hash, self.merkle_root, self.timestamp, self.nonce
        )
    }

    /// scrypt(password=serialized, salt=serialized, N=1024, r=1, p=1, dkLen=32), hex.
    pub fn hash(&self) -> Result<String> {
        Ok(ambercoin_crypto::scrypt_hash_hex(self.serialized().as_bytes())?)
    }

    /// Number of leading `'0'` hex characters of `hash()`.
    pub fn hash_difficulty(&self) -> Result<u32> {
        Ok(ambercoin_crypto::leading_zero_hex_chars(&self.hash()?))
    }
}

/// A block: its height, its canonically-ordered transactions, and the
/// header committing to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub transactions: Vec<Transaction>,
    pub block_header: BlockHeader,
}

impl Block {
    /// Canonicalizes `transactions` (coinbase first, the rest sorted
    /// ascending by `tx_hash`), computes the Merkle root over the result,
    /// and builds the header. Fails if `transactions` is empty — every
    /// block needs at least its coinbase.
    pub fn new(
        height: u64,
        mut transactions: Vec<Transaction>,
        previous_hash: String,
        timestamp: Option<u32>,
        nonce: u32,
    ) -> Result<Self> {
        if transactions.is_empty() {
            return Err(CoreError::InvalidTransactions(
                "block must contain at least a coinbase transaction".into(),
            ));
        }
        canonicalize_order(&mut transactions);
        let tx_hashes: Vec<String> = transactions.iter().map(|t| t.tx_hash.clone()).collect();
        let header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash,
            merkle_root: merkle_root(&tx_hashes),
            timestamp: timestamp.unwrap_or_else(now_seconds),
            nonce,
        };
        Ok(Self {
            height,
            transactions,
            block_header: header,
        })
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.block_header.nonce = nonce;
    }

    pub fn hash(&self) -> Result<String> {
        self.block_header.hash()
    }
}

/// Reorders `transactions` in place: element 0 (assumed coinbase) stays
/// first, the rest are sorted ascending by `tx_hash`.
pub fn canonicalize_order(transactions: &mut [Transaction]) {
    if transactions.len() <= 1 {
        return;
    }
    transactions[1..].sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
}

/// Iteratively pairs and SHA-256-concatenates hex tx-hash strings,
/// duplicating the last element on odd counts, until one hash remains.
pub fn merkle_root(tx_hashes: &[String]) -> String {
    if tx_hashes.is_empty() {
        return ambercoin_crypto::sha256_hex(b"");
    }
    let mut level: Vec<String> = tx_hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level.last().unwrap().clone());
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let concat = format!("{}{}", pair[0], pair[1]);
                ambercoin_crypto::sha256_hex(concat.as_bytes())
            })
            .collect();
    }
    level.into_iter().next().unwrap()
}

fn now_seconds() -> u32 {
    chrono::Utc::now().timestamp() as u32
}
