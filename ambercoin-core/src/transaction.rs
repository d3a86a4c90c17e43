use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default asset id denoting the native coin. Balance and history queries
/// are scoped to an asset; this is the one every STANDARD transfer uses
/// unless told otherwise.
pub const NATIVE_ASSET_ID: &str =
    "29bb7eb4fa78fc709e1b8b88362b7f8cb61d9379667ad4aedc8ec9f664e16680";

/// The distinguished address denoting the protocol itself: the only valid
/// `source` for GENESIS and COINBASE transactions.
pub const PROTOCOL_ADDRESS: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxType {
    Genesis,
    Coinbase,
    Standard,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Genesis => "GENESIS",
            TxType::Coinbase => "COINBASE",
            TxType::Standard => "STANDARD",
        }
    }

    /// GENESIS and COINBASE transactions carry no signature; their
    /// validity is established by block-level rules instead.
    pub fn bypasses_signature_check(&self) -> bool {
        matches!(self, TxType::Genesis | TxType::Coinbase)
    }
}

impl std::str::FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GENESIS" => Ok(TxType::Genesis),
            "COINBASE" => Ok(TxType::Coinbase),
            "STANDARD" => Ok(TxType::Standard),
            other => Err(format!("unknown tx_type {other}")),
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed value transfer. Immutable once `sign` has been called: every
/// field but `signature`/`tx_hash` is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub source: String,
    pub destination: String,
    pub amount: f64,
    pub fee: f64,
    pub timestamp: i64,
    pub tx_type: TxType,
    pub asset: String,
    pub data: String,
    pub prev_hash: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub tx_hash: String,
}

impl Transaction {
    /// Constructs a transaction without a signature. `tx_hash` stays empty
    /// until `sign` (or `recompute_hash`, for signature-less GENESIS/COINBASE
    /// transactions) is called.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        amount: f64,
        fee: f64,
        timestamp: i64,
        tx_type: TxType,
        asset: impl Into<String>,
        data: impl Into<String>,
        prev_hash: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            amount,
            fee,
            timestamp,
            tx_type,
            asset: asset.into(),
            data: data.into(),
            prev_hash: prev_hash.into(),
            signature: String::new(),
            tx_hash: String::new(),
        }
    }

    /// The colon-joined encoding that gets signed and verified. Excludes
    /// `signature` itself.
    pub fn to_signable(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.source,
            self.destination,
            self.amount,
            self.fee,
            self.timestamp,
            self.tx_type.as_str(),
            self.asset,
            self.data,
            self.prev_hash
        )
    }

    /// `tx_hash` is the SHA-256 of the canonical (sorted-key) JSON of every
    /// field but `tx_hash` itself, `signature` included. `serde_json::
    /// Value`'s object map is a `BTreeMap` (this workspace doesn't enable
    /// `preserve_order`), so round-tripping through `Value` is what gives us
    /// sorted keys. `tx_hash` has to be stripped before hashing, or the
    /// function isn't idempotent: hashing a transaction that already carries
    /// a hash would fold that hash into itself.
    pub fn recompute_hash(&mut self) {
        let mut value = serde_json::to_value(&*self).expect("Transaction always serializes");
        value
            .as_object_mut()
            .expect("Transaction always serializes to an object")
            .remove("tx_hash");
        let encoded = serde_json::to_string(&value).expect("Value always serializes");
        self.tx_hash = ambercoin_crypto::sha256_hex(encoded.as_bytes());
    }

    /// Signs the signable encoding under `private_key_hex`, sets
    /// `signature`, then recomputes `tx_hash` over the now-complete fields.
    pub fn sign(&mut self, private_key_hex: &str) -> Result<()> {
        let signable = self.to_signable();
        self.signature = ambercoin_crypto::sign(private_key_hex, signable.as_bytes())?;
        self.recompute_hash();
        Ok(())
    }

    /// True iff the signature validates under `source`, or the transaction
    /// is a GENESIS/COINBASE whose validity is established elsewhere.
    pub fn verify(&self) -> bool {
        if self.tx_type.bypasses_signature_check() {
            return true;
        }
        ambercoin_crypto::verify(&self.source, &self.signature, self.to_signable().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_tx(kp: &ambercoin_crypto::KeyPair) -> Transaction {
        let mut tx = Transaction::new(
            kp.public_key_hex.clone(),
            "dest".to_string(),
            10.0,
            0.1,
            1_700_000_000,
            TxType::Standard,
            NATIVE_ASSET_ID,
            "",
            "",
        );
        tx.sign(&kp.private_key_hex).unwrap();
        tx
    }

    #[test]
    fn sign_sets_hash_and_verifies() {
        let kp = ambercoin_crypto::generate_keypair();
        let tx = signed_tx(&kp);
        assert!(!tx.tx_hash.is_empty());
        assert!(tx.verify());
    }

    #[test]
    fn tampered_field_breaks_verification() {
        let kp = ambercoin_crypto::generate_keypair();
        let mut tx = signed_tx(&kp);
        tx.amount = 999.0;
        assert!(!tx.verify());
    }

    #[test]
    fn coinbase_bypasses_signature_check() {
        let mut tx = Transaction::new(
            PROTOCOL_ADDRESS,
            "miner",
            50.0,
            0.0,
            0,
            TxType::Coinbase,
            NATIVE_ASSET_ID,
            "",
            "0",
        );
        tx.recompute_hash();
        assert!(tx.verify());
    }

    #[test]
    fn hash_is_deterministic_for_identical_fields() {
        let kp = ambercoin_crypto::generate_keypair();
        let tx_a = signed_tx(&kp);
        let mut tx_b = Transaction::new(
            tx_a.source.clone(),
            tx_a.destination.clone(),
            tx_a.amount,
            tx_a.fee,
            tx_a.timestamp,
            tx_a.tx_type,
            tx_a.asset.clone(),
            tx_a.data.clone(),
            tx_a.prev_hash.clone(),
        );
        tx_b.signature = tx_a.signature.clone();
        tx_b.recompute_hash();
        assert_eq!(tx_a.tx_hash, tx_b.tx_hash);
    }
}
