//! Light client surface: a keypair, transaction construction/signing, and
//! an HTTP client against `ambercoin-rpc`. No passphrase prompts and no
//! at-rest key encryption — keys live in memory for one CLI invocation.

use ambercoin_core::{Transaction, TxType, NATIVE_ASSET_ID};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Crypto(#[from] ambercoin_crypto::CryptoError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("node rejected the transaction ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}

pub type Result<T> = std::result::Result<T, WalletError>;

/// A secp256k1 keypair. The address *is* the hex-encoded compressed
/// public key (§6: "all addresses are hex compressed pubkeys") — there is
/// no separate derivation step.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub name: String,
    pub private_key_hex: String,
    pub public_key_hex: String,
}

impl Wallet {
    pub fn generate(name: impl Into<String>) -> Self {
        let kp = ambercoin_crypto::generate_keypair();
        Self {
            name: name.into(),
            private_key_hex: kp.private_key_hex,
            public_key_hex: kp.public_key_hex,
        }
    }

    pub fn from_private_key(name: impl Into<String>, private_key_hex: impl Into<String>) -> Result<Self> {
        let private_key_hex = private_key_hex.into();
        let public_key_hex = ambercoin_crypto::public_key_from_private(&private_key_hex)?;
        Ok(Self {
            name: name.into(),
            private_key_hex,
            public_key_hex,
        })
    }

    pub fn address(&self) -> &str {
        &self.public_key_hex
    }

    /// Builds a signed standard transfer, ready to submit.
    pub fn build_transaction(
        &self,
        destination: &str,
        amount: f64,
        fee: f64,
        asset: Option<&str>,
    ) -> Result<Transaction> {
        let mut tx = Transaction::new(
            self.public_key_hex.clone(),
            destination.to_string(),
            amount,
            fee,
            chrono::Utc::now().timestamp(),
            TxType::Standard,
            asset.unwrap_or(NATIVE_ASSET_ID).to_string(),
            "",
            "",
        );
        tx.sign(&self.private_key_hex)?;
        Ok(tx)
    }
}

/// Thin wrapper over `ambercoin-rpc`'s REST surface, in the same
/// request-per-call style the teacher's interop client uses against
/// external chains.
pub struct RpcClient {
    base_url: String,
    http: Client,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: f64,
}

#[derive(Deserialize)]
struct StatusResponse {
    height: u64,
}

#[derive(Deserialize)]
struct SubmitResponse {
    tx_hash: String,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
        }
    }

    pub async fn get_height(&self) -> Result<u64> {
        let resp = self.http.get(format!("{}/status", self.base_url)).send().await?;
        Ok(resp.error_for_status()?.json::<StatusResponse>().await?.height)
    }

    pub async fn get_balance(&self, address: &str, asset: Option<&str>) -> Result<f64> {
        let mut url = format!("{}/balance/{address}", self.base_url);
        if let Some(asset) = asset {
            url = format!("{url}?asset={asset}");
        }
        let resp = self.http.get(url).send().await?;
        Ok(resp.error_for_status()?.json::<BalanceResponse>().await?.balance)
    }

    pub async fn get_history(&self, address: &str) -> Result<Vec<Transaction>> {
        #[derive(Deserialize)]
        struct HistoryResponse {
            transactions: Vec<Transaction>,
        }
        let resp = self
            .http
            .get(format!("{}/history/{address}", self.base_url))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json::<HistoryResponse>().await?.transactions)
    }

    pub async fn submit_transaction(&self, tx: &Transaction) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/transactions", self.base_url))
            .json(tx)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WalletError::Rejected { status, body });
        }
        Ok(resp.json::<SubmitResponse>().await?.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_wallet_address_matches_public_key() {
        let wallet = Wallet::generate("primary");
        assert_eq!(wallet.address(), wallet.public_key_hex);
    }

    #[test]
    fn from_private_key_rederives_the_same_address() {
        let generated = Wallet::generate("primary");
        let restored = Wallet::from_private_key("primary", generated.private_key_hex.clone()).unwrap();
        assert_eq!(restored.address(), generated.address());
    }

    #[test]
    fn build_transaction_signs_and_verifies() {
        let wallet = Wallet::generate("primary");
        let tx = wallet.build_transaction("dest", 1.0, 0.1, None).unwrap();
        assert!(tx.verify());
        assert_eq!(tx.source, wallet.address());
    }
}
