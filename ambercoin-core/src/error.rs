use thiserror::Error;

/// The error kinds named in the system's error handling design: header/PoW
/// problems, chain continuity breaks, transaction-content problems, and
/// genesis disagreement.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    #[error("chain continuity violation: {0}")]
    ChainContinuity(String),
    #[error("invalid transactions: {0}")]
    InvalidTransactions(String),
    #[error("genesis mismatch: {0}")]
    GenesisMismatch(String),
    #[error("invalid transaction hash: {0}")]
    InvalidTransactionHash(String),
    #[error("invalid coinbase: {0}")]
    InvalidCoinbase(String),
    #[error(transparent)]
    Crypto(#[from] ambercoin_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
