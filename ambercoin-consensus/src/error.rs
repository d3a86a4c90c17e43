use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Chain(#[from] ambercoin_chain::ChainError),
    #[error(transparent)]
    Core(#[from] ambercoin_core::CoreError),
    #[error(transparent)]
    Mempool(#[from] ambercoin_mempool::MempoolError),
    #[error("block header version {got} does not match expected {expected}")]
    VersionMismatch { expected: u32, got: u32 },
    #[error("hash difficulty {actual} below required {required}")]
    InsufficientDifficulty { actual: u32, required: u32 },
    #[error("merkle root does not match transaction ordering")]
    MerkleMismatch,
    #[error("block {0} already known")]
    DuplicateBlock(String),
    #[error("invalid coinbase: {0}")]
    InvalidCoinbase(String),
    #[error("transaction {0} already confirmed")]
    DuplicateTransaction(String),
    #[error("insufficient balance for {0}")]
    InsufficientBalance(String),
    #[error("transaction {0} failed signature verification")]
    BadSignature(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
