use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Core(#[from] ambercoin_core::CoreError),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("chain continuity violation: {0}")]
    ChainContinuity(String),
    #[error("unknown tx_type in storage: {0}")]
    UnknownTxType(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
