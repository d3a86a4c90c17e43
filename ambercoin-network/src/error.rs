use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Chain(#[from] ambercoin_chain::ChainError),
    #[error(transparent)]
    Consensus(#[from] ambercoin_consensus::ConsensusError),
    #[error(transparent)]
    Mempool(#[from] ambercoin_mempool::MempoolError),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error("io error talking to peer: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response from peer {0}")]
    NoResponse(String),
    #[error("swarm channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, NetworkError>;
