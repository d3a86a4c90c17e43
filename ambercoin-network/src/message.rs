use ambercoin_core::{BlockHeader, Transaction};
use serde::{Deserialize, Serialize};

/// The five push message kinds the gossip worker reacts to. All of them
/// travel as `ApiRequest::Gossip` over the one request-response protocol;
/// the peer's reply is always `ApiResponse::Ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    BlockHeader { header: BlockHeader },
    BlockInv { hashes: Vec<String> },
    UnconfirmedTransaction { transaction: Transaction },
    UnconfirmedTransactionInv { hashes: Vec<String> },
    Synchronize { height: u64, tip_hash: String },
}

/// A message pulled off the inbound queue: who it came from, plus whether
/// it was self-originated (the local node pushed it itself, in which case
/// the worker only needs to re-broadcast, never re-validate).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: String,
    pub self_originated: bool,
    pub message: GossipMessage,
}

/// Every request carried over the wire protocol: gossip pushes plus the
/// three pull queries the sync worker uses to reconcile state with a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    Gossip(GossipMessage),
    TransactionsInv { block_hash: String },
    BlockHeader { hash: String },
    Transaction { tx_hash: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Ack,
    TransactionsInv(Vec<String>),
    BlockHeader(Option<BlockHeader>),
    Transaction(Option<Transaction>),
}
