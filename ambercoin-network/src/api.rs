use ambercoin_core::{BlockHeader, Transaction};
use async_trait::async_trait;

use crate::error::Result;
use crate::message::GossipMessage;

/// The three pull queries the sync worker issues against a specific peer.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn request_transactions_inv(&self, peer: &str, block_hash: &str) -> Result<Vec<String>>;
    async fn request_block_header(&self, peer: &str, hash: &str) -> Result<Option<BlockHeader>>;
    async fn request_transaction(&self, peer: &str, tx_hash: &str) -> Result<Option<Transaction>>;
}

/// Push side: fire a message at one peer, or at every peer the caller
/// already resolved from the registry.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send_to(&self, peer: &str, message: GossipMessage) -> Result<()>;

    async fn broadcast(&self, message: GossipMessage, peers: &[String]) -> Result<()> {
        for peer in peers {
            self.send_to(peer, message.clone()).await?;
        }
        Ok(())
    }
}
