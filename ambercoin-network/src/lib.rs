//! Peer-to-peer transport: wire codec, peer registry, the gossip & sync
//! worker, and the libp2p swarm actor that drives them.

mod api;
mod codec;
mod error;
mod message;
mod peer_registry;
mod swarm;
mod worker;

pub use api::{ApiClient, Broadcaster};
pub use codec::{ApiCodec, ApiProtocol};
pub use error::{NetworkError, Result};
pub use message::{ApiRequest, ApiResponse, GossipMessage, InboundMessage};
pub use peer_registry::PeerRegistry;
pub use swarm::NetworkService;
pub use worker::GossipWorker;
