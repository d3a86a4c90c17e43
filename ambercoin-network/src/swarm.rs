use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ambercoin_chain::ChainStore;
use ambercoin_mempool::Mempool;
use async_trait::async_trait;
use futures::prelude::*;
use libp2p::request_response::{
    ProtocolSupport, RequestId, RequestResponse, RequestResponseConfig, RequestResponseEvent,
    RequestResponseMessage,
};
use libp2p::swarm::{NetworkBehaviour, SwarmBuilder, SwarmEvent};
use libp2p::{identify, identity::Keypair, noise, tcp, yamux, Multiaddr, PeerId, Transport};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, Broadcaster};
use crate::codec::{ApiCodec, ApiProtocol};
use crate::error::{NetworkError, Result};
use crate::message::{ApiRequest, ApiResponse, GossipMessage, InboundMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(NetworkBehaviour)]
struct AmberBehaviour {
    request_response: RequestResponse<ApiCodec>,
    identify: identify::Behaviour,
}

enum Command {
    SendRequest {
        peer: PeerId,
        request: ApiRequest,
        reply: oneshot::Sender<Result<ApiResponse>>,
    },
    Dial(Multiaddr),
}

/// Handle to the running swarm task: the `ApiClient`/`Broadcaster`
/// implementation the gossip worker drives, plus the inbound queue it
/// drains. Peers are addressed by the host string the peer registry
/// stores; `peer_ids` tracks the libp2p identity learned for each one
/// once a connection and identify exchange complete.
#[derive(Clone)]
pub struct NetworkService {
    commands: mpsc::Sender<Command>,
    peer_ids: Arc<Mutex<HashMap<String, PeerId>>>,
    local_peer_id: PeerId,
}

impl NetworkService {
    /// Spins up the swarm on a background task. `inbound_tx` receives every
    /// gossip push this node is handed by a peer; `chain`/`mempool` answer
    /// this node's own pull requests (`TransactionsInv`, `BlockHeader`,
    /// `Transaction`) when a peer asks *us*.
    pub fn spawn(
        listen_addr: &str,
        protocol_version: &str,
        chain: Arc<ChainStore>,
        mempool: Arc<dyn Mempool>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Self> {
        let local_key = Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
            .upgrade(libp2p::core::upgrade::Version::V1)
            .authenticate(noise::Config::new(&local_key).map_err(|e| NetworkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?)
            .multiplex(yamux::Config::default())
            .boxed();

        let rr_config = RequestResponseConfig::default();
        let request_response = RequestResponse::new(
            ApiCodec::default(),
            std::iter::once((ApiProtocol(protocol_version.to_string()), ProtocolSupport::Full)),
            rr_config,
        );
        let identify = identify::Behaviour::new(identify::Config::new(
            protocol_version.to_string(),
            local_key.public(),
        ));

        let behaviour = AmberBehaviour {
            request_response,
            identify,
        };

        let mut swarm = SwarmBuilder::with_tokio_executor(transport, behaviour, local_peer_id).build();
        let addr: Multiaddr = listen_addr
            .parse()
            .map_err(|_| NetworkError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad listen address")))?;
        swarm
            .listen_on(addr)
            .map_err(|e| NetworkError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let (command_tx, mut command_rx) = mpsc::channel::<Command>(256);
        let peer_ids: Arc<Mutex<HashMap<String, PeerId>>> = Arc::new(Mutex::new(HashMap::new()));
        let peer_ids_task = Arc::clone(&peer_ids);

        tokio::spawn(async move {
            let mut pending: HashMap<RequestId, oneshot::Sender<Result<ApiResponse>>> = HashMap::new();

            loop {
                tokio::select! {
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(Command::SendRequest { peer, request, reply }) => {
                                let id = swarm.behaviour_mut().request_response.send_request(&peer, request);
                                pending.insert(id, reply);
                            }
                            Some(Command::Dial(addr)) => {
                                if let Err(err) = swarm.dial(addr.clone()) {
                                    warn!(%addr, %err, "network: dial failed");
                                }
                            }
                            None => break,
                        }
                    }
                    event = swarm.select_next_some() => {
                        match event {
                            SwarmEvent::Behaviour(AmberBehaviourEvent::RequestResponse(ev)) => {
                                handle_request_response_event(
                                    ev,
                                    &mut swarm,
                                    &chain,
                                    mempool.as_ref(),
                                    &inbound_tx,
                                    &mut pending,
                                ).await;
                            }
                            SwarmEvent::Behaviour(AmberBehaviourEvent::Identify(identify::Event::Received { peer_id, info })) => {
                                if let Some(addr) = info.listen_addrs.first() {
                                    peer_ids_task.lock().insert(addr.to_string(), peer_id);
                                }
                                debug!(%peer_id, "network: identified peer");
                            }
                            SwarmEvent::NewListenAddr { address, .. } => {
                                info!(%address, "network: listening");
                            }
                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                info!(%peer_id, "network: connection established");
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(Self {
            commands: command_tx,
            peer_ids,
            local_peer_id,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub async fn dial(&self, addr: Multiaddr) -> Result<()> {
        self.commands
            .send(Command::Dial(addr))
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    async fn request(&self, peer: &str, request: ApiRequest) -> Result<ApiResponse> {
        let peer_id = *self
            .peer_ids
            .lock()
            .get(peer)
            .ok_or_else(|| NetworkError::NoResponse(peer.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SendRequest {
                peer: peer_id,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NetworkError::ChannelClosed)?;
        tokio::time::timeout(REQUEST_TIMEOUT, reply_rx)
            .await
            .map_err(|_| NetworkError::NoResponse(peer.to_string()))?
            .map_err(|_| NetworkError::ChannelClosed)?
    }
}

async fn handle_request_response_event(
    event: RequestResponseEvent<ApiRequest, ApiResponse>,
    swarm: &mut libp2p::swarm::Swarm<AmberBehaviour>,
    chain: &Arc<ChainStore>,
    mempool: &dyn Mempool,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    pending: &mut HashMap<RequestId, oneshot::Sender<Result<ApiResponse>>>,
) {
    match event {
        RequestResponseEvent::Message { peer, message } => match message {
            RequestResponseMessage::Request { request, channel, .. } => {
                let response = answer_request(request, peer, chain, mempool, inbound_tx).await;
                let _ = swarm.behaviour_mut().request_response.send_response(channel, response);
            }
            RequestResponseMessage::Response { request_id, response } => {
                if let Some(tx) = pending.remove(&request_id) {
                    let _ = tx.send(Ok(response));
                }
            }
        },
        RequestResponseEvent::OutboundFailure { request_id, error, .. } => {
            if let Some(tx) = pending.remove(&request_id) {
                let _ = tx.send(Err(NetworkError::NoResponse(error.to_string())));
            }
        }
        RequestResponseEvent::InboundFailure { error, .. } => {
            warn!(%error, "network: inbound request failed");
        }
        RequestResponseEvent::ResponseSent { .. } => {}
    }
}

async fn answer_request(
    request: ApiRequest,
    peer: PeerId,
    chain: &Arc<ChainStore>,
    mempool: &dyn Mempool,
    inbound_tx: &mpsc::Sender<InboundMessage>,
) -> ApiResponse {
    match request {
        ApiRequest::Gossip(message) => {
            let _ = inbound_tx
                .send(InboundMessage {
                    sender: peer.to_string(),
                    self_originated: false,
                    message,
                })
                .await;
            ApiResponse::Ack
        }
        ApiRequest::TransactionsInv { block_hash } => {
            let hashes = chain
                .get_transaction_hashes_by_block_hash(&block_hash)
                .await
                .unwrap_or_default();
            ApiResponse::TransactionsInv(hashes)
        }
        ApiRequest::BlockHeader { hash } => {
            let header = chain
                .get_block_header_by_hash(&hash)
                .await
                .ok()
                .flatten()
                .map(|(header, _, _)| header);
            ApiResponse::BlockHeader(header)
        }
        ApiRequest::Transaction { tx_hash } => {
            let tx = match chain.get_transaction_by_hash(&tx_hash).await.ok().flatten() {
                Some(tx) => Some(tx),
                None => mempool.get_unconfirmed_transaction(&tx_hash).await.ok().flatten(),
            };
            ApiResponse::Transaction(tx)
        }
    }
}

#[async_trait]
impl ApiClient for NetworkService {
    async fn request_transactions_inv(&self, peer: &str, block_hash: &str) -> Result<Vec<String>> {
        match self.request(peer, ApiRequest::TransactionsInv { block_hash: block_hash.to_string() }).await? {
            ApiResponse::TransactionsInv(hashes) => Ok(hashes),
            _ => Ok(Vec::new()),
        }
    }

    async fn request_block_header(&self, peer: &str, hash: &str) -> Result<Option<ambercoin_core::BlockHeader>> {
        match self.request(peer, ApiRequest::BlockHeader { hash: hash.to_string() }).await? {
            ApiResponse::BlockHeader(header) => Ok(header),
            _ => Ok(None),
        }
    }

    async fn request_transaction(&self, peer: &str, tx_hash: &str) -> Result<Option<ambercoin_core::Transaction>> {
        match self.request(peer, ApiRequest::Transaction { tx_hash: tx_hash.to_string() }).await? {
            ApiResponse::Transaction(tx) => Ok(tx),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Broadcaster for NetworkService {
    async fn send_to(&self, peer: &str, message: GossipMessage) -> Result<()> {
        self.request(peer, ApiRequest::Gossip(message)).await?;
        Ok(())
    }
}
