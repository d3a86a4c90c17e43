use async_trait::async_trait;
use futures::prelude::*;
use libp2p::core::upgrade::{read_length_prefixed, write_length_prefixed};
use libp2p::request_response::{ProtocolName, RequestResponseCodec};
use std::io;

use crate::message::{ApiRequest, ApiResponse};

const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// The one wire protocol this node speaks: `/ambercoin/<version>`, JSON
/// frames prefixed with their length, matching the codec libp2p's own
/// request-response examples use.
#[derive(Debug, Clone)]
pub struct ApiProtocol(pub String);

impl ProtocolName for ApiProtocol {
    fn protocol_name(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiCodec;

#[async_trait]
impl RequestResponseCodec for ApiCodec {
    type Protocol = ApiProtocol;
    type Request = ApiRequest;
    type Response = ApiResponse;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        let bytes = read_length_prefixed(io, MAX_MESSAGE_BYTES).await?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    async fn read_response<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        let bytes = read_length_prefixed(io, MAX_MESSAGE_BYTES).await?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    async fn write_request<T>(&mut self, _: &Self::Protocol, io: &mut T, req: Self::Request) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let bytes = serde_json::to_vec(&req).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_length_prefixed(io, bytes).await
    }

    async fn write_response<T>(&mut self, _: &Self::Protocol, io: &mut T, resp: Self::Response) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let bytes = serde_json::to_vec(&resp).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_length_prefixed(io, bytes).await
    }
}
