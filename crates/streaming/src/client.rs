//! Client side of the node and tracker RPC surfaces.

use crate::codec::BincodeCodec;
use async_trait::async_trait;
use corelib::{
    MemberAddress, NodeRequest, NodeResponse, TrackerApi, TrackerInfo, TrackerRequest,
    TrackerResponse, Transport, TransportError,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::trace;

/// Bound on one RPC: resolution, connect, request and response together.
///
/// default: `500 milliseconds`
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Send one request to `endpoint` on a fresh connection and read the answer.
pub(crate) async fn round_trip<Req, Resp>(
    endpoint: &str,
    request: Req,
    timeout: Duration,
) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: for<'de> Deserialize<'de>,
{
    tokio::time::timeout(timeout, exchange(endpoint, request))
        .await
        .map_err(|_| TransportError::Timeout(endpoint.to_string()))?
}

async fn exchange<Req, Resp>(endpoint: &str, request: Req) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: for<'de> Deserialize<'de>,
{
    let lost = |e: std::io::Error| TransportError::Unreachable(format!("{}: {}", endpoint, e));

    let addr = lookup_host(endpoint)
        .await
        .map_err(lost)?
        .next()
        .ok_or_else(|| TransportError::Unreachable(format!("{}: no address", endpoint)))?;
    let stream = TcpStream::connect(addr).await.map_err(lost)?;
    stream.set_nodelay(true).map_err(lost)?;

    let (read, write) = stream.into_split();
    let mut out = FramedWrite::new(write, BincodeCodec::<Req>::new());
    let mut replies = FramedRead::new(read, BincodeCodec::<Resp>::new());

    out.send(request).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => TransportError::Codec(e.to_string()),
        _ => lost(e),
    })?;
    match replies.next().await {
        Some(Ok(reply)) => Ok(reply),
        Some(Err(e)) => Err(TransportError::Codec(e.to_string())),
        None => Err(TransportError::Unreachable(format!(
            "{}: closed before replying",
            endpoint
        ))),
    }
}

/// Node transport over TCP.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_TIMEOUT)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(
        &self,
        target: &MemberAddress,
        request: NodeRequest,
    ) -> Result<NodeResponse, TransportError> {
        trace!(target = %target, kind = ?request.kind(), "rpc");
        round_trip(&target.endpoint(), request, self.timeout).await
    }
}

/// Remote tracker at a fixed `host:port`.
#[derive(Clone, Debug)]
pub struct TrackerClient {
    endpoint: String,
    timeout: Duration,
}

impl TrackerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn call(&self, request: TrackerRequest) -> Result<TrackerResponse, TransportError> {
        round_trip(&self.endpoint, request, self.timeout).await
    }

    async fn expect_ack(
        &self,
        request: TrackerRequest,
        name: &'static str,
    ) -> Result<(), TransportError> {
        match self.call(request).await? {
            TrackerResponse::Ack => Ok(()),
            _ => Err(TransportError::UnexpectedResponse(name)),
        }
    }
}

#[async_trait]
impl TrackerApi for TrackerClient {
    async fn get_info(&self) -> Result<TrackerInfo, TransportError> {
        match self.call(TrackerRequest::GetInfo).await? {
            TrackerResponse::Info(info) => Ok(info),
            _ => Err(TransportError::UnexpectedResponse("GetInfo")),
        }
    }

    async fn add_member(&self, addr: MemberAddress) -> Result<(), TransportError> {
        self.expect_ack(TrackerRequest::AddMember(addr), "AddMember")
            .await
    }

    async fn remove_member(&self, addr: MemberAddress) -> Result<(), TransportError> {
        self.expect_ack(TrackerRequest::RemoveMember(addr), "RemoveMember")
            .await
    }

    async fn try_become_primary(&self, addr: MemberAddress) -> Result<bool, TransportError> {
        match self.call(TrackerRequest::TryBecomePrimary(addr)).await? {
            TrackerResponse::Primary(won) => Ok(won),
            _ => Err(TransportError::UnexpectedResponse("TryBecomePrimary")),
        }
    }
}
