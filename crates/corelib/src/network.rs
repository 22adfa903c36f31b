//! Core networking abstractions shared across the workspace.
//!
//! This module defines the request/response vocabulary of the node and tracker
//! RPC surfaces and the transport-agnostic traits that carry them. Concrete
//! transports (TCP, in-process) live in other crates.
//!
//! # Error model
//!
//! A `TransportError` always means "the peer could not be reached". Callers
//! never retry inside the transport; they decide whether to sleep and retry
//! or to drop the peer from the membership. Application-level rejections
//! travel as ordinary replies (`JoinReply::Full`, `MoveReply::NotPrimary`).

use crate::member::{MemberAddress, MemberId};
use crate::moves::MoveCode;
use crate::snapshot::Snapshot;
use crate::state::GameState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to complete a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer could not be resolved, connected to, or vanished mid-call
    #[error("Peer unreachable: {0}")]
    Unreachable(String),
    /// Peer did not answer within the RPC timeout
    #[error("Call timed out: {0}")]
    Timeout(String),
    /// Frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),
    /// Peer answered with a reply of the wrong kind
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

/// Board parameters plus one known member, as handed out by the tracker.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TrackerInfo {
    pub dim: usize,
    pub treasures: usize,
    /// Any current member. May already be dead.
    pub contact: Option<MemberAddress>,
}

/// Calls a node answers.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NodeRequest {
    AddOtherPlayer(MemberAddress),
    ApplyPlayerMove { id: MemberId, code: MoveCode },
    UpdateGameState(Snapshot),
    GetPrimaryServer,
    PromoteSelfToBackup,
    Ping,
}

/// Discriminant of a `NodeRequest`, for logging and fault injection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RequestKind {
    AddOtherPlayer,
    ApplyPlayerMove,
    UpdateGameState,
    GetPrimaryServer,
    PromoteSelfToBackup,
    Ping,
}

impl NodeRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            NodeRequest::AddOtherPlayer(_) => RequestKind::AddOtherPlayer,
            NodeRequest::ApplyPlayerMove { .. } => RequestKind::ApplyPlayerMove,
            NodeRequest::UpdateGameState(_) => RequestKind::UpdateGameState,
            NodeRequest::GetPrimaryServer => RequestKind::GetPrimaryServer,
            NodeRequest::PromoteSelfToBackup => RequestKind::PromoteSelfToBackup,
            NodeRequest::Ping => RequestKind::Ping,
        }
    }
}

/// Answer to `AddOtherPlayer`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum JoinReply {
    Accepted(Snapshot),
    /// No room on the board; retry later.
    Full,
    /// The callee is not the primary.
    NotPrimary,
}

/// Answer to `ApplyPlayerMove`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum MoveReply {
    /// State after the move. Identical to the previous state when the move
    /// was illegal.
    Applied(GameState),
    NotPrimary,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NodeResponse {
    Joined(JoinReply),
    Moved(MoveReply),
    Primary(Option<MemberAddress>),
    Ack,
}

/// Calls the tracker answers.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TrackerRequest {
    GetInfo,
    AddMember(MemberAddress),
    RemoveMember(MemberAddress),
    TryBecomePrimary(MemberAddress),
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TrackerResponse {
    Info(TrackerInfo),
    Ack,
    Primary(bool),
}

/// Server side of an RPC surface: turns one request into one response.
#[async_trait]
pub trait Service<Req, Resp>: Send + Sync + 'static {
    async fn handle(&self, request: Req) -> Resp;
}

/// Carries node requests to other members.
///
/// Implementations must be thread-safe (Send + Sync) as one transport is
/// shared by every handler and watcher of a node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `request` to `target` and wait for its response.
    async fn call(
        &self,
        target: &MemberAddress,
        request: NodeRequest,
    ) -> Result<NodeResponse, TransportError>;
}

/// The tracker's RPC surface, local or remote.
#[async_trait]
pub trait TrackerApi: Send + Sync + 'static {
    async fn get_info(&self) -> Result<TrackerInfo, TransportError>;

    async fn add_member(&self, addr: MemberAddress) -> Result<(), TransportError>;

    async fn remove_member(&self, addr: MemberAddress) -> Result<(), TransportError>;

    /// Atomic admission gate: succeeds only for the first member of an empty
    /// session.
    async fn try_become_primary(&self, addr: MemberAddress) -> Result<bool, TransportError>;
}

/// Typed stub for one remote member.
pub struct PeerClient<'a> {
    transport: &'a dyn Transport,
    target: &'a MemberAddress,
}

impl<'a> PeerClient<'a> {
    pub fn new(transport: &'a dyn Transport, target: &'a MemberAddress) -> Self {
        Self { transport, target }
    }

    pub fn target(&self) -> &MemberAddress {
        self.target
    }

    pub async fn add_other_player(&self, me: MemberAddress) -> Result<JoinReply, TransportError> {
        match self.call(NodeRequest::AddOtherPlayer(me)).await? {
            NodeResponse::Joined(reply) => Ok(reply),
            _ => Err(TransportError::UnexpectedResponse("AddOtherPlayer")),
        }
    }

    pub async fn apply_player_move(
        &self,
        id: MemberId,
        code: MoveCode,
    ) -> Result<MoveReply, TransportError> {
        match self.call(NodeRequest::ApplyPlayerMove { id, code }).await? {
            NodeResponse::Moved(reply) => Ok(reply),
            _ => Err(TransportError::UnexpectedResponse("ApplyPlayerMove")),
        }
    }

    pub async fn update_game_state(&self, snapshot: Snapshot) -> Result<(), TransportError> {
        self.expect_ack(NodeRequest::UpdateGameState(snapshot), "UpdateGameState")
            .await
    }

    pub async fn get_primary_server(&self) -> Result<Option<MemberAddress>, TransportError> {
        match self.call(NodeRequest::GetPrimaryServer).await? {
            NodeResponse::Primary(addr) => Ok(addr),
            _ => Err(TransportError::UnexpectedResponse("GetPrimaryServer")),
        }
    }

    pub async fn promote_self_to_backup(&self) -> Result<(), TransportError> {
        self.expect_ack(NodeRequest::PromoteSelfToBackup, "PromoteSelfToBackup")
            .await
    }

    pub async fn ping(&self) -> Result<(), TransportError> {
        self.expect_ack(NodeRequest::Ping, "Ping").await
    }

    async fn expect_ack(
        &self,
        request: NodeRequest,
        name: &'static str,
    ) -> Result<(), TransportError> {
        match self.call(request).await? {
            NodeResponse::Ack => Ok(()),
            _ => Err(TransportError::UnexpectedResponse(name)),
        }
    }

    async fn call(&self, request: NodeRequest) -> Result<NodeResponse, TransportError> {
        self.transport.call(self.target, request).await
    }
}
