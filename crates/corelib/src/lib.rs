//! Core library for the replicated maze session.
//!
//! This crate provides the fundamental abstractions shared by every node:
//! - Member identity and addresses
//! - The board, move codes and the replicated game state
//! - Snapshots and their one-shot control flags
//! - Roles and the rendering view
//! - Transport-agnostic RPC contracts

pub mod board;
pub mod error;
pub mod member;
pub mod moves;
pub mod network;
pub mod role;
pub mod snapshot;
pub mod state;

pub use board::{Board, Cell, Coord};
pub use error::{Error, Result};
pub use member::{MemberAddress, MemberId};
pub use moves::{Direction, MoveCode};
pub use network::{
    JoinReply, MoveReply, NodeRequest, NodeResponse, PeerClient, RequestKind, Service,
    TrackerApi, TrackerInfo, TrackerRequest, TrackerResponse, Transport, TransportError,
};
pub use role::{Role, View};
pub use snapshot::Snapshot;
pub use state::{GameState, MoveOutcome};
