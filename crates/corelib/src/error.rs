//! Error types for the core library.

use crate::member::MemberId;
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating the replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Board parameters that cannot host a session
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// No room left for another member next to the treasures
    #[error("Board full: {members} members and {treasures} treasures on {capacity} cells")]
    BoardFull {
        members: usize,
        treasures: usize,
        capacity: usize,
    },
    /// Member is not part of the session
    #[error("Unknown member: {0}")]
    UnknownMember(MemberId),
    /// Member is already part of the session
    #[error("Member already joined: {0}")]
    DuplicateMember(MemberId),
    /// Unparseable move code
    #[error("Invalid move code: {0:?}")]
    InvalidMoveCode(String),
    /// State found violating one of its invariants
    #[error("Internal error: {0}")]
    Internal(String),
}
