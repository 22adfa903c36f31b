//! Error types for the replication layer.

use corelib::{MemberId, TransportError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The node holds no game state yet
    #[error("Node has not joined a session")]
    NotJoined,
    /// A remote call failed; the peer is considered dead
    #[error("Call to {peer} failed: {source}")]
    Transport {
        peer: MemberId,
        #[source]
        source: TransportError,
    },
    /// Local state contradicts itself, e.g. a role holder missing from membership
    #[error("Invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    State(#[from] corelib::Error),
}
