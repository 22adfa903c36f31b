//! Node roles and the rendering view.

use crate::board::Board;
use crate::member::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role a node plays in the session.
///
/// Nodes start `Normal`. A normal node becomes `Backup` when the primary
/// assigns it, and a backup becomes `Primary` when it detects the primary's
/// death. Only the session founder goes straight to `Primary`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default)]
pub enum Role {
    #[default]
    Normal,
    Backup,
    Primary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Normal => f.write_str("normal"),
            Role::Backup => f.write_str("backup"),
            Role::Primary => f.write_str("primary"),
        }
    }
}

/// What a display surface needs after every update: the board, the scores,
/// and the local node's role.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct View {
    pub board: Board,
    pub scores: BTreeMap<MemberId, u32>,
    pub role: Role,
}
