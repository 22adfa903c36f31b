//! Snapshots: the unit of state transfer.
//!
//! A snapshot is a full `GameState` plus one-shot control flags. The flags
//! only exist on the wire: a receiver acts on them once and keeps just the
//! state.

use crate::member::MemberId;
use crate::state::GameState;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: GameState,
    /// The receiver must become the backup.
    pub become_backup: bool,
    /// The sender announces a new primary.
    pub change_primary: Option<MemberId>,
    /// The sender announces a new backup.
    pub change_backup: Option<MemberId>,
}

impl Snapshot {
    /// Plain state push with no control flags.
    pub fn plain(state: GameState) -> Self {
        Self {
            state,
            become_backup: false,
            change_primary: None,
            change_backup: None,
        }
    }

    /// Push that assigns the backup role to `backup`, naming the primary it
    /// has to watch.
    pub fn assign_backup(state: GameState, primary: MemberId, backup: MemberId) -> Self {
        Self {
            state,
            become_backup: true,
            change_primary: Some(primary),
            change_backup: Some(backup),
        }
    }

    /// Broadcast announcing that `primary` took over.
    pub fn announce_primary(state: GameState, primary: MemberId) -> Self {
        Self {
            change_primary: Some(primary),
            ..Self::plain(state)
        }
    }

    pub fn has_flags(&self) -> bool {
        self.become_backup || self.change_primary.is_some() || self.change_backup.is_some()
    }
}

impl From<GameState> for Snapshot {
    fn from(state: GameState) -> Self {
        Self::plain(state)
    }
}
