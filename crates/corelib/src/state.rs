//! The replicated game state.
//!
//! `GameState` is the part of a snapshot that every replica holds: the board,
//! where each member stands, each member's score, and the membership list. It
//! is only ever mutated by the primary and copied wholesale to everyone else.
//!
//! # Invariants
//!
//! - Every member in `positions` occupies exactly the board cell at its
//!   position, and no other cell holds a member.
//! - The board holds exactly `treasures` treasure cells.
//! - `positions`, `scores` and `members` describe the same set of members.
//!
//! `check_invariants` verifies all of them; tests run it after every step.

use crate::board::{Board, Cell, Coord};
use crate::error::{Error, Result};
use crate::member::{MemberAddress, MemberId};
use crate::moves::Direction;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of applying a directional move.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveOutcome {
    /// Out of bounds or blocked by another member; nothing changed.
    Ignored,
    /// Moved onto an empty cell.
    Moved,
    /// Moved onto a treasure, scored, and a new treasure was placed.
    Collected,
}

impl MoveOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MoveOutcome::Ignored)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    positions: BTreeMap<MemberId, Coord>,
    scores: BTreeMap<MemberId, u32>,
    /// Membership in join order. Kept as a list so iteration (backup
    /// candidate selection, broadcasts) is reproducible.
    members: Vec<MemberAddress>,
    treasures: usize,
    /// Bumped by the primary on every committed mutation.
    version: u64,
}

impl GameState {
    /// Create the founding state of a session.
    ///
    /// Places `treasures` treasures at independently drawn random empty cells,
    /// then the founder at a random empty cell with score 0.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the board is empty or cannot hold the treasures plus
    /// one member.
    pub fn new<R: Rng + ?Sized>(
        dim: usize,
        treasures: usize,
        founder: MemberAddress,
        rng: &mut R,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("board dimension must be positive".into()));
        }
        if treasures + 1 > dim * dim {
            return Err(Error::InvalidConfig(format!(
                "{} treasures and a player do not fit on a {}x{} board",
                treasures, dim, dim
            )));
        }

        let mut state = Self {
            board: Board::new(dim),
            positions: BTreeMap::new(),
            scores: BTreeMap::new(),
            members: Vec::new(),
            treasures,
            version: 0,
        };
        for _ in 0..treasures {
            state.spawn_treasure(rng)?;
        }
        state.add_member(founder, rng)?;
        Ok(state)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn dim(&self) -> usize {
        self.board.dim()
    }

    /// Configured number of treasures (K).
    pub fn treasures(&self) -> usize {
        self.treasures
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn positions(&self) -> &BTreeMap<MemberId, Coord> {
        &self.positions
    }

    pub fn scores(&self) -> &BTreeMap<MemberId, u32> {
        &self.scores
    }

    /// Members in join order.
    pub fn members(&self) -> &[MemberAddress] {
        &self.members
    }

    pub fn member(&self, id: &MemberId) -> Option<&MemberAddress> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.member(id).is_some()
    }

    pub fn position_of(&self, id: &MemberId) -> Option<Coord> {
        self.positions.get(id).copied()
    }

    pub fn score_of(&self, id: &MemberId) -> Option<u32> {
        self.scores.get(id).copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether one more member fits next to the treasures.
    pub fn has_room(&self) -> bool {
        self.positions.len() + 1 + self.treasures <= self.board.capacity()
    }

    /// Mark a mutation that happened outside the regular handlers, such as a
    /// change of primary.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Place a new member at a random empty cell with score 0.
    ///
    /// # Errors
    ///
    /// `DuplicateMember` if the id is already present, `BoardFull` if there
    /// is no room for it.
    pub fn add_member<R: Rng + ?Sized>(
        &mut self,
        addr: MemberAddress,
        rng: &mut R,
    ) -> Result<Coord> {
        if self.contains(&addr.id) {
            return Err(Error::DuplicateMember(addr.id));
        }
        if !self.has_room() {
            return Err(Error::BoardFull {
                members: self.positions.len(),
                treasures: self.treasures,
                capacity: self.board.capacity(),
            });
        }
        let coord = self
            .board
            .random_empty_cell(rng)
            .ok_or_else(|| Error::Internal("no empty cell despite free capacity".into()))?;

        self.board.replace(coord, Cell::Member(addr.id.clone()));
        self.positions.insert(addr.id.clone(), coord);
        self.scores.insert(addr.id.clone(), 0);
        self.members.push(addr);
        self.version += 1;
        Ok(coord)
    }

    /// Drop a member: free its cell and forget its position, score and
    /// address. Returns whether anything was removed.
    pub fn remove_member(&mut self, id: &MemberId) -> bool {
        let mut removed = false;
        if let Some(coord) = self.positions.remove(id) {
            if self.board.get(coord) == Some(&Cell::Member(id.clone())) {
                self.board.replace(coord, Cell::Empty);
            }
            removed = true;
        }
        removed |= self.scores.remove(id).is_some();
        let before = self.members.len();
        self.members.retain(|m| &m.id != id);
        removed |= self.members.len() != before;

        if removed {
            self.version += 1;
        }
        removed
    }

    /// Move a member one cell.
    ///
    /// Moves off the board or onto another member are ignored and leave the
    /// state untouched, version included. Landing on a treasure scores one
    /// point and respawns a treasure at a random empty cell, so the number of
    /// treasures stays constant.
    ///
    /// # Errors
    ///
    /// `UnknownMember` if `id` has no position.
    pub fn apply_step<R: Rng + ?Sized>(
        &mut self,
        id: &MemberId,
        dir: Direction,
        rng: &mut R,
    ) -> Result<MoveOutcome> {
        let from = self
            .position_of(id)
            .ok_or_else(|| Error::UnknownMember(id.clone()))?;
        let Some(to) = dir.step(from, self.dim()) else {
            return Ok(MoveOutcome::Ignored);
        };

        let outcome = match self.board.get(to) {
            Some(Cell::Empty) => MoveOutcome::Moved,
            Some(Cell::Treasure) => MoveOutcome::Collected,
            Some(Cell::Member(_)) | None => return Ok(MoveOutcome::Ignored),
        };

        self.board.replace(from, Cell::Empty);
        self.board.replace(to, Cell::Member(id.clone()));
        self.positions.insert(id.clone(), to);

        if outcome == MoveOutcome::Collected {
            *self.scores.entry(id.clone()).or_insert(0) += 1;
            self.spawn_treasure(rng)?;
        }
        self.version += 1;
        Ok(outcome)
    }

    fn spawn_treasure<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Coord> {
        let coord = self
            .board
            .random_empty_cell(rng)
            .ok_or_else(|| Error::Internal("no empty cell for a treasure".into()))?;
        self.board.replace(coord, Cell::Treasure);
        Ok(coord)
    }

    /// Verify the structural invariants listed in the module docs.
    pub fn check_invariants(&self) -> Result<()> {
        let found = self.board.treasure_count();
        if found != self.treasures {
            return Err(Error::Internal(format!(
                "{} treasures on board, expected {}",
                found, self.treasures
            )));
        }
        if self.board.member_cell_count() != self.positions.len() {
            return Err(Error::Internal(format!(
                "{} member cells for {} positions",
                self.board.member_cell_count(),
                self.positions.len()
            )));
        }
        for (id, coord) in &self.positions {
            if self.board.get(*coord) != Some(&Cell::Member(id.clone())) {
                return Err(Error::Internal(format!("{} is not on its cell {}", id, coord)));
            }
            if !self.contains(id) || !self.scores.contains_key(id) {
                return Err(Error::Internal(format!("{} is only partially registered", id)));
            }
        }
        if self.members.len() != self.positions.len() || self.scores.len() != self.positions.len() {
            return Err(Error::Internal("membership, positions and scores disagree".into()));
        }
        Ok(())
    }
}
