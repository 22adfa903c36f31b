//! Handlers for the node RPC surface and the membership repair they share
//! with the watchers.
//!
//! Functions suffixed `_locked` expect the caller to hold the node lock and
//! pass the guarded state in. The primary keeps the lock across its backup
//! push, so the backup receives snapshots in commit order.

use super::{Node, NodeState};
use crate::error::{ReplicationError, Result};
use corelib::{
    GameState, JoinReply, MemberAddress, MemberId, MoveCode, MoveReply, Role, Snapshot,
};
use tracing::{debug, error, info, warn};

impl Node {
    /// Admit `addr` to the session. Only the primary accepts.
    ///
    /// A newcomer that finds the backup slot empty is recorded as backup
    /// before the reply leaves; if that reply is lost the primary watcher
    /// elects a replacement.
    pub(crate) async fn add_other_player(&self, addr: MemberAddress) -> JoinReply {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        if st.role != Role::Primary {
            debug!(member = %addr.id, "join refused, not the primary");
            return JoinReply::NotPrimary;
        }
        let me = self.id().clone();
        let Some(recorded) = st.game.as_ref().map(|g| g.member(&addr.id).cloned()) else {
            error!("primary holds no game state");
            return JoinReply::NotPrimary;
        };

        match recorded {
            Some(known) if known == addr => {
                // The joiner retried after losing our reply
                debug!(member = %addr.id, "repeated join");
                let Some(state) = st.game.clone() else {
                    return JoinReply::NotPrimary;
                };
                let snapshot = if st.backup_id.as_ref() == Some(&addr.id) {
                    Snapshot::assign_backup(state, me, addr.id)
                } else {
                    Snapshot::plain(state)
                };
                return JoinReply::Accepted(snapshot);
            }
            Some(_) if addr.id == me => {
                warn!(member = %addr.id, "join under the primary's own id refused");
                return JoinReply::NotPrimary;
            }
            Some(known) => {
                info!(old = %known, new = %addr, "member restarted, dropping old address");
                self.force_remove_locked(st, &addr.id).await;
            }
            None => {}
        }

        let Some(game) = st.game.as_mut() else {
            return JoinReply::NotPrimary;
        };
        let coord = match game.add_member(addr.clone(), &mut st.rng) {
            Ok(coord) => coord,
            Err(corelib::Error::BoardFull { members, capacity, .. }) => {
                info!(member = %addr.id, members, capacity, "join refused, board full");
                return JoinReply::Full;
            }
            Err(e) => {
                error!(member = %addr.id, error = %e, "join failed");
                return JoinReply::Full;
            }
        };
        info!(member = %addr.id, row = coord.row, col = coord.col, "member joined");
        let state = game.clone();

        let snapshot = if st.backup_id.is_none() {
            info!(member = %addr.id, "newcomer assigned the backup role");
            st.backup_id = Some(addr.id.clone());
            Snapshot::assign_backup(state, me, addr.id)
        } else {
            self.sync_backup_locked(st).await;
            Snapshot::plain(state)
        };
        self.publish(st);
        JoinReply::Accepted(snapshot)
    }

    pub(crate) async fn apply_player_move(&self, id: &MemberId, code: MoveCode) -> MoveReply {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        if st.role != Role::Primary {
            debug!(member = %id, %code, "move refused, not the primary");
            return MoveReply::NotPrimary;
        }
        match self.apply_move_locked(st, id, code).await {
            Ok(state) => MoveReply::Applied(state),
            Err(e) => {
                error!(member = %id, error = %e, "move failed");
                MoveReply::NotPrimary
            }
        }
    }

    /// Apply `code` for `id` on the primary's state and return the result.
    ///
    /// Illegal moves and moves by unknown members return the current state
    /// untouched. Every change is pushed to the backup before returning.
    pub(crate) async fn apply_move_locked(
        &self,
        st: &mut NodeState,
        id: &MemberId,
        code: MoveCode,
    ) -> Result<GameState> {
        let game = st.game.as_mut().ok_or(ReplicationError::NotJoined)?;
        match code {
            MoveCode::Refresh => {}
            MoveCode::Exit if id == self.id() => {
                debug!("primary exit is handled by the caller");
            }
            MoveCode::Exit => {
                info!(member = %id, "member exits");
                self.force_remove_locked(st, id).await;
            }
            MoveCode::Step(dir) => match game.apply_step(id, dir, &mut st.rng) {
                Ok(outcome) if outcome.changed() => {
                    debug!(member = %id, ?dir, ?outcome, version = game.version(), "move applied");
                    self.sync_backup_locked(st).await;
                    self.publish(st);
                }
                Ok(_) => debug!(member = %id, ?dir, "move ignored"),
                Err(e) => warn!(member = %id, error = %e, "move from a non-member ignored"),
            },
        }
        st.game.clone().ok_or(ReplicationError::NotJoined)
    }

    /// Adopt a pushed snapshot and act on its flags.
    pub(crate) async fn update_game_state(&self, snapshot: Snapshot) {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        if st.role == Role::Primary {
            warn!(
                version = snapshot.state.version(),
                "primary ignores a pushed state"
            );
            return;
        }
        self.absorb_locked(st, snapshot);
    }

    /// Replace the local state with the snapshot's and apply its flags.
    pub(crate) fn absorb_locked(&self, st: &mut NodeState, snapshot: Snapshot) {
        let Snapshot {
            state,
            become_backup,
            change_primary,
            change_backup,
        } = snapshot;
        debug!(version = state.version(), "state adopted");
        st.game = Some(state);

        if let Some(primary) = change_primary {
            if st.primary_id.as_ref() != Some(&primary) {
                info!(primary = %primary, "primary changed");
            }
            st.primary_id = Some(primary);
            st.primary_hint = None;
        }
        if let Some(backup) = change_backup {
            st.backup_id = Some(backup);
        }
        if become_backup {
            self.promote_self_to_backup_locked(st);
        }
        self.publish(st);
    }

    pub(crate) async fn get_primary_server(&self) -> Option<MemberAddress> {
        let st = self.state().lock().await;
        let addr = st.primary_address();
        if addr.is_none() {
            if let Some(id) = &st.primary_id {
                error!(primary = %id, "primary missing from membership");
            }
        }
        addr
    }

    pub(crate) async fn promote_self_to_backup(&self) {
        let mut guard = self.state().lock().await;
        self.promote_self_to_backup_locked(&mut guard);
        self.publish(&guard);
    }

    pub(crate) fn promote_self_to_backup_locked(&self, st: &mut NodeState) {
        match st.role {
            Role::Primary => {
                warn!("primary ignores promotion to backup");
            }
            Role::Backup => {
                st.backup_id = Some(self.id().clone());
                if self.active_watcher() != Some(Role::Backup) {
                    self.start_watcher(Role::Backup);
                }
            }
            Role::Normal => {
                st.role = Role::Backup;
                st.backup_id = Some(self.id().clone());
                metrics::counter!("replica_promotions_total").increment(1);
                info!(member = %self.id(), "promoted to backup");
                self.start_watcher(Role::Backup);
            }
        }
    }

    /// Push the current state to the backup.
    ///
    /// Succeeds trivially without a backup. A backup missing from the
    /// membership list is an invariant violation.
    pub(crate) async fn update_backup_locked(&self, st: &NodeState) -> Result<()> {
        let Some(backup) = st.backup_id.as_ref() else {
            return Ok(());
        };
        let game = st.game.as_ref().ok_or(ReplicationError::NotJoined)?;
        let Some(addr) = game.member(backup) else {
            error!(backup = %backup, "backup missing from membership");
            return Err(ReplicationError::Invariant(format!(
                "backup {} is not a member",
                backup
            )));
        };
        self.peer(addr)
            .update_game_state(Snapshot::plain(game.clone()))
            .await
            .map_err(|source| ReplicationError::Transport {
                peer: backup.clone(),
                source,
            })
    }

    /// [`update_backup_locked`](Self::update_backup_locked), logging failures
    /// for the primary watcher to repair.
    async fn sync_backup_locked(&self, st: &NodeState) {
        if let Err(e) = self.update_backup_locked(st).await {
            metrics::counter!("replica_backup_push_failures_total").increment(1);
            warn!(error = %e, "backup push failed");
        }
    }

    /// Drop `id` from the session. Re-elects a backup if `id` held that role,
    /// otherwise tells the backup about the change. Returns whether `id` was
    /// a member.
    pub(crate) async fn force_remove_locked(&self, st: &mut NodeState, id: &MemberId) -> bool {
        let removed = st
            .game
            .as_mut()
            .map_or(false, |game| game.remove_member(id));
        if !removed {
            return false;
        }
        metrics::counter!("replica_members_removed_total").increment(1);
        info!(member = %id, "member removed");

        if st.backup_id.as_ref() == Some(id) {
            self.promote_someone_to_backup_locked(st).await;
        } else {
            self.sync_backup_locked(st).await;
        }
        self.publish(st);
        true
    }

    /// Offer the backup role to every other member in join order until one
    /// accepts. Leaves the slot empty if nobody answers.
    pub(crate) async fn promote_someone_to_backup_locked(&self, st: &mut NodeState) {
        st.backup_id = None;
        let Some(state) = st.game.clone() else {
            return;
        };
        let me = self.id();

        for candidate in state.members().iter().filter(|m| &m.id != me) {
            let snapshot = Snapshot::assign_backup(state.clone(), me.clone(), candidate.id.clone());
            match self.peer(candidate).update_game_state(snapshot).await {
                Ok(()) => {
                    info!(backup = %candidate.id, "backup elected");
                    st.backup_id = Some(candidate.id.clone());
                    return;
                }
                Err(e) => {
                    warn!(candidate = %candidate.id, error = %e, "backup candidate unreachable");
                }
            }
        }
        if state.member_count() > 1 {
            warn!("no member accepted the backup role");
        }
    }

    /// Take over from a dead primary. Runs on the backup only.
    ///
    /// Evicts the old primary, announces the change to every remaining
    /// member, elects a new backup and starts the primary watcher. The old
    /// primary is removed from the tracker once the node lock is released.
    pub(crate) async fn promote_self_to_primary(&self) {
        let stale = {
            let mut guard = self.state().lock().await;
            let st = &mut *guard;
            if st.role != Role::Backup {
                debug!(role = %st.role, "promotion to primary skipped");
                return;
            }
            let old_primary = st.primary_id.clone();
            let old_addr = st.primary_address();
            let me = self.id().clone();

            st.role = Role::Primary;
            // Cleared first so the eviction below does not push to ourselves
            st.backup_id = None;
            metrics::counter!("replica_promotions_total").increment(1);
            info!(member = %me, old_primary = ?old_primary, "promoted to primary");

            if let Some(old) = &old_primary {
                self.force_remove_locked(st, old).await;
            }
            st.primary_id = Some(me.clone());
            st.primary_hint = None;

            if let Some(game) = st.game.as_mut() {
                game.bump_version();
                let state = game.clone();
                for member in state.members().iter().filter(|m| m.id != me) {
                    let announce = Snapshot::announce_primary(state.clone(), me.clone());
                    if let Err(e) = self.peer(member).update_game_state(announce).await {
                        warn!(member = %member.id, error = %e, "primary announcement failed");
                    }
                }
            } else {
                error!("backup promoted without game state");
            }

            self.promote_someone_to_backup_locked(st).await;
            self.start_watcher(Role::Primary);
            self.publish(st);
            old_addr
        };

        if let Some(addr) = stale {
            if let Err(e) = self.tracker().remove_member(addr).await {
                warn!(error = %e, "could not remove old primary from tracker");
            }
        }
    }

    /// Remove a member the primary watcher found dead.
    pub(crate) async fn evict(&self, member: &MemberAddress) {
        {
            let mut guard = self.state().lock().await;
            let st = &mut *guard;
            if st.role != Role::Primary || member.id == *self.id() {
                return;
            }
            if !self.force_remove_locked(st, &member.id).await {
                return;
            }
        }
        if let Err(e) = self.tracker().remove_member(member.clone()).await {
            warn!(member = %member.id, error = %e, "could not remove member from tracker");
        }
    }

    /// Fill an empty backup slot. No-op unless this node is the primary and
    /// someone else is in the session.
    pub(crate) async fn elect_backup(&self) {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        let others = st.game.as_ref().map_or(0, |g| g.member_count().saturating_sub(1));
        if st.role != Role::Primary || st.backup_id.is_some() || others == 0 {
            return;
        }
        self.promote_someone_to_backup_locked(st).await;
        self.publish(st);
    }

    /// Members other than this node, in join order.
    pub(crate) async fn peers(&self) -> Vec<MemberAddress> {
        let st = self.state().lock().await;
        st.game
            .as_ref()
            .map(|g| {
                g.members()
                    .iter()
                    .filter(|m| &m.id != self.id())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) async fn primary_address(&self) -> Option<MemberAddress> {
        self.state().lock().await.primary_address()
    }
}
