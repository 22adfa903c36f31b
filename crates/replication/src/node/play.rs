//! The local player's side: moves, leaving, and finding a lost primary.

use super::Node;
use crate::error::{ReplicationError, Result};
use corelib::{GameState, MemberAddress, MemberId, MoveCode, MoveReply, Role};
use tracing::{debug, error, info, warn};

impl Node {
    /// Submit one move for this node's player and return the resulting
    /// state. `Exit` leaves the session.
    ///
    /// A non-primary forwards the move to the primary and retries with a
    /// fixed sleep until some primary answers. If this node becomes the
    /// primary in the meantime, it applies the move itself.
    ///
    /// # Errors
    ///
    /// `NotJoined` if [`join`](Node::join) has not completed.
    pub async fn play(&self, code: MoveCode) -> Result<GameState> {
        if code == MoveCode::Exit {
            return self.leave().await;
        }
        self.submit(code).await
    }

    /// Leave the session.
    ///
    /// A non-primary asks the primary to remove it. Every node then drops its
    /// tracker entry and stops its watcher. A leaving primary keeps its state;
    /// once its process is gone the backup takes over.
    pub async fn leave(&self) -> Result<GameState> {
        let state = self.submit(MoveCode::Exit).await?;
        self.stop_watcher();
        if let Err(e) = self.tracker().remove_member(self.me().clone()).await {
            warn!(error = %e, "could not remove self from tracker");
        }
        info!(member = %self.id(), "left session");
        Ok(state)
    }

    async fn submit(&self, code: MoveCode) -> Result<GameState> {
        let mut failures = 0u32;
        loop {
            let target = {
                let mut guard = self.state().lock().await;
                let st = &mut *guard;
                if st.game.is_none() {
                    return Err(ReplicationError::NotJoined);
                }
                if st.role == Role::Primary {
                    return self.apply_move_locked(st, self.id(), code).await;
                }
                st.primary_address()
            };

            match &target {
                Some(primary) => {
                    match self
                        .peer(primary)
                        .apply_player_move(self.id().clone(), code)
                        .await
                    {
                        Ok(MoveReply::Applied(state)) => return Ok(self.adopt_reply(state).await),
                        Ok(MoveReply::NotPrimary) => {
                            debug!(primary = %primary.id, "cached primary is not the primary");
                        }
                        Err(e) => {
                            warn!(primary = %primary.id, error = %e, "primary unreachable, retrying");
                        }
                    }
                }
                None => error!("primary unknown or missing from membership"),
            }

            failures += 1;
            if let Some(limit) = self.config().rediscovery_after {
                if failures >= limit {
                    let stale = target.map(|t| t.id);
                    if self.rediscover_primary(stale.as_ref()).await {
                        failures = 0;
                        continue;
                    }
                }
            }
            tokio::time::sleep(self.config().move_retry).await;
        }
    }

    /// Adopt the primary's answer unless a newer push already arrived.
    async fn adopt_reply(&self, state: GameState) -> GameState {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        if let Some(local) = st.game.as_ref() {
            if local.version() > state.version() {
                debug!(
                    local = local.version(),
                    reply = state.version(),
                    "stale move reply dropped"
                );
                return local.clone();
            }
        }
        st.game = Some(state.clone());
        self.publish(st);
        state
    }

    /// Ask the tracker's contact, then every known member, who the primary
    /// is. Adopts the first answer that names a reachable primary other than
    /// `stale`. Returns whether the cached primary changed.
    pub(crate) async fn rediscover_primary(&self, stale: Option<&MemberId>) -> bool {
        let mut candidates: Vec<MemberAddress> = Vec::new();
        match self.tracker().get_info().await {
            Ok(info) => candidates.extend(info.contact),
            Err(e) => debug!(error = %e, "tracker unreachable during rediscovery"),
        }
        for member in self.peers().await {
            if !candidates.contains(&member) {
                candidates.push(member);
            }
        }

        for candidate in candidates.iter().filter(|c| &c.id != self.id()) {
            let Ok(Some(primary)) = self.peer(candidate).get_primary_server().await else {
                continue;
            };
            if Some(&primary.id) == stale || &primary.id == self.id() {
                continue;
            }
            if self.peer(&primary).ping().await.is_err() {
                continue;
            }

            let mut guard = self.state().lock().await;
            let st = &mut *guard;
            if st.role == Role::Primary {
                return true;
            }
            info!(primary = %primary.id, via = %candidate.id, "primary rediscovered");
            st.primary_id = Some(primary.id.clone());
            let known = st.game.as_ref().map_or(false, |g| g.contains(&primary.id));
            st.primary_hint = (!known).then_some(primary);
            return true;
        }
        debug!("rediscovery found no other primary");
        false
    }
}
