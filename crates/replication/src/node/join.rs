//! Join protocol.
//!
//! A new node asks the tracker for the board parameters and one contact. With
//! no contact it tries to found the session; otherwise it asks the contact who
//! the primary is and joins through the primary. Every failure leads back to
//! the tracker, so the loop only ends once the node holds a role.

use super::Node;
use crate::error::Result;
use corelib::{GameState, JoinReply, MemberAddress, Role, Snapshot};
use tracing::{debug, info, warn};

/// Attempts at registering with the tracker after a successful join.
const REGISTER_ATTEMPTS: usize = 5;

impl Node {
    /// Join the session the tracker knows about, founding it if it is empty.
    ///
    /// Retries until the node is a member and returns the role it got.
    ///
    /// # Errors
    ///
    /// Fails only if the tracker's board parameters cannot be used to found
    /// a session.
    pub async fn join(&self) -> Result<Role> {
        loop {
            let info = match self.tracker().get_info().await {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "tracker unreachable");
                    self.backoff().await;
                    continue;
                }
            };

            let joined = match info.contact {
                None => self.found_session(info.dim, info.treasures).await?,
                Some(contact) if contact.id == *self.id() => {
                    // Left behind by an earlier run under the same id
                    debug!(contact = %contact, "dropping own stale tracker entry");
                    self.forget(contact).await;
                    None
                }
                Some(contact) => self.join_via(contact).await,
            };

            if let Some(role) = joined {
                info!(member = %self.id(), %role, "joined session");
                return Ok(role);
            }
        }
    }

    /// Try to become the founding primary. `None` when another node won.
    async fn found_session(&self, dim: usize, treasures: usize) -> Result<Option<Role>> {
        match self.tracker().try_become_primary(self.me().clone()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("lost the founder race");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "tracker unreachable");
                self.backoff().await;
                return Ok(None);
            }
        }

        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        let game = GameState::new(dim, treasures, self.me().clone(), &mut st.rng)?;
        st.game = Some(game);
        st.role = Role::Primary;
        st.primary_id = Some(self.id().clone());
        st.backup_id = None;
        metrics::counter!("replica_promotions_total").increment(1);
        info!(member = %self.id(), dim, treasures, "founded session");
        self.start_watcher(Role::Primary);
        self.publish(st);
        Ok(Some(Role::Primary))
    }

    async fn join_via(&self, contact: MemberAddress) -> Option<Role> {
        let primary = match self.peer(&contact).get_primary_server().await {
            Ok(Some(primary)) if primary.id != *self.id() => primary,
            Ok(_) => {
                debug!(contact = %contact, "contact knows no primary");
                self.backoff().await;
                return None;
            }
            Err(e) => {
                warn!(contact = %contact, error = %e, "contact unreachable, dropping it");
                self.forget(contact).await;
                return None;
            }
        };

        let role = self.join_primary(&primary).await?;
        self.register().await;
        Some(role)
    }

    /// Ask `primary` for admission until it answers with a snapshot.
    async fn join_primary(&self, primary: &MemberAddress) -> Option<Role> {
        loop {
            match self.peer(primary).add_other_player(self.me().clone()).await {
                Ok(JoinReply::Accepted(snapshot)) => {
                    return Some(self.adopt_join(primary, snapshot).await)
                }
                Ok(JoinReply::Full) => {
                    info!(primary = %primary, "session full, waiting");
                    self.backoff().await;
                }
                Ok(JoinReply::NotPrimary) => {
                    debug!(primary = %primary, "contact pointed at a non-primary");
                    self.backoff().await;
                    return None;
                }
                Err(e) => {
                    warn!(primary = %primary, error = %e, "primary unreachable during join");
                    return None;
                }
            }
        }
    }

    async fn adopt_join(&self, primary: &MemberAddress, mut snapshot: Snapshot) -> Role {
        let mut guard = self.state().lock().await;
        let st = &mut *guard;
        st.primary_id = Some(primary.id.clone());
        if !snapshot.state.contains(&primary.id) {
            st.primary_hint = Some(primary.clone());
        }
        // A push that raced the reply may already be newer
        if let Some(local) = st.game.as_ref() {
            if local.version() > snapshot.state.version() {
                snapshot.state = local.clone();
            }
        }
        self.absorb_locked(st, snapshot);
        st.role
    }

    /// Make this node discoverable. The insert is idempotent, so transient
    /// failures are simply retried.
    async fn register(&self) {
        for attempt in 1..=REGISTER_ATTEMPTS {
            match self.tracker().add_member(self.me().clone()).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "tracker registration failed");
                    self.backoff().await;
                }
            }
        }
        warn!("giving up on tracker registration");
    }

    async fn forget(&self, addr: MemberAddress) {
        if let Err(e) = self.tracker().remove_member(addr).await {
            warn!(error = %e, "tracker remove failed");
            self.backoff().await;
        }
    }

    async fn backoff(&self) {
        tokio::time::sleep(self.config().join_backoff).await
    }
}
