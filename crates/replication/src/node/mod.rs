//! The node: one replica of the session.
//!
//! A node owns its copy of the game state, its role, and its view of who the
//! primary and backup are, all behind a single async lock. Every RPC handler,
//! the watchers, and the local player's own moves go through that lock, so
//! the state is only ever touched by one operation at a time.
//!
//! # Roles
//!
//! - **Primary**: serializes all mutations (`handlers`), pushes each result to
//!   the backup, and runs the primary watcher.
//! - **Backup**: holds a hot copy pushed by the primary and runs the backup
//!   watcher, which promotes it when the primary dies.
//! - **Normal**: forwards its player's moves to the primary (`play`).
//!
//! Remote calls made on behalf of the local player copy the target address out
//! under the lock and call the peer without it. The primary-side handlers keep
//! the lock across their backup push so pushes reach the backup in commit
//! order.

mod handlers;
mod join;
mod play;

use crate::config::NodeConfig;
use crate::watcher::RoleTaskSlot;
use async_trait::async_trait;
use corelib::{
    GameState, MemberAddress, MemberId, NodeRequest, NodeResponse, PeerClient, Role, Service,
    TrackerApi, Transport, View,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Cheap-to-clone handle on a running node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

struct Inner {
    me: MemberAddress,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    tracker: Arc<dyn TrackerApi>,
    state: Mutex<NodeState>,
    role_task: RoleTaskSlot,
    view_tx: watch::Sender<Option<View>>,
}

/// Everything guarded by the node lock.
pub(crate) struct NodeState {
    pub(crate) role: Role,
    pub(crate) primary_id: Option<MemberId>,
    pub(crate) backup_id: Option<MemberId>,
    /// `None` until the node founds or joins a session.
    pub(crate) game: Option<GameState>,
    /// Address of a primary learned outside the membership list.
    pub(crate) primary_hint: Option<MemberAddress>,
    pub(crate) rng: StdRng,
}

impl NodeState {
    /// Address of the current primary, from the membership list or the hint.
    pub(crate) fn primary_address(&self) -> Option<MemberAddress> {
        let id = self.primary_id.as_ref()?;
        self.game
            .as_ref()
            .and_then(|g| g.member(id).cloned())
            .or_else(|| self.primary_hint.clone().filter(|hint| &hint.id == id))
    }
}

impl Node {
    /// Create a node that is not part of any session yet. Call
    /// [`join`](Node::join) once it is reachable through `transport`.
    pub fn new(
        me: MemberAddress,
        transport: Arc<dyn Transport>,
        tracker: Arc<dyn TrackerApi>,
        config: NodeConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (view_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                me,
                config,
                transport,
                tracker,
                state: Mutex::new(NodeState {
                    role: Role::Normal,
                    primary_id: None,
                    backup_id: None,
                    game: None,
                    primary_hint: None,
                    rng,
                }),
                role_task: RoleTaskSlot::default(),
                view_tx,
            }),
        }
    }

    pub fn me(&self) -> &MemberAddress {
        &self.inner.me
    }

    pub fn id(&self) -> &MemberId {
        &self.inner.me.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub async fn role(&self) -> Role {
        self.inner.state.lock().await.role
    }

    pub async fn primary_id(&self) -> Option<MemberId> {
        self.inner.state.lock().await.primary_id.clone()
    }

    pub async fn backup_id(&self) -> Option<MemberId> {
        self.inner.state.lock().await.backup_id.clone()
    }

    /// Local copy of the replicated state.
    pub async fn game_state(&self) -> Option<GameState> {
        self.inner.state.lock().await.game.clone()
    }

    /// Board, scores and role, as a display would render them.
    pub async fn view(&self) -> Option<View> {
        let st = self.inner.state.lock().await;
        Self::build_view(&st)
    }

    /// Receive a new [`View`] after every mutation or synchronization.
    pub fn subscribe(&self) -> watch::Receiver<Option<View>> {
        self.inner.view_tx.subscribe()
    }

    /// Role of the watcher currently running for this node, if any.
    pub fn active_watcher(&self) -> Option<Role> {
        self.inner.role_task.active()
    }

    /// Stop this node's watcher without touching the session.
    pub fn stop_watcher(&self) {
        self.inner.role_task.stop();
    }

    pub(crate) fn peer<'a>(&'a self, target: &'a MemberAddress) -> PeerClient<'a> {
        PeerClient::new(self.inner.transport.as_ref(), target)
    }

    pub(crate) fn tracker(&self) -> &dyn TrackerApi {
        self.inner.tracker.as_ref()
    }

    pub(crate) fn state(&self) -> &Mutex<NodeState> {
        &self.inner.state
    }

    /// Start the watcher for `role`, replacing whatever watcher ran before.
    pub(crate) fn start_watcher(&self, role: Role) {
        self.inner.role_task.start(self, role);
    }

    pub(crate) fn publish(&self, st: &NodeState) {
        self.inner.view_tx.send_replace(Self::build_view(st));
    }

    fn build_view(st: &NodeState) -> Option<View> {
        st.game.as_ref().map(|game| View {
            board: game.board().clone(),
            scores: game.scores().clone(),
            role: st.role,
        })
    }
}

#[async_trait]
impl Service<NodeRequest, NodeResponse> for Node {
    async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::AddOtherPlayer(addr) => {
                NodeResponse::Joined(self.add_other_player(addr).await)
            }
            NodeRequest::ApplyPlayerMove { id, code } => {
                NodeResponse::Moved(self.apply_player_move(&id, code).await)
            }
            NodeRequest::UpdateGameState(snapshot) => {
                self.update_game_state(snapshot).await;
                NodeResponse::Ack
            }
            NodeRequest::GetPrimaryServer => NodeResponse::Primary(self.get_primary_server().await),
            NodeRequest::PromoteSelfToBackup => {
                self.promote_self_to_backup().await;
                NodeResponse::Ack
            }
            NodeRequest::Ping => NodeResponse::Ack,
        }
    }
}
