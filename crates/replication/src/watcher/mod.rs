//! Failure detection.
//!
//! Each node runs at most one watcher, matching its role: the primary watcher
//! pings every other member and repairs membership, the backup watcher pings
//! the primary and takes over when it dies. Both poll on the node's
//! `poll_interval`.
//!
//! The watcher lives in a [`RoleTaskSlot`]. Starting a watcher cancels the
//! token of the one it replaces, so a rapid double promotion never leaves two
//! watchers running. Cancellation is only observed between ticks: a tick that
//! is promoting the node always runs to completion.

mod backup;
mod primary;

use crate::node::Node;
use corelib::Role;
use parking_lot::Mutex;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct RoleTask {
    role: Role,
    token: CancellationToken,
}

#[derive(Default)]
pub(crate) struct RoleTaskSlot {
    current: Mutex<Option<RoleTask>>,
}

impl RoleTaskSlot {
    /// Spawn the watcher for `role` and cancel the previous one. A normal
    /// member has nothing to watch, so `Role::Normal` only cancels.
    pub(crate) fn start(&self, node: &Node, role: Role) {
        let token = CancellationToken::new();
        let previous = self.current.lock().replace(RoleTask {
            role,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            debug!(member = %node.id(), from = %previous.role, to = %role, "replacing watcher");
            previous.token.cancel();
        }

        match role {
            Role::Primary => spawn(primary::run(node.clone(), token)),
            Role::Backup => spawn(backup::run(node.clone(), token)),
            Role::Normal => token.cancel(),
        }
    }

    pub(crate) fn stop(&self) {
        if let Some(task) = self.current.lock().take() {
            task.token.cancel();
        }
    }

    /// Role of the running watcher. `None` once it stopped or exited.
    pub(crate) fn active(&self) -> Option<Role> {
        self.current
            .lock()
            .as_ref()
            .filter(|task| !task.token.is_cancelled())
            .map(|task| task.role)
    }
}

fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}

/// Tick loop shared by both watchers. `tick` returns `false` when the
/// watcher should exit on its own.
async fn run_ticks<F, Fut>(node: &Node, token: &CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut interval = tokio::time::interval(node.config().poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => break,
            _ = interval.tick() => {
                if !tick().await {
                    break;
                }
            }
        }
    }
    token.cancel();
}
