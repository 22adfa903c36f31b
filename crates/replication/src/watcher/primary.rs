//! Primary watcher: pings every other member, evicts the dead, and keeps the
//! backup slot filled.

use super::run_ticks;
use crate::node::Node;
use corelib::Role;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(super) async fn run(node: Node, token: CancellationToken) {
    info!(member = %node.id(), "primary watcher started");
    run_ticks(&node, &token, || tick(&node, &token)).await;
    info!(member = %node.id(), "primary watcher stopped");
}

async fn tick(node: &Node, token: &CancellationToken) -> bool {
    if let Err(e) = node.peer(node.me()).ping().await {
        warn!(error = %e, "own node unreachable");
        return false;
    }
    if node.role().await != Role::Primary {
        return false;
    }

    for member in node.peers().await {
        if token.is_cancelled() {
            return false;
        }
        if let Err(e) = node.peer(&member).ping().await {
            warn!(member = %member.id, error = %e, "member unreachable, evicting");
            node.evict(&member).await;
        }
    }
    node.elect_backup().await;
    true
}
