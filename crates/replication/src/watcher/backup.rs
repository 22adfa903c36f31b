//! Backup watcher: pings the primary and takes over once it stops answering.

use super::run_ticks;
use crate::node::Node;
use corelib::Role;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(super) async fn run(node: Node, token: CancellationToken) {
    info!(member = %node.id(), "backup watcher started");
    run_ticks(&node, &token, || tick(&node)).await;
    info!(member = %node.id(), "backup watcher stopped");
}

async fn tick(node: &Node) -> bool {
    if let Err(e) = node.peer(node.me()).ping().await {
        warn!(error = %e, "own node unreachable");
        return false;
    }
    if node.role().await != Role::Backup {
        return false;
    }

    let alive = match node.primary_address().await {
        Some(primary) => match node.peer(&primary).ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(primary = %primary.id, error = %e, "primary unreachable");
                false
            }
        },
        None => {
            error!("backup cannot resolve its primary");
            false
        }
    };
    if alive {
        return true;
    }

    node.promote_self_to_primary().await;
    false
}
