//! In-process network for tests and simulations.
//!
//! `LocalNetwork` routes node requests straight to registered [`Node`]s and
//! lets a test inject crash-stop failures: [`kill`](LocalNetwork::kill) makes
//! a node unreachable for good, [`block`](LocalNetwork::block) drops one kind
//! of request to one node. Handlers run on their own task, as they would
//! behind a socket, and callers give up after `call_timeout`.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::node::Node;
use crate::tracker::Tracker;
use async_trait::async_trait;
use corelib::{
    MemberAddress, MemberId, NodeRequest, NodeResponse, RequestKind, Service, Transport,
    TransportError,
};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bound on a single in-process call.
///
/// default: `500 milliseconds`
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(500);

pub struct LocalNetwork {
    tracker: Arc<Tracker>,
    config: NodeConfig,
    call_timeout: Duration,
    next_port: AtomicU16,
    nodes: DashMap<MemberId, Node>,
    blocked: DashSet<(MemberId, RequestKind)>,
}

impl LocalNetwork {
    /// Network whose nodes all use `config` and share `tracker`.
    pub fn new(tracker: Arc<Tracker>, config: NodeConfig) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            config,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            next_port: AtomicU16::new(10_000),
            nodes: DashMap::new(),
            blocked: DashSet::new(),
        })
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Create and register a node named `id` without joining. Each node gets
    /// a distinct seed derived from the configured one.
    pub fn node(self: &Arc<Self>, id: &str) -> Node {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let mut config = self.config.clone();
        config.seed = config.seed.map(|seed| seed.wrapping_add(u64::from(port)));
        let node = Node::new(
            MemberAddress::new("local", port, id),
            self.clone(),
            self.tracker.clone(),
            config,
        );
        self.register(node.clone());
        node
    }

    /// Create, register and join a node.
    pub async fn spawn_node(self: &Arc<Self>, id: &str) -> Result<Node> {
        let node = self.node(id);
        node.join().await?;
        Ok(node)
    }

    pub fn register(&self, node: Node) {
        self.nodes.insert(node.id().clone(), node);
    }

    /// Crash-stop a node: every later call to it fails. Its watcher notices
    /// on its next self-ping and exits.
    pub fn kill(&self, id: &str) -> Option<Node> {
        debug!(member = id, "killing node");
        self.nodes.remove(&MemberId::new(id)).map(|(_, node)| node)
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.nodes.contains_key(&MemberId::new(id))
    }

    /// Drop every `kind` request sent to `id`.
    pub fn block(&self, id: &str, kind: RequestKind) {
        self.blocked.insert((MemberId::new(id), kind));
    }

    pub fn unblock(&self, id: &str, kind: RequestKind) {
        self.blocked.remove(&(MemberId::new(id), kind));
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn call(
        &self,
        target: &MemberAddress,
        request: NodeRequest,
    ) -> std::result::Result<NodeResponse, TransportError> {
        if self.blocked.contains(&(target.id.clone(), request.kind())) {
            return Err(TransportError::Unreachable(format!(
                "{:?} to {} blocked",
                request.kind(),
                target
            )));
        }
        // Clone out of the map so no shard lock is held across the call
        let node = self
            .nodes
            .get(&target.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable(target.to_string()))?;

        let handler = tokio::spawn(async move { node.handle(request).await });
        match tokio::time::timeout(self.call_timeout, handler).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(TransportError::Unreachable(format!("{}: {}", target, e))),
            Err(_) => Err(TransportError::Timeout(target.to_string())),
        }
    }
}
