//! Subcommands.

use crate::render::render;
use anyhow::Context;
use clap::Subcommand;
use corelib::{
    MemberAddress, MemberId, MoveCode, NodeRequest, NodeResponse, TrackerRequest,
    TrackerResponse,
};
use replication::{Node, NodeConfig, Tracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streaming::{bind, serve, TcpTransport, TrackerClient, DEFAULT_RPC_TIMEOUT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the rendezvous tracker
    Tracker {
        /// Port to listen on
        #[arg(long, default_value_t = 7000)]
        port: u16,
        /// Side length of the square board
        #[arg(long, default_value_t = 15)]
        dim: usize,
        /// Number of treasures kept on the board
        #[arg(long, default_value_t = 10)]
        treasures: usize,
    },
    /// Join a session as a player node
    Node {
        /// Tracker endpoint, `host:port`
        #[arg(long)]
        tracker: String,
        /// Member id, unique within the session
        #[arg(long)]
        id: String,
        /// Host other members reach this node at
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to serve on; 0 picks a free one
        #[arg(long, default_value_t = 0)]
        port: u16,
        /// JSON file with node timing settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Command {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Command::Tracker {
                port,
                dim,
                treasures,
            } => run_tracker(port, dim, treasures).await,
            Command::Node {
                tracker,
                id,
                host,
                port,
                config,
            } => {
                let config = match config {
                    Some(path) => load_config(&path)?,
                    None => NodeConfig::default(),
                };
                run_node(tracker, id, host, port, config).await
            }
        }
    }
}

/// Read a [`NodeConfig`] from JSON. Missing fields keep their defaults.
pub fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

async fn run_tracker(port: u16, dim: usize, treasures: usize) -> anyhow::Result<()> {
    let tracker = Arc::new(Tracker::new(dim, treasures)?);
    let listener = bind(&format!("0.0.0.0:{}", port)).await?;
    info!(port, dim, treasures, "tracker ready");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });
    serve::<TrackerRequest, TrackerResponse, Tracker>(listener, tracker, shutdown).await?;
    Ok(())
}

async fn run_node(
    tracker: String,
    id: String,
    host: String,
    port: u16,
    config: NodeConfig,
) -> anyhow::Result<()> {
    let listener = bind(&format!("0.0.0.0:{}", port)).await?;
    let port = listener.local_addr()?.port();
    let me = MemberAddress::new(host, port, id.as_str());
    let node = Node::new(
        me.clone(),
        Arc::new(TcpTransport::default()),
        Arc::new(TrackerClient::new(tracker, DEFAULT_RPC_TIMEOUT)),
        config,
    );

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve::<NodeRequest, NodeResponse, Node>(
        listener,
        Arc::new(node.clone()),
        shutdown.clone(),
    ));
    tokio::spawn(draw_views(node.clone(), me.id.clone()));

    info!(member = %me, "joining");
    let role = node.join().await?;
    info!(member = %me, %role, "joined");

    let mut left = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let code: MoveCode = match line.parse() {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "ignoring input");
                continue;
            }
        };
        // A leaving primary keeps serving until shutdown below; its backup
        // takes over once this process stops answering pings
        if let Err(e) = node.play(code).await {
            error!(error = %e, "move failed");
        }
        if code == MoveCode::Exit {
            left = true;
            break;
        }
    }

    // Stdin closed without an explicit exit
    if !left {
        node.leave().await?;
    }
    shutdown.cancel();
    server.await??;
    Ok(())
}

/// Redraw the board on stdout after every published update.
async fn draw_views(node: Node, me: MemberId) {
    let mut views = node.subscribe();
    while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();
        if let Some(view) = view {
            println!("{}", render(&view, &me));
        }
    }
}
