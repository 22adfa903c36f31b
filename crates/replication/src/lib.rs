//! Primary-backup replication for the maze session.
//!
//! This crate provides everything a node needs to take part in a session:
//! - The tracker (rendezvous table and founder election)
//! - The node core: join protocol, primary handlers, state pushes, promotion
//! - Failure detection watchers for the primary and backup roles
//! - An in-process network for tests and simulations

pub mod config;
pub mod error;
pub mod node;
pub mod testkit;
pub mod tracker;
mod watcher;

pub use config::NodeConfig;
pub use error::{ReplicationError, Result};
pub use node::Node;
pub use testkit::LocalNetwork;
pub use tracker::Tracker;
