//! Command-line front end for the maze session.
//!
//! Provides commands for:
//! - Serving a tracker
//! - Running a node: serve its RPC surface, join, then play moves read
//!   from stdin while the board is redrawn after every update

pub mod commands;
pub mod config;
pub mod render;

pub use commands::Command;
pub use config::CliConfig;
