//! Wire protocol for the maze session over TCP.
//!
//! This crate provides:
//! - A length-delimited bincode codec for requests and responses
//! - A generic request server that feeds frames to a `Service`
//! - `TcpTransport` and `TrackerClient`, the client side of the node and
//!   tracker RPC surfaces
//!
//! Every RPC opens one connection, writes one request frame and reads one
//! response frame. Any failure along the way surfaces as a
//! `TransportError`, which callers read as "the peer is dead".

pub mod client;
pub mod codec;
pub mod server;

pub use client::{TcpTransport, TrackerClient, DEFAULT_RPC_TIMEOUT};
pub use codec::BincodeCodec;
pub use server::{bind, serve};
