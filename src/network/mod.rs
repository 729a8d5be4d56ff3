// src/network/mod.rs
//! Network communication components
//!
//! This module handles all network interactions with Stratum mining pools:
//! - `protocol`: JSON-RPC message shapes and target decoding
//! - `transport`: line framing, TCP/TLS connections and pool addresses
//! - `pool`: the reconnecting session state machine

/// Stratum JSON-RPC messages
pub mod protocol;

/// Newline-delimited framing over TCP or TLS
///
/// Also hosts the [`Connector`] seam used to swap in other transports.
pub mod transport;

/// Mining pool session
///
/// Handles login, job distribution, solution submission, keep-alive pings
/// and reconnects.
pub mod pool;

// Re-export main components for cleaner imports
pub use pool::{PoolSession, SessionOptions, SessionState, SessionStatus};
pub use transport::{Connector, PoolEndpoint, TcpConnector, Transport};
