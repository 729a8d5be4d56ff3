//! CN Miner - CryptoNight pool mining client in Rust
//!
//! This crate provides a Stratum pool miner for CryptoNote-family coins with support for:
//! - CryptoNight and CryptoNight-Light jobs behind a pluggable hash backend
//! - Several independent pool sessions, each with its own worker set
//! - Live resizing and re-prioritizing of worker threads
//! - Reconnecting TCP/TLS pool sessions with keep-alive pings
//! - Per-pool telemetry and performance benchmarking

#![warn(missing_docs)]
#![deny(unsafe_code)]

/// Miner core implementation including jobs, workers and sessions
pub mod miner;

/// Network communication components for pool connections
pub mod network;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::{Config, PoolConfig};
pub use miner::{
    CryptoNightOracle, HashOracle, Job, JobState, MiningSession, NonceRange, SessionSettings,
    Submission,
};
pub use network::{PoolSession, SessionState};
pub use stats::{HardwareStats, PoolTelemetry, StatsReporter};
pub use types::{AlgorithmType, PriorityLevel};
pub use utils::{MinerError, Verbosity, init_logging};
