// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains all components related to the mining process:
//! - The hash backend behind the [`HashOracle`] seam
//! - The shared, versioned job cell and nonce partitioning
//! - Worker threads and the per-pool session that owns them

/// Hash backends
///
/// Contains the [`HashOracle`] trait and the CryptoNight implementation.
pub mod algorithm;

/// Jobs, nonce ranges and the versioned job cell
pub mod job;

/// Per-thread scheduling priority
pub mod priority;

/// Per-pool orchestration of workers, pool connection and telemetry
pub mod session;

/// Worker thread implementation
///
/// Contains the adaptive nonce scan that performs the actual hash computations.
/// Workers read jobs from the [`JobState`] and submit found solutions.
pub mod worker;

// Re-export main components for cleaner imports
pub use self::algorithm::{CryptoNightOracle, HashOracle};
pub use self::job::{Job, JobState, NonceRange, Submission};
pub use self::session::{MiningSession, SessionSettings};
pub use self::worker::{ScanSettings, Worker, WorkerHandle};
