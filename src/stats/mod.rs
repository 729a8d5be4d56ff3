//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting mining statistics,
//! including:
//! - Per-worker hashrate samples and their periodic aggregation
//! - Share submission/acceptance tracking
//! - Hardware monitoring (CPU, memory, temperature) in the periodic log line
//!
//! The main component is [`StatsReporter`] which turns the raw samples of one
//! pool session into [`PoolTelemetry`].

/// Submodule containing the statistics reporter implementation
pub mod reporter;

// Re-export main components
pub use reporter::{
    HardwareStats, HashrateSample, PoolTelemetry, ReportSettings, ReporterHandle, StatsReporter,
    WorkReport, format_hashrate,
};
