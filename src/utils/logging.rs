// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! This module handles logging setup for the miner application, including:
//! - Standard logging configuration with quiet/debug/protocol verbosity
//! - Benchmark-specific logging
//! - Custom log formatting
//!
//! Uses `env_logger` under the hood with custom formatting and filtering.
//! Raw JSON-RPC chatter is logged at trace level under the
//! [`PROTOCOL_TARGET`] target and only shown with `--dump-protocol`.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Log target used for every JSON-RPC frame sent to or received from a pool
pub const PROTOCOL_TARGET: &str = "protocol";

/// Output verbosity selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity {
    /// Suppress everything except errors
    pub quiet: bool,
    /// Show extra debug information
    pub debug: bool,
    /// Show all JSON-RPC chatter
    pub dump_protocol: bool,
}

impl Verbosity {
    /// Base level filter for the crate's own log records
    pub fn level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// Initializes the logging subsystem
///
/// # Configuration
/// - Logs to stdout
/// - Level from `verbosity` (info unless quiet/debug)
/// - Protocol frames at trace level when `dump_protocol` is set
/// - `RUST_LOG` directives are applied on top when present
pub fn init_logging(verbosity: Verbosity) {
    let mut builder = common_log_config();
    builder.filter(None, verbosity.level());

    if verbosity.dump_protocol {
        builder.filter(Some(PROTOCOL_TARGET), LevelFilter::Trace);
    }

    if let Ok(directives) = env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }

    // A second init (tests, embedding) is harmless
    let _ = builder.try_init();
}

/// Configures benchmark-specific logging
///
/// # Differences from Standard Logging
/// - Default log level: Debug (if RUST_LOG not set)
/// - Same custom formatting as standard logging
pub fn init_bench_logging() {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.parse_env("RUST_LOG");
    }

    let _ = builder.try_init();
}

/// Creates and configures a base logger builder with common settings
///
/// Format: `[<timestamp> <level> <module>:<line>] <message>` on stdout.
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(Verbosity::default().level(), LevelFilter::Info);
        let debug = Verbosity {
            debug: true,
            ..Default::default()
        };
        assert_eq!(debug.level(), LevelFilter::Debug);
        let quiet = Verbosity {
            quiet: true,
            debug: true,
            ..Default::default()
        };
        assert_eq!(quiet.level(), LevelFilter::Error);
    }
}
