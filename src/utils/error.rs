// src/utils/error.rs
use crate::miner::job;
use serde_json;
use std::io;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;
use url;

/// Main error type for the mining application
///
/// This enum represents all possible error conditions that can occur
/// during mining operations, including network, I/O, protocol, and
/// configuration errors.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to mining algorithms (e.g., unsupported variant)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// Errors related to network connectivity
    #[error("Network connection error: {0}")]
    ConnectionError(String),

    /// The pool closed the connection
    #[error("Connection closed by pool")]
    Disconnected,

    /// Errors in protocol handling or invalid protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Malformed job data (target, blob) sent by the pool
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Explicit error reply from the pool
    #[error("Pool error {code}: {message}")]
    PoolError {
        /// Error code reported by the pool
        code: i64,
        /// Error message reported by the pool
        message: String,
    },

    /// TLS setup or handshake errors
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Thread or async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

impl MinerError {
    /// Whether this error means the transport to the pool is unusable
    ///
    /// Transport failures are recovered by reconnecting; everything else
    /// is an application-level condition.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MinerError::ConnectionError(_)
                | MinerError::Disconnected
                | MinerError::TlsError(_)
                | MinerError::IoError(_)
        )
    }
}

/// Converts crossbeam channel send errors for submissions into MinerError
///
/// Used when a worker fails to hand a found solution to the pool session.
impl From<crossbeam_channel::SendError<job::Submission>> for MinerError {
    fn from(e: crossbeam_channel::SendError<job::Submission>) -> Self {
        MinerError::ChannelError(format!("Submission send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Hex only arrives from the pool (blob, target), so a failure here is
/// always a decode error on pool-supplied data.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::DecodeError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts line codec errors into MinerError
impl From<LinesCodecError> for MinerError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(e) => MinerError::IoError(e),
            LinesCodecError::MaxLineLengthExceeded => {
                MinerError::ProtocolError("Frame exceeds maximum line length".into())
            }
        }
    }
}

/// Converts async task join errors into MinerError
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(MinerError::Disconnected.is_transport());
        assert!(MinerError::IoError(io::Error::other("reset")).is_transport());
        assert!(!MinerError::DecodeError("bad target".into()).is_transport());
        assert!(
            !MinerError::PoolError {
                code: -1,
                message: "Unauthenticated".into()
            }
            .is_transport()
        );
    }

    #[test]
    fn hex_errors_become_decode_errors() {
        let err: MinerError = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, MinerError::DecodeError(_)));
    }
}
