// src/miner/algorithm/mod.rs
//! Proof-of-work hash backends
//!
//! Workers never hash directly; they drive a [`HashOracle`], a pure,
//! thread-safe function from a prepared blob (nonce already written) to a
//! 32-byte digest. The production backend is [`cryptonight::CryptoNightOracle`].

/// CryptoNight backend
///
/// Wraps the native CryptoNight implementation and probes the CPU for
/// hardware AES support.
pub mod cryptonight;

use crate::types::AlgorithmType;
use crate::utils::error::MinerError;

pub use cryptonight::{CryptoNightOracle, cpu_has_aes};

/// Common interface for proof-of-work hash functions
///
/// Implementations must be callable concurrently from independent worker
/// threads without shared mutable state.
pub trait HashOracle: Send + Sync {
    /// Hashes a complete block template
    ///
    /// # Arguments
    /// * `blob` - The 76-byte template with the candidate nonce in place
    /// * `variant` - Which CryptoNight flavour to compute
    fn digest(&self, blob: &[u8], variant: AlgorithmType) -> Result<[u8; 32], MinerError>;

    /// Whether this backend can compute `variant` at all
    fn supports(&self, variant: AlgorithmType) -> bool;

    /// Whether a hardware acceleration path is in use (speed only)
    fn hardware_accelerated(&self) -> bool {
        false
    }
}
