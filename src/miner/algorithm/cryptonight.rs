// src/miner/algorithm/cryptonight.rs
//! CryptoNight algorithm implementation
//!
//! Provides the CryptoNight proof-of-work hash used by CryptoNote-based
//! currencies through the native `cryptonight` library.

use crate::miner::algorithm::HashOracle;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use cryptonight::cryptonight;

/// Variant number of the original CryptoNight in the native library
const CRYPTONIGHT_V0: i32 = 0;

/// Reports whether the CPU has AES-NI
pub fn cpu_has_aes() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("aes")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        false
    }
}

/// CryptoNight hash oracle
///
/// Stateless apart from the AES capability flag; all hashing is handled by
/// the underlying library, which picks its AES path on its own.
#[derive(Debug, Clone)]
pub struct CryptoNightOracle {
    hardware_aes: bool,
}

impl CryptoNightOracle {
    /// Creates an oracle, probing the CPU once
    pub fn new() -> Self {
        Self {
            hardware_aes: cpu_has_aes(),
        }
    }
}

impl Default for CryptoNightOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl HashOracle for CryptoNightOracle {
    fn digest(&self, blob: &[u8], variant: AlgorithmType) -> Result<[u8; 32], MinerError> {
        match variant {
            AlgorithmType::Cryptonight => {
                let hash = cryptonight(blob, blob.len(), CRYPTONIGHT_V0);
                hash.try_into().map_err(|_| {
                    MinerError::AlgorithmError("cryptonight returned a short digest".into())
                })
            }
            // TODO: route through a CryptoNight-Light backend once one is packaged as a crate
            AlgorithmType::CryptonightLight => Err(MinerError::AlgorithmError(
                "cryptonight-light is not provided by the cryptonight backend".into(),
            )),
        }
    }

    fn supports(&self, variant: AlgorithmType) -> bool {
        variant == AlgorithmType::Cryptonight
    }

    fn hardware_accelerated(&self) -> bool {
        self.hardware_aes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::{BLOB_LEN, write_nonce};

    #[test]
    fn digest_is_deterministic_and_nonce_sensitive() {
        let oracle = CryptoNightOracle::new();
        let mut blob = [0x42u8; BLOB_LEN];

        write_nonce(&mut blob, 1);
        let a = oracle.digest(&blob, AlgorithmType::Cryptonight).unwrap();
        let b = oracle.digest(&blob, AlgorithmType::Cryptonight).unwrap();
        assert_eq!(a, b);

        write_nonce(&mut blob, 2);
        let c = oracle.digest(&blob, AlgorithmType::Cryptonight).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn light_variant_is_reported_unsupported() {
        let oracle = CryptoNightOracle::new();
        assert!(oracle.supports(AlgorithmType::Cryptonight));
        assert!(!oracle.supports(AlgorithmType::CryptonightLight));
        assert!(
            oracle
                .digest(&[0u8; BLOB_LEN], AlgorithmType::CryptonightLight)
                .is_err()
        );
    }
}
