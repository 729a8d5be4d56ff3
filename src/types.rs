// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported proof-of-work algorithms
///
/// CryptoNote-family pools announce one of the two CryptoNight flavours;
/// the variant travels with every job so workers hash with the right one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// Original CryptoNight (2 MB scratchpad)
    #[default]
    #[value(name = "cryptonight")]
    #[serde(rename = "cryptonight", alias = "Cryptonight", alias = "cn")]
    Cryptonight,

    /// CryptoNight-Light (1 MB scratchpad, used by AEON-style coins)
    #[value(name = "cryptonight-light")]
    #[serde(
        rename = "cryptonight-light",
        alias = "Cryptonight-Light",
        alias = "cn-lite"
    )]
    CryptonightLight,
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmType::Cryptonight => write!(f, "cryptonight"),
            AlgorithmType::CryptonightLight => write!(f, "cryptonight-light"),
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cn" | "cryptonight" => Ok(AlgorithmType::Cryptonight),
            "cn-lite" | "cryptonight-lite" | "cryptonight-light" => {
                Ok(AlgorithmType::CryptonightLight)
            }
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// OS scheduling priority applied to hashing threads
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityLevel {
    /// Only run when nothing else wants the CPU
    Idle,
    /// Below normal
    Low,
    /// Normal scheduling
    #[default]
    Normal,
    /// Above normal (usually needs privileges)
    High,
    /// Highest available (usually needs privileges)
    #[serde(alias = "very_high", alias = "very high")]
    VeryHigh,
}

impl PriorityLevel {
    const ALL: [PriorityLevel; 5] = [
        PriorityLevel::Idle,
        PriorityLevel::Low,
        PriorityLevel::Normal,
        PriorityLevel::High,
        PriorityLevel::VeryHigh,
    ];

    /// Unix nice value for this level
    pub fn nice(self) -> i32 {
        match self {
            PriorityLevel::Idle => 19,
            PriorityLevel::Low => 10,
            PriorityLevel::Normal => 0,
            PriorityLevel::High => -10,
            PriorityLevel::VeryHigh => -20,
        }
    }

    /// Compact encoding for atomics
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`PriorityLevel::as_u8`]; unknown values map to `Normal`
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(PriorityLevel::Normal)
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLevel::Idle => write!(f, "idle"),
            PriorityLevel::Low => write!(f, "low"),
            PriorityLevel::Normal => write!(f, "normal"),
            PriorityLevel::High => write!(f, "high"),
            PriorityLevel::VeryHigh => write!(f, "very-high"),
        }
    }
}

impl FromStr for PriorityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', ' '], "-").as_str() {
            "idle" => Ok(PriorityLevel::Idle),
            "low" => Ok(PriorityLevel::Low),
            "normal" => Ok(PriorityLevel::Normal),
            "high" => Ok(PriorityLevel::High),
            "very-high" => Ok(PriorityLevel::VeryHigh),
            _ => Err(format!("Unknown priority level: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("Cryptonight".parse(), Ok(AlgorithmType::Cryptonight));
        assert_eq!(
            "Cryptonight-Light".parse(),
            Ok(AlgorithmType::CryptonightLight)
        );
        assert!("randomx".parse::<AlgorithmType>().is_err());
        assert_eq!(AlgorithmType::CryptonightLight.to_string(), "cryptonight-light");
    }

    #[test]
    fn priority_round_trips_through_u8() {
        for level in PriorityLevel::ALL {
            assert_eq!(PriorityLevel::from_u8(level.as_u8()), level);
        }
        assert_eq!(PriorityLevel::from_u8(200), PriorityLevel::Normal);
        assert_eq!("very high".parse(), Ok(PriorityLevel::VeryHigh));
        assert_eq!("very_high".parse(), Ok(PriorityLevel::VeryHigh));
    }
}
