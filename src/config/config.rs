// src/config/config.rs
use crate::{
    miner::{session::SessionSettings, worker::ScanSettings},
    network::{pool::SessionOptions, transport::PoolEndpoint},
    stats::ReportSettings,
    types::{AlgorithmType, PriorityLevel},
    utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration structure for the mining application
///
/// Global scan, network and reporting policy plus one `[[pool]]` table per
/// configured pool. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker scan loop tuning
    pub scan: ScanSettings,

    /// Connection, retry and keep-alive policy
    pub network: SessionOptions,

    /// Telemetry cadence
    pub report: ReportSettings,

    /// Configured pools, each mined by an independent session
    #[serde(rename = "pool")]
    pub pools: Vec<PoolConfig>,
}

/// One pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Display name, also used to select the pool on the command line
    #[serde(default = "default_pool_name")]
    pub name: String,

    /// Pool URL (e.g., "stratum+tcp://pool.example.com:3333")
    pub url: String,

    /// Wallet address or pool username
    #[serde(default)]
    pub login: String,

    /// Worker password (often "x" if not required)
    #[serde(default = "default_password")]
    pub password: String,

    /// Hash variant the pool expects
    #[serde(default)]
    pub algorithm: AlgorithmType,

    /// Number of worker threads (0 = one per logical CPU)
    #[serde(default)]
    pub threads: usize,

    /// Scheduling priority of the worker threads
    #[serde(default)]
    pub priority: PriorityLevel,

    /// Force TLS regardless of the URL scheme
    #[serde(default)]
    pub tls: bool,

    /// Disabled pools are kept in the file but not mined
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_pool_name() -> String {
    "pool".into()
}

fn default_password() -> String {
    "x".into()
}

fn default_enabled() -> bool {
    true
}

impl PoolConfig {
    /// Pool entry with defaults for everything but the address and login
    pub fn new(url: impl Into<String>, login: impl Into<String>) -> Self {
        PoolConfig {
            name: default_pool_name(),
            url: url.into(),
            login: login.into(),
            password: default_password(),
            algorithm: AlgorithmType::default(),
            threads: 0,
            priority: PriorityLevel::default(),
            tls: false,
            enabled: default_enabled(),
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml(&config_str)
    }

    /// Parses and validates a TOML document
    pub fn from_toml(config_str: &str) -> Result<Self, MinerError> {
        let config: Config = toml::from_str(config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks pool names are unique and enabled pool URLs parse
    pub fn validate(&self) -> Result<(), MinerError> {
        let mut names = HashSet::new();
        for pool in &self.pools {
            if !names.insert(pool.name.as_str()) {
                return Err(MinerError::ConfigError(format!(
                    "Duplicate pool name '{}'",
                    pool.name
                )));
            }
            if pool.enabled {
                PoolEndpoint::from_config(pool).map_err(|e| {
                    MinerError::ConfigError(format!("Pool '{}': {}", pool.name, e))
                })?;
            }
        }
        Ok(())
    }

    /// Pools to mine
    pub fn enabled_pools(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.iter().filter(|p| p.enabled)
    }

    /// Looks a pool up by name
    pub fn find_pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// Session-wide settings shared by every pool
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            scan: self.scan.clone(),
            network: self.network.clone(),
            report: self.report.clone(),
        }
    }

    /// Generates a configuration template string
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# CryptoNight pool miner configuration\n\n");

        template.push_str("[scan]\n");
        template.push_str("# Seconds of hashing between checks for a new job\n");
        template.push_str("scan_time = 60\n");
        template.push_str("# Start each job at a random nonce inside the worker's range\n");
        template.push_str("randomize = false\n");
        template.push_str("# Nonces per chunk until a hashrate has been measured\n");
        template.push_str("fallback_batch = 64\n\n");

        template.push_str("[network]\n");
        template.push_str("# Seconds between reconnect attempts and failed logins\n");
        template.push_str("retry_delay = 10\n");
        template.push_str("# Ping the pool after this many seconds without a submission\n");
        template.push_str("ping_interval = 1\n");
        template.push_str("send_ping = true\n");
        template.push_str("# Log in again after this many seconds without a job at zero hashrate\n");
        template.push_str("idle_timeout = 60\n");
        template.push_str("connect_timeout = 30\n\n");

        template.push_str("[report]\n");
        template.push_str("# Hashrate aggregation period in seconds\n");
        template.push_str("interval = 1\n");
        template.push_str("# Seconds between summary log lines\n");
        template.push_str("log_interval = 60\n");
        template.push_str("# Aggregation passes kept for average/max\n");
        template.push_str("history = 60\n\n");

        template.push_str("# One [[pool]] table per pool\n");
        template.push_str("[[pool]]\n");
        template.push_str("name = \"example\"\n");
        template.push_str("# stratum+tcp:// for plain TCP, stratum+ssl:// for TLS\n");
        template.push_str("url = \"stratum+tcp://pool.example.com:3333\"\n");
        template.push_str("login = \"your_wallet_address\"\n");
        template.push_str("password = \"x\"\n");
        template.push_str("# Supported algorithms: cryptonight, cryptonight-light\n");
        template.push_str("algorithm = \"cryptonight\"\n");
        template.push_str("# Number of worker threads (0 = auto-detect)\n");
        template.push_str("threads = 0\n");
        template.push_str("# idle, low, normal, high or very-high\n");
        template.push_str("priority = \"normal\"\n");
        template.push_str("tls = false\n");
        template.push_str("enabled = true\n");

        template
    }
}

/// Serde adapter storing a [`std::time::Duration`] as fractional seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Writes the duration as seconds
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Reads seconds, rejecting negative and non-finite values
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
