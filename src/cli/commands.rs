// src/cli/commands.rs
use crate::types::{AlgorithmType, PriorityLevel};
use crate::utils::logging::Verbosity;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// CryptoNight pool miner
#[derive(Parser, Debug)]
#[command(name = "cn-miner-rs")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Show extra debug information
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Log every JSON-RPC frame exchanged with the pool
    #[arg(short = 'P', long, global = true)]
    pub dump_protocol: bool,

    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

impl Commands {
    /// Logging verbosity selected by the global flags
    pub fn verbosity(&self) -> Verbosity {
        Verbosity {
            quiet: self.quiet,
            debug: self.debug,
            dump_protocol: self.dump_protocol,
        }
    }
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Mine on the pools listed in a configuration file
    Start(StartOptions),

    /// Mine on a single pool given on the command line
    Run(RunOptions),

    /// Measure raw hashing speed without a pool
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for mining from a configuration file
#[derive(Args, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Worker threads per pool (overrides config)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Only mine on the named pool
    #[arg(long)]
    pub pool: Option<String>,
}

/// Options for mining on one pool without a configuration file
#[derive(Args, Debug)]
pub struct RunOptions {
    /// Pool URL (stratum+tcp://host:port, stratum+ssl://host:port or host:port)
    #[arg(short = 'o', long)]
    pub url: String,

    /// Wallet address or pool username
    #[arg(short = 'u', long)]
    pub login: String,

    /// Worker password
    #[arg(short = 'p', long, default_value = "x")]
    pub password: String,

    /// Hash variant the pool expects
    #[arg(short, long, value_enum, default_value_t = AlgorithmType::Cryptonight)]
    pub algorithm: AlgorithmType,

    /// Worker threads (0 = one per logical CPU)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Scheduling priority of the worker threads
    #[arg(long, value_enum, default_value_t = PriorityLevel::Normal)]
    pub priority: PriorityLevel,

    /// Start each job at a random nonce inside the worker's range
    #[arg(short, long)]
    pub randomize: bool,

    /// Force TLS regardless of the URL scheme
    #[arg(long)]
    pub tls: bool,
}

/// Options for running hashing benchmarks
#[derive(Args, Debug)]
pub struct BenchmarkOptions {
    /// Algorithm to benchmark
    #[arg(short, long, value_enum, default_value_t = AlgorithmType::Cryptonight)]
    pub algorithm: AlgorithmType,

    /// Duration of benchmark in seconds
    #[arg(short = 's', long, default_value_t = 60)]
    pub duration: u64,

    /// Number of threads to use
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

/// Options for generating configuration files
#[derive(Args, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_parses() {
        let cli = Commands::parse_from([
            "cn-miner-rs",
            "-P",
            "run",
            "-o",
            "stratum+ssl://pool.example.com:443",
            "-u",
            "wallet",
            "-a",
            "cryptonight-light",
            "-t",
            "3",
            "--priority",
            "idle",
            "-r",
        ]);
        assert!(cli.verbosity().dump_protocol);
        let Action::Run(opts) = cli.action else {
            panic!("expected run");
        };
        assert_eq!(opts.login, "wallet");
        assert_eq!(opts.password, "x");
        assert_eq!(opts.algorithm, AlgorithmType::CryptonightLight);
        assert_eq!(opts.threads, 3);
        assert_eq!(opts.priority, PriorityLevel::Idle);
        assert!(opts.randomize);
        assert!(!opts.tls);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Commands::parse_from(["cn-miner-rs", "start", "--pool", "main", "-q"]);
        assert!(cli.quiet);
        let Action::Start(opts) = cli.action else {
            panic!("expected start");
        };
        assert_eq!(opts.config, PathBuf::from("config.toml"));
        assert_eq!(opts.pool.as_deref(), Some("main"));
        assert_eq!(opts.threads, None);
    }

    #[test]
    fn quiet_conflicts_with_debug() {
        assert!(Commands::try_parse_from(["cn-miner-rs", "-q", "-d", "config"]).is_err());
    }
}
