// src/main.rs
use clap::Parser;
use cn_miner_rs::miner::algorithm::cpu_has_aes;
use cn_miner_rs::miner::job::{BLOB_LEN, write_nonce};
use cn_miner_rs::network::protocol;
use cn_miner_rs::stats::format_hashrate;
use cn_miner_rs::utils::logging::init_bench_logging;
use cn_miner_rs::{self, *};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Main entry point for the miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
///
/// # Flow
/// 1. Parses command line arguments
/// 2. Delegates to appropriate subcommand handler
/// 3. Propagates any errors upward
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();
    let verbosity = cli.verbosity();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts, verbosity),
        cli::Action::Run(opts) => run_single(opts, verbosity),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Mines on every enabled pool of a configuration file
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads and validates configuration
/// 3. Applies CLI overrides and the pool filter
/// 4. Runs one session per pool until Ctrl-C
fn start_mining(opts: cli::StartOptions, verbosity: Verbosity) -> Result<(), MinerError> {
    init_logging(verbosity);

    let config = config::load(&opts.config)?;
    let mut pools: Vec<PoolConfig> = match &opts.pool {
        Some(name) => {
            let pool = config.find_pool(name).ok_or_else(|| {
                MinerError::ConfigError(format!("No pool named '{}' in config", name))
            })?;
            vec![pool.clone()]
        }
        None => config.enabled_pools().cloned().collect(),
    };
    if pools.is_empty() {
        return Err(MinerError::ConfigError("No enabled pools in config".into()));
    }

    // Apply CLI overrides
    if let Some(threads) = opts.threads {
        for pool in &mut pools {
            pool.threads = threads;
        }
    }

    mine(pools, config.session_settings())
}

/// Mines on a single pool described entirely by command line flags
fn run_single(opts: cli::RunOptions, verbosity: Verbosity) -> Result<(), MinerError> {
    init_logging(verbosity);

    let mut pool = PoolConfig::new(opts.url, opts.login);
    pool.password = opts.password;
    pool.algorithm = opts.algorithm;
    pool.threads = opts.threads;
    pool.priority = opts.priority;
    pool.tls = opts.tls;

    let mut settings = SessionSettings::default();
    settings.scan.randomize = opts.randomize;

    mine(vec![pool], settings)
}

/// Starts a session per pool and blocks until Ctrl-C
fn mine(pools: Vec<PoolConfig>, settings: SessionSettings) -> Result<(), MinerError> {
    log::info!("{} starting", protocol::agent());
    log::info!(
        "{} logical CPU(s), hardware AES: {}",
        num_cpus::get(),
        if cpu_has_aes() { "yes" } else { "no" }
    );

    let oracle: Arc<dyn HashOracle> = Arc::new(CryptoNightOracle::new());
    let mut sessions = Vec::with_capacity(pools.len());

    for pool in pools {
        let threads = pool.threads;
        let mut session = MiningSession::new(pool, settings.clone(), Arc::clone(&oracle));
        session.start(threads)?;
        sessions.push(session);
    }

    let rt = Runtime::new()?;
    rt.block_on(tokio::signal::ctrl_c())?;
    log::info!("Shutting down");

    for session in &mut sessions {
        let telemetry = session.telemetry();
        log::info!(
            "{}: {}/{} accepted, average {}",
            telemetry.name,
            telemetry.accepted,
            telemetry.submitted,
            format_hashrate(telemetry.average)
        );
        session.stop();
    }
    Ok(())
}

/// Runs hashing benchmarks
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Spawns hashing threads over a zeroed template
/// 3. Logs per-thread progress every second
/// 4. Reports the total and average hashrate
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let oracle = CryptoNightOracle::new();
    if !oracle.supports(opts.algorithm) {
        return Err(MinerError::AlgorithmError(format!(
            "{} is not supported by the hash backend",
            opts.algorithm
        )));
    }
    let oracle = Arc::new(oracle);
    let total = Arc::new(AtomicU64::new(0));
    let duration = Duration::from_secs(opts.duration);

    log::info!(
        "Starting {} benchmark for {} seconds on {} thread(s), hardware AES: {}",
        opts.algorithm,
        opts.duration,
        opts.threads,
        oracle.hardware_accelerated()
    );

    let start_time = Instant::now();
    let handles = (0..opts.threads.max(1))
        .map(|index| {
            let oracle = Arc::clone(&oracle);
            let total = Arc::clone(&total);
            let variant = opts.algorithm;
            std::thread::Builder::new()
                .name(format!("cn-bench-{}", index))
                .spawn(move || -> Result<(), MinerError> {
                    let mut blob = [0u8; BLOB_LEN];
                    let mut nonce = 0u32;
                    let mut last_log = Instant::now();
                    let mut hashes = 0u64;

                    while start_time.elapsed() < duration {
                        write_nonce(&mut blob, nonce);
                        oracle.digest(&blob, variant)?;
                        nonce = nonce.wrapping_add(1);
                        hashes += 1;

                        // Log progress every second
                        if last_log.elapsed() >= Duration::from_secs(1) {
                            let rate = hashes as f64 / last_log.elapsed().as_secs_f64();
                            log::debug!("Thread {}: {}", index, format_hashrate(rate));
                            total.fetch_add(hashes, Ordering::Relaxed);
                            hashes = 0;
                            last_log = Instant::now();
                        }
                    }
                    total.fetch_add(hashes, Ordering::Relaxed);
                    Ok(())
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Wait for all threads to complete
    for handle in handles {
        handle
            .join()
            .map_err(|_| MinerError::TaskError("benchmark thread panicked".into()))??;
    }

    // Report final results
    let hashes = total.load(Ordering::Relaxed);
    let elapsed = start_time.elapsed().as_secs_f64();
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", hashes);
    log::info!(
        "Average hashrate: {}",
        format_hashrate(hashes as f64 / elapsed.max(f64::EPSILON))
    );
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Writes the configuration template to the requested file
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    std::fs::write(&opts.output, config::generate_template())?;
    println!("Configuration template written to {}", opts.output.display());
    Ok(())
}
