// src/miner/session.rs
//! Per-pool mining orchestrator
//!
//! A [`MiningSession`] ties one [`PoolSession`] to a resizable set of
//! workers. Sessions for different pools share nothing.

use crate::config::PoolConfig;
use crate::miner::algorithm::HashOracle;
use crate::miner::job::{JobState, Submission};
use crate::miner::worker::{ScanSettings, Worker, WorkerHandle};
use crate::network::pool::{
    PoolSession, SessionHandles, SessionOptions, SessionState, SessionStatus,
};
use crate::network::transport::{Connector, PoolEndpoint};
use crate::stats::{
    HashrateSample, PoolTelemetry, ReportSettings, ReporterHandle, StatsReporter, WorkReport,
};
use crate::types::PriorityLevel;
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Settings shared by every pool session
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// Worker scan loop tuning
    pub scan: ScanSettings,
    /// Pool connection policy
    pub network: SessionOptions,
    /// Telemetry cadence
    pub report: ReportSettings,
}

/// Everything that exists only while the session runs
struct Running {
    job_state: Arc<JobState>,
    workers: Vec<WorkerHandle>,
    submit_tx: Sender<Submission>,
    submit_rx: Receiver<Submission>,
    shutdown: CancellationToken,
    pool_thread: Option<JoinHandle<()>>,
    reporter: Option<ReporterHandle>,
}

/// Orchestrates mining on one pool
pub struct MiningSession {
    pool: PoolConfig,
    settings: SessionSettings,
    oracle: Arc<dyn HashOracle>,
    connector: Option<Arc<dyn Connector>>,
    work: Arc<WorkReport>,
    status: Arc<SessionStatus>,
    total_hashrate: Arc<HashrateSample>,
    reporter: Arc<StatsReporter>,
    running: Option<Running>,
}

impl MiningSession {
    /// Creates a stopped session for `pool`
    ///
    /// # Arguments
    /// * `pool` - Pool address, credentials, threads and priority
    /// * `settings` - Scan, network and reporting policy
    /// * `oracle` - Hash backend shared by all workers
    pub fn new(pool: PoolConfig, settings: SessionSettings, oracle: Arc<dyn HashOracle>) -> Self {
        let work = Arc::new(WorkReport::new());
        let status = Arc::new(SessionStatus::new());
        let total_hashrate = Arc::new(HashrateSample::new());
        let reporter = Arc::new(StatsReporter::new(
            pool.name.clone(),
            settings.report.clone(),
            Arc::clone(&work),
            Arc::clone(&status),
            Arc::clone(&total_hashrate),
        ));

        MiningSession {
            pool,
            settings,
            oracle,
            connector: None,
            work,
            status,
            total_hashrate,
            reporter,
            running: None,
        }
    }

    /// Uses `connector` instead of plain TCP/TLS
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Pool display name
    pub fn name(&self) -> &str {
        &self.pool.name
    }

    /// Starts `threads` workers (0 = one per logical CPU) and the pool session
    pub fn start(&mut self, threads: usize) -> Result<(), MinerError> {
        if self.running.is_some() {
            return Err(MinerError::InputError(format!(
                "Mining on '{}' is already running",
                self.pool.name
            )));
        }
        if self.pool.login.trim().is_empty() {
            return Err(MinerError::ConfigError(format!(
                "Pool '{}' has no login configured",
                self.pool.name
            )));
        }

        let endpoint = PoolEndpoint::from_config(&self.pool)?;
        if !self.oracle.supports(endpoint.algorithm) {
            return Err(MinerError::AlgorithmError(format!(
                "{} is not supported by the hash backend",
                endpoint.algorithm
            )));
        }

        let count = if threads == 0 { num_cpus::get() } else { threads };
        log::info!(
            "Starting {} worker(s) on {} ({}, priority {})",
            count,
            endpoint,
            endpoint.algorithm,
            self.pool.priority
        );

        self.work.reset();
        self.status.clear_error();
        self.reporter.clear();

        let (submit_tx, submit_rx) = crossbeam_channel::unbounded();
        self.running = Some(Running {
            job_state: Arc::new(JobState::new(count)),
            workers: Vec::with_capacity(count),
            submit_tx,
            submit_rx,
            shutdown: CancellationToken::new(),
            pool_thread: None,
            reporter: None,
        });

        if let Err(e) = self.launch(endpoint, count) {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn launch(&mut self, endpoint: PoolEndpoint, count: usize) -> Result<(), MinerError> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| MinerError::TaskError("session is not running".into()))?;

        for index in 0..count {
            let worker = spawn_worker(
                index,
                running,
                &self.oracle,
                &self.settings.scan,
                self.pool.priority,
            )?;
            running.workers.push(worker);
        }
        self.reporter.set_samples(samples(&running.workers));

        let handles = SessionHandles {
            job_state: Arc::clone(&running.job_state),
            work: Arc::clone(&self.work),
            status: Arc::clone(&self.status),
            total_hashrate: Arc::clone(&self.total_hashrate),
        };
        let mut session = PoolSession::new(
            endpoint,
            self.settings.network.clone(),
            handles,
            running.submit_rx.clone(),
            running.shutdown.clone(),
        );
        if let Some(connector) = &self.connector {
            session = session.with_connector(Arc::clone(connector));
        }

        let pool_thread = std::thread::Builder::new()
            .name(format!("cn-pool-{}", self.pool.name))
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(session.run()),
                    Err(e) => log::error!("Failed to start pool runtime: {}", e),
                }
            })?;
        running.pool_thread = Some(pool_thread);

        running.reporter = Some(self.reporter.start_reporting()?);
        Ok(())
    }

    /// Stops workers and the pool session; a no-op when already stopped
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        for worker in &running.workers {
            worker.shutdown();
        }
        for worker in running.workers.drain(..) {
            if let Err(e) = worker.join() {
                log::error!("{}", e);
            }
        }

        running.shutdown.cancel();
        if let Some(thread) = running.pool_thread.take() {
            if thread.join().is_err() {
                log::error!("Pool session thread for '{}' panicked", self.pool.name);
            }
        }

        let dropped = running.submit_rx.try_iter().count();
        if dropped > 0 {
            log::debug!("Dropped {} unsent submissions", dropped);
        }

        if let Some(reporter) = running.reporter.take() {
            reporter.stop();
        }
        self.reporter.set_samples(Vec::new());
        self.reporter.clear();
        self.status.clear_error();
        self.status.set_state(SessionState::Disconnected);

        log::info!("Mining on '{}' stopped", self.pool.name);
    }

    /// Changes the number of workers
    ///
    /// Growing republishes the job for the new count first, so old and new
    /// workers all partition for the same total. Shrinking stops the
    /// highest-indexed workers, then republishes so the rest re-partition.
    pub fn resize(&mut self, count: usize) -> Result<(), MinerError> {
        if count == 0 {
            return Err(MinerError::InputError(
                "worker count must be at least 1".into(),
            ));
        }
        let running = self.running.as_mut().ok_or_else(|| {
            MinerError::InputError(format!("Mining on '{}' is not running", self.pool.name))
        })?;

        let current = running.workers.len();
        if count > current {
            let job_state = Arc::clone(&running.job_state);
            let submit_tx = running.submit_tx.clone();
            grow_workers(&job_state, &mut running.workers, count, |index| {
                Worker::new(
                    index,
                    Arc::clone(&job_state),
                    Arc::clone(&self.oracle),
                    submit_tx.clone(),
                    self.settings.scan.clone(),
                    self.pool.priority,
                )
                .spawn()
            })?;
        } else if count < current {
            let removed = running.workers.split_off(count);
            for worker in &removed {
                worker.shutdown();
            }
            for worker in removed {
                worker.join()?;
            }
            running.job_state.set_worker_count(count);
        } else {
            return Ok(());
        }

        self.reporter.set_samples(samples(&running.workers));
        log::info!(
            "Resized '{}' from {} to {} worker(s)",
            self.pool.name,
            current,
            count
        );
        Ok(())
    }

    /// Applies a new scheduling priority to every worker
    ///
    /// Each worker picks it up before its next hash.
    pub fn change_priority(&mut self, level: PriorityLevel) {
        self.pool.priority = level;
        if let Some(running) = &self.running {
            for worker in &running.workers {
                worker.set_priority(level);
            }
        }
        log::info!("Priority of '{}' set to {}", self.pool.name, level);
    }

    /// Aggregated hashrate, share counters, difficulty and last error
    pub fn telemetry(&self) -> PoolTelemetry {
        self.reporter.telemetry()
    }

    /// Whether workers are running
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Number of live workers
    pub fn thread_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.workers.len())
    }

    /// Live worker handles, for inspecting ranges and versions
    pub fn workers(&self) -> &[WorkerHandle] {
        self.running.as_ref().map_or(&[], |r| r.workers.as_slice())
    }

    /// Current job cell, while running
    pub fn job_state(&self) -> Option<Arc<JobState>> {
        self.running.as_ref().map(|r| Arc::clone(&r.job_state))
    }
}

impl Drop for MiningSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(
    index: usize,
    running: &Running,
    oracle: &Arc<dyn HashOracle>,
    scan: &ScanSettings,
    priority: PriorityLevel,
) -> Result<WorkerHandle, MinerError> {
    Worker::new(
        index,
        Arc::clone(&running.job_state),
        Arc::clone(oracle),
        running.submit_tx.clone(),
        scan.clone(),
        priority,
    )
    .spawn()
}

/// Adds workers up to `count`
///
/// The new count is published before spawning so every worker partitions
/// for the same total. If a spawn fails the new workers are stopped and the
/// previous count is published again.
fn grow_workers(
    job_state: &JobState,
    workers: &mut Vec<WorkerHandle>,
    count: usize,
    mut spawn: impl FnMut(usize) -> Result<WorkerHandle, MinerError>,
) -> Result<(), MinerError> {
    let current = workers.len();
    job_state.set_worker_count(count);

    for index in current..count {
        match spawn(index) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                let spawned = workers.split_off(current);
                for worker in &spawned {
                    worker.shutdown();
                }
                for worker in spawned {
                    if let Err(e) = worker.join() {
                        log::error!("{}", e);
                    }
                }
                job_state.set_worker_count(current);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn samples(workers: &[WorkerHandle]) -> Vec<Arc<HashrateSample>> {
    workers.iter().map(WorkerHandle::hashrate_sample).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::{BLOB_LEN, NonceRange};
    use crate::network::transport::mock::{self, MockConnector, MockHandle};
    use crate::types::AlgorithmType;
    use serde_json::json;
    use std::time::Duration;

    /// Never finds a solution
    struct MissOracle;

    impl HashOracle for MissOracle {
        fn digest(&self, _: &[u8], _: AlgorithmType) -> Result<[u8; 32], MinerError> {
            std::thread::sleep(Duration::from_micros(50));
            Ok([0xff; 32])
        }

        fn supports(&self, variant: AlgorithmType) -> bool {
            variant == AlgorithmType::Cryptonight
        }
    }

    fn build(login: &str, connections: usize) -> (MiningSession, Vec<MockHandle>) {
        let (transports, handles): (Vec<_>, Vec<_>) = (0..connections).map(|_| mock::pair()).unzip();
        let mut pool = PoolConfig::new("stratum+tcp://pool.test:3333", login);
        pool.name = "test".into();
        let session = MiningSession::new(pool, SessionSettings::default(), Arc::new(MissOracle))
            .with_connector(Arc::new(MockConnector::new(transports)));
        (session, handles)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn serve_job(conn: &mut MockHandle) {
        let login = conn.next_request().await;
        assert_eq!(login["method"], "login");
        conn.send_json(&json!({
            "id": login["id"],
            "result": {
                "id": "tok",
                "status": "OK",
                "job": {"job_id": "j1", "blob": "00".repeat(BLOB_LEN), "target": "ffffff00"},
            },
        }));
    }

    #[tokio::test]
    async fn resize_repartitions_every_worker() {
        let (mut session, mut conns) = build("wallet", 1);
        session.start(4).unwrap();
        serve_job(&mut conns[0]).await;

        let state = session.job_state().unwrap();
        {
            let state = state.clone();
            wait_for(|| state.load().job.is_some()).await;
        }
        let v4 = state.version();
        wait_for(|| session.workers().iter().all(|w| w.observed_version() == v4)).await;

        session.resize(6).unwrap();
        assert_eq!(session.thread_count(), 6);
        let v6 = state.version();
        assert!(v6 > v4);
        assert_eq!(state.load().worker_count, 6);

        wait_for(|| session.workers().iter().all(|w| w.observed_version() == v6)).await;
        let ranges: Vec<_> = session.workers().iter().map(WorkerHandle::range).collect();
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(*range, NonceRange::for_worker(i, 6));
            for other in &ranges[i + 1..] {
                assert!(!range.overlaps(other));
            }
        }

        session.resize(2).unwrap();
        let v2 = state.version();
        wait_for(|| session.workers().iter().all(|w| w.observed_version() == v2)).await;
        assert_eq!(session.workers()[1].range(), NonceRange::for_worker(1, 2));
        assert_eq!(session.telemetry().threads, 2);

        session.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_resets() {
        let (mut session, mut conns) = build("wallet", 1);
        session.stop();

        session.start(2).unwrap();
        assert!(session.is_running());
        assert!(session.start(2).is_err());
        serve_job(&mut conns[0]).await;

        session.change_priority(PriorityLevel::Idle);
        assert!(
            session
                .workers()
                .iter()
                .all(|w| w.priority() == PriorityLevel::Idle)
        );
        // workers are mid-chunk on the served job; the change must not wait for it
        wait_for(|| {
            session
                .workers()
                .iter()
                .all(|w| w.applied_priority() == Some(PriorityLevel::Idle))
        })
        .await;

        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert_eq!(session.thread_count(), 0);

        let telemetry = session.telemetry();
        assert_eq!(telemetry.state, SessionState::Disconnected);
        assert_eq!(telemetry.hashrate, 0.0);
        assert_eq!(telemetry.last_error, None);
        assert!(session.resize(3).is_err());
    }

    #[test]
    fn failed_grow_restores_worker_count() {
        let state = Arc::new(JobState::new(2));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let spawn = |index: usize| {
            Worker::new(
                index,
                Arc::clone(&state),
                Arc::new(MissOracle),
                tx.clone(),
                ScanSettings::default(),
                PriorityLevel::Normal,
            )
            .spawn()
        };
        let mut workers = vec![spawn(0).unwrap(), spawn(1).unwrap()];

        let result = grow_workers(&state, &mut workers, 5, |index| {
            if index == 3 {
                Err(MinerError::TaskError("no more threads".into()))
            } else {
                spawn(index)
            }
        });
        assert!(matches!(result, Err(MinerError::TaskError(_))));
        assert_eq!(workers.len(), 2);
        assert_eq!(state.load().worker_count, 2);

        grow_workers(&state, &mut workers, 3, spawn).unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(state.load().worker_count, 3);
        assert_eq!(workers[2].index(), 2);

        for worker in workers {
            worker.shutdown();
            worker.join().unwrap();
        }
    }

    #[test]
    fn start_validates_pool() {
        let (mut session, _) = build("  ", 0);
        assert!(matches!(session.start(1), Err(MinerError::ConfigError(_))));
        assert!(!session.is_running());

        let mut pool = PoolConfig::new("pool.test:3333", "wallet");
        pool.algorithm = AlgorithmType::CryptonightLight;
        let mut light = MiningSession::new(pool, SessionSettings::default(), Arc::new(MissOracle));
        assert!(matches!(light.start(1), Err(MinerError::AlgorithmError(_))));

        let (mut session, _) = build("wallet", 0);
        assert!(matches!(session.resize(0), Err(MinerError::InputError(_))));
    }
}
