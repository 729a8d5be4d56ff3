// src/stats/reporter.rs
use crate::config::duration_secs;
use crate::network::pool::{SessionState, SessionStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Instantaneous hashrate of one worker (hashes per second)
///
/// Written by exactly one thread; stored as raw `f64` bits so a single
/// atomic store publishes the value.
#[derive(Debug, Default)]
pub struct HashrateSample(AtomicU64);

impl HashrateSample {
    /// Creates a zero sample
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current rate
    pub fn publish(&self, rate: f64) {
        self.0.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Reads the current rate
    pub fn read(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Reads the current rate and resets it to zero
    pub fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0f64.to_bits(), Ordering::Relaxed))
    }
}

/// Share counters for one pool session
///
/// Only the pool session writes; everyone else reads.
#[derive(Debug, Default)]
pub struct WorkReport {
    submitted: AtomicU64,
    accepted: AtomicU64,
    difficulty: AtomicU64,
}

impl WorkReport {
    /// Creates zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a submit reply of any kind
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an accepted share
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the pool difficulty of the current job
    pub fn set_difficulty(&self, difficulty: f64) {
        self.difficulty.store(difficulty.to_bits(), Ordering::Relaxed);
    }

    /// Shares answered by the pool
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Shares accepted by the pool
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Current pool difficulty
    pub fn difficulty(&self) -> f64 {
        f64::from_bits(self.difficulty.load(Ordering::Relaxed))
    }

    /// Accepted share percentage (0 when nothing was submitted)
    pub fn acceptance(&self) -> f64 {
        let submitted = self.submitted();
        if submitted == 0 {
            0.0
        } else {
            self.accepted() as f64 * 100.0 / submitted as f64
        }
    }

    /// Clears every counter (session restart)
    pub fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.difficulty.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

/// Statistics related to hardware performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used by the host (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Host probe used by the periodic log line
struct HostMonitor {
    system: System,
    components: Components,
}

impl HostMonitor {
    fn new() -> Self {
        HostMonitor {
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
        }
    }

    fn sample(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }
}

/// Reporting cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Aggregation period
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// How often a summary line is logged
    #[serde(with = "duration_secs")]
    pub log_interval: Duration,
    /// Number of aggregation passes kept for average/max
    pub history: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            interval: Duration::from_secs(1),
            log_interval: Duration::from_secs(60),
            history: 60,
        }
    }
}

/// Snapshot of one pool's state for display
#[derive(Debug, Clone, PartialEq)]
pub struct PoolTelemetry {
    /// Pool display name
    pub name: String,
    /// Protocol state of the pool session
    pub state: SessionState,
    /// Aggregate hashrate of the last pass
    pub hashrate: f64,
    /// Mean over the retained history
    pub average: f64,
    /// Maximum over the retained history
    pub max: f64,
    /// Shares accepted
    pub accepted: u64,
    /// Shares answered
    pub submitted: u64,
    /// Accepted percentage
    pub acceptance: f64,
    /// Current pool difficulty
    pub difficulty: f64,
    /// Last error, `None` once cleared
    pub last_error: Option<String>,
    /// Live worker count
    pub threads: usize,
}

/// Aggregates per-worker samples into per-pool telemetry
pub struct StatsReporter {
    name: String,
    settings: ReportSettings,
    samples: arc_swap::ArcSwap<Vec<Arc<HashrateSample>>>,
    total: Arc<HashrateSample>,
    history: Mutex<VecDeque<f64>>,
    work: Arc<WorkReport>,
    status: Arc<SessionStatus>,
}

impl StatsReporter {
    /// Creates a reporter over the session's shared counters
    ///
    /// # Arguments
    /// * `name` - Pool display name
    /// * `settings` - Reporting cadence
    /// * `work` - Share counters written by the pool session
    /// * `status` - Session state and last error
    /// * `total` - Aggregate hashrate cell, also read by idle recovery
    pub fn new(
        name: impl Into<String>,
        settings: ReportSettings,
        work: Arc<WorkReport>,
        status: Arc<SessionStatus>,
        total: Arc<HashrateSample>,
    ) -> Self {
        StatsReporter {
            name: name.into(),
            settings,
            samples: arc_swap::ArcSwap::from_pointee(Vec::new()),
            total,
            history: Mutex::new(VecDeque::new()),
            work,
            status,
        }
    }

    /// Replaces the set of worker samples (after start or resize)
    pub fn set_samples(&self, samples: Vec<Arc<HashrateSample>>) {
        self.samples.store(Arc::new(samples));
    }

    /// One aggregation pass
    ///
    /// Sums every worker sample and zeroes it, so a worker that stops
    /// publishing reads as idle on the next pass. Returns the total.
    pub fn aggregate(&self) -> f64 {
        let total: f64 = self.samples.load().iter().map(|s| s.take()).sum();
        self.total.publish(total);

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(total);
        while history.len() > self.settings.history.max(1) {
            history.pop_front();
        }
        total
    }

    /// Forgets the rolling history and the aggregate rate
    pub fn clear(&self) {
        self.total.publish(0.0);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Current telemetry snapshot
    pub fn telemetry(&self) -> PoolTelemetry {
        let (average, max) = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.is_empty() {
                (0.0, 0.0)
            } else {
                let sum: f64 = history.iter().sum();
                let max = history.iter().copied().fold(0.0, f64::max);
                (sum / history.len() as f64, max)
            }
        };

        PoolTelemetry {
            name: self.name.clone(),
            state: self.status.state(),
            hashrate: self.total.read(),
            average,
            max,
            accepted: self.work.accepted(),
            submitted: self.work.submitted(),
            acceptance: self.work.acceptance(),
            difficulty: self.work.difficulty(),
            last_error: self.status.last_error(),
            threads: self.samples.load().len(),
        }
    }

    /// Starts the periodic aggregation thread
    ///
    /// Aggregates every `interval` and logs a summary with host CPU,
    /// memory and temperature every `log_interval`.
    pub fn start_reporting(self: &Arc<Self>) -> std::io::Result<ReporterHandle> {
        let (shutdown, rx) = crossbeam_channel::bounded(1);
        let reporter = Arc::clone(self);

        let thread = std::thread::Builder::new()
            .name(format!("cn-stats-{}", self.name))
            .spawn(move || reporter.report_loop(rx))?;

        Ok(ReporterHandle {
            shutdown,
            thread: Some(thread),
        })
    }

    fn report_loop(&self, shutdown: Receiver<()>) {
        let mut host = HostMonitor::new();
        let mut last_log = Instant::now();

        loop {
            match shutdown.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            self.aggregate();

            if last_log.elapsed() >= self.settings.log_interval {
                last_log = Instant::now();
                let t = self.telemetry();
                let hw = host.sample();
                log::info!(
                    "[{}] Hashrate: {} (avg {}, max {}) | Shares: {}/{} ({:.1}%) | Diff: {:.0} | CPU: {:.1}% | Mem: {} MB | Temp: {:.1}°C",
                    t.name,
                    format_hashrate(t.hashrate),
                    format_hashrate(t.average),
                    format_hashrate(t.max),
                    t.accepted,
                    t.submitted,
                    t.acceptance,
                    t.difficulty,
                    hw.cpu_usage,
                    hw.memory_used / (1024 * 1024),
                    hw.temperature
                );
            }
        }
    }
}

/// Stops the aggregation thread when asked or dropped
pub struct ReporterHandle {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Signals the thread and waits for it
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Stats reporter thread panicked");
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Renders a hashrate with a unit prefix and two decimals
pub fn format_hashrate(rate: f64) -> String {
    const UNITS: [&str; 4] = ["H/s", "kH/s", "MH/s", "GH/s"];
    let mut rate = rate.max(0.0);
    let mut unit = 0;
    while rate >= 1000.0 && unit < UNITS.len() - 1 {
        rate /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", rate, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(history: usize) -> StatsReporter {
        StatsReporter::new(
            "test",
            ReportSettings {
                history,
                ..Default::default()
            },
            Arc::new(WorkReport::new()),
            Arc::new(SessionStatus::new()),
            Arc::new(HashrateSample::new()),
        )
    }

    #[test]
    fn aggregation_sums_and_zeroes_samples() {
        let reporter = reporter(60);
        let samples: Vec<_> = (0..3).map(|_| Arc::new(HashrateSample::new())).collect();
        reporter.set_samples(samples.clone());

        samples[0].publish(10.0);
        samples[1].publish(20.5);
        assert_eq!(reporter.aggregate(), 30.5);
        assert!(samples.iter().all(|s| s.read() == 0.0));

        // silent workers read as zero on the next pass
        assert_eq!(reporter.aggregate(), 0.0);

        let t = reporter.telemetry();
        assert_eq!(t.hashrate, 0.0);
        assert_eq!(t.max, 30.5);
        assert_eq!(t.average, 15.25);
        assert_eq!(t.threads, 3);
    }

    #[test]
    fn history_is_bounded() {
        let reporter = reporter(2);
        let sample = Arc::new(HashrateSample::new());
        reporter.set_samples(vec![sample.clone()]);
        for rate in [100.0, 1.0, 2.0] {
            sample.publish(rate);
            reporter.aggregate();
        }
        let t = reporter.telemetry();
        assert_eq!(t.max, 2.0);
        assert_eq!(t.average, 1.5);
    }

    #[test]
    fn work_report_acceptance() {
        let work = WorkReport::new();
        assert_eq!(work.acceptance(), 0.0);
        for _ in 0..4 {
            work.record_submitted();
        }
        for _ in 0..3 {
            work.record_accepted();
        }
        assert_eq!(work.acceptance(), 75.0);
        work.reset();
        assert_eq!(work.submitted(), 0);
        assert_eq!(work.accepted(), 0);
    }

    #[test]
    fn hashrate_formatting() {
        assert_eq!(format_hashrate(0.0), "0.00 H/s");
        assert_eq!(format_hashrate(999.0), "999.00 H/s");
        assert_eq!(format_hashrate(1500.0), "1.50 kH/s");
        assert_eq!(format_hashrate(2_346_000.0), "2.35 MH/s");
        assert_eq!(format_hashrate(7e12), "7000.00 GH/s");
    }
}
