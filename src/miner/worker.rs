// src/miner/worker.rs
//! Worker thread implementation
//!
//! Each worker owns one OS thread. It polls the session's [`JobState`],
//! recomputes its nonce slice whenever the version changes, and scans in
//! chunks sized from its measured hashrate so a replaced job is never
//! hashed for long. Found solutions go to the pool session over a channel.

use crate::config::duration_secs;
use crate::miner::algorithm::HashOracle;
use crate::miner::job::{
    BLOB_LEN, Job, JobState, NonceRange, Submission, meets_target, write_nonce,
};
use crate::miner::priority;
use crate::stats::HashrateSample;
use crate::types::PriorityLevel;
use crate::utils::error::MinerError;
use crossbeam_channel::Sender;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Sleep between polls while there is nothing to hash
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Back-off after the hash backend fails
const ERROR_WAIT: Duration = Duration::from_secs(1);

/// Scan loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Target wall time of one chunk; bounds how long a stale job is hashed
    #[serde(with = "duration_secs")]
    pub scan_time: Duration,
    /// Start each job at a random point of the worker's slice
    pub randomize: bool,
    /// Chunk size used before any hashrate has been measured
    pub fallback_batch: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            scan_time: Duration::from_secs(60),
            randomize: false,
            fallback_batch: 64,
        }
    }
}

impl ScanSettings {
    /// Number of nonces to scan before re-checking the job
    pub fn batch_size(&self, rate: f64) -> u64 {
        if rate > 0.0 {
            ((rate * self.scan_time.as_secs_f64()) as u64).max(1)
        } else {
            self.fallback_batch.max(1)
        }
    }

    /// Nonces kept free at the top of the slice when picking a random start
    fn reserve(&self, rate: f64) -> u64 {
        let secs = self.scan_time.as_secs_f64();
        if rate > 0.0 {
            (rate * secs) as u64
        } else {
            (self.fallback_batch as f64 * secs) as u64
        }
    }
}

/// State shared between a worker thread and its handle
#[derive(Debug)]
pub struct WorkerControl {
    stop: AtomicBool,
    priority: AtomicU8,
    applied: AtomicU8,
    hashrate: Arc<HashrateSample>,
    range_start: AtomicU64,
    range_end: AtomicU64,
    version: AtomicU64,
}

impl WorkerControl {
    fn new(priority: PriorityLevel) -> Self {
        WorkerControl {
            stop: AtomicBool::new(false),
            priority: AtomicU8::new(priority.as_u8()),
            applied: AtomicU8::new(u8::MAX),
            hashrate: Arc::new(HashrateSample::new()),
            range_start: AtomicU64::new(0),
            range_end: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn requested_priority(&self) -> PriorityLevel {
        PriorityLevel::from_u8(self.priority.load(Ordering::Relaxed))
    }
}

/// Worker thread that performs mining computations
///
/// Each worker scans its own slice of the nonce space for whatever job the
/// session's [`JobState`] currently holds and reports any valid solutions.
pub struct Worker {
    /// Position of this worker in the session's pool
    index: usize,
    /// Job cell written by the pool session
    job_state: Arc<JobState>,
    /// The hash function to drive
    oracle: Arc<dyn HashOracle>,
    /// Channel for sending solutions to the pool session
    submissions: Sender<Submission>,
    scan: ScanSettings,
    control: Arc<WorkerControl>,
}

impl Worker {
    /// Creates a new Worker instance
    ///
    /// # Arguments
    /// * `index` - Position used to pick the nonce slice
    /// * `job_state` - The session's job cell
    /// * `oracle` - Hash backend
    /// * `submissions` - Channel for found solutions
    /// * `scan` - Chunk sizing settings
    /// * `priority` - Initial OS scheduling priority
    pub fn new(
        index: usize,
        job_state: Arc<JobState>,
        oracle: Arc<dyn HashOracle>,
        submissions: Sender<Submission>,
        scan: ScanSettings,
        priority: PriorityLevel,
    ) -> Self {
        Worker {
            index,
            job_state,
            oracle,
            submissions,
            scan,
            control: Arc::new(WorkerControl::new(priority)),
        }
    }

    /// Starts the worker on its own named thread
    pub fn spawn(self) -> Result<WorkerHandle, MinerError> {
        let index = self.index;
        let control = Arc::clone(&self.control);
        let thread = std::thread::Builder::new()
            .name(format!("cn-worker-{}", index))
            .spawn(move || self.run())?;

        Ok(WorkerHandle {
            index,
            control,
            thread: Some(thread),
        })
    }

    /// Runs the scan loop until asked to stop
    pub fn run(self) {
        let mut rng = rand::thread_rng();
        let mut applied: Option<PriorityLevel> = None;
        let mut seen_version: Option<u64> = None;
        let mut current: Option<Arc<Job>> = None;
        let mut blob = [0u8; BLOB_LEN];
        let mut range = NonceRange::for_worker(self.index, 1);
        let mut nonce: u64 = 0;
        let mut rate: f64 = 0.0;

        while !self.control.stopped() {
            let level = self.control.requested_priority();
            if applied != Some(level) {
                if let Err(e) = priority::apply_to_current_thread(level) {
                    log::warn!("Worker {}: {}", self.index, e);
                }
                applied = Some(level);
                self.control
                    .applied
                    .store(level.as_u8(), Ordering::Release);
            }

            let snapshot = self.job_state.load();
            if seen_version != Some(snapshot.version) {
                seen_version = Some(snapshot.version);
                range = NonceRange::for_worker(self.index, snapshot.worker_count);
                self.control
                    .range_start
                    .store(range.start, Ordering::Relaxed);
                self.control.range_end.store(range.end, Ordering::Relaxed);
                self.control
                    .version
                    .store(snapshot.version, Ordering::Release);

                current = snapshot.job.clone();
                if let Some(job) = &current {
                    blob = job.blob;
                    nonce = range.start;
                    if self.scan.randomize {
                        nonce += random_offset(&range, self.scan.reserve(rate), &mut rng);
                    }
                    log::debug!(
                        "Worker {}: job {} range {} from {:08x}",
                        self.index,
                        job.job_id,
                        range,
                        nonce
                    );
                }
            }

            let Some(job) = current.clone() else {
                self.control.hashrate.publish(0.0);
                std::thread::sleep(IDLE_WAIT);
                continue;
            };

            let Some(chunk) = next_chunk(nonce, &range, self.scan.batch_size(rate)) else {
                self.control.hashrate.publish(0.0);
                std::thread::sleep(IDLE_WAIT);
                continue;
            };

            let sample_every = if rate > 0.0 {
                ((rate / 2.0) as u64).max(1)
            } else {
                u64::MAX
            };
            let started = Instant::now();
            let mut done: u64 = 0;
            let mut failed = false;

            for candidate in chunk {
                write_nonce(&mut blob, candidate as u32);
                let digest = match self.oracle.digest(&blob, job.variant) {
                    Ok(digest) => digest,
                    Err(e) => {
                        log::error!("Worker {}: hashing failed: {}", self.index, e);
                        failed = true;
                        break;
                    }
                };
                nonce = candidate + 1;
                done += 1;

                if meets_target(&digest, job.target) {
                    self.submit(&job, candidate as u32, digest);
                    break;
                }

                if done % sample_every == 0 {
                    self.control
                        .hashrate
                        .publish(done as f64 / started.elapsed().as_secs_f64());
                }

                if self.job_state.version() != snapshot.version
                    || self.control.stopped()
                    || Some(self.control.requested_priority()) != applied
                {
                    break;
                }
            }

            if failed {
                rate = 0.0;
                self.control.hashrate.publish(0.0);
                std::thread::sleep(ERROR_WAIT);
                continue;
            }

            let elapsed = started.elapsed().as_secs_f64();
            if done > 0 && elapsed > 0.0 {
                rate = done as f64 / elapsed;
                self.control.hashrate.publish(rate);
            }
        }

        self.control.hashrate.publish(0.0);
        log::debug!("Worker {} stopped", self.index);
    }

    fn submit(&self, job: &Job, nonce: u32, result: [u8; 32]) {
        log::debug!(
            "Worker {}: solution for job {} at nonce {:08x}",
            self.index,
            job.job_id,
            nonce
        );
        let submission = Submission {
            job_id: job.job_id.clone(),
            nonce: nonce.to_le_bytes(),
            result,
            login_id: job.login_id.clone(),
        };
        if let Err(e) = self.submissions.send(submission) {
            log::warn!("Worker {}: {}", self.index, MinerError::from(e));
        }
    }
}

/// Random start offset inside `range`, keeping `reserve` nonces above it
///
/// The result is always a valid index into the range, so the cursor never
/// starts past `range.end`.
fn random_offset(range: &NonceRange, reserve: u64, rng: &mut impl Rng) -> u64 {
    let len = range.len();
    if len > reserve {
        rng.gen_range(0..len - reserve)
    } else {
        0
    }
}

/// Next run of nonces to scan, or `None` once the slice is exhausted
fn next_chunk(nonce: u64, range: &NonceRange, batch: u64) -> Option<RangeInclusive<u64>> {
    if nonce > range.end {
        return None;
    }
    let last = nonce.saturating_add(batch.max(1) - 1).min(range.end);
    Some(nonce..=last)
}

/// Owner's side of a running worker
pub struct WorkerHandle {
    index: usize,
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Position of the worker in its session
    pub fn index(&self) -> usize {
        self.index
    }

    /// Asks the worker to exit at its next check
    pub fn shutdown(&self) {
        self.control.stop.store(true, Ordering::Release);
    }

    /// Waits for the worker thread to exit
    pub fn join(mut self) -> Result<(), MinerError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| MinerError::TaskError(format!("worker {} panicked", self.index))),
            None => Ok(()),
        }
    }

    /// Requests a new scheduling priority; applied before the next hash
    pub fn set_priority(&self, level: PriorityLevel) {
        self.control
            .priority
            .store(level.as_u8(), Ordering::Relaxed);
    }

    /// Priority the worker has been asked to run at
    pub fn priority(&self) -> PriorityLevel {
        self.control.requested_priority()
    }

    /// Priority last applied by the worker thread, `None` before its first
    pub fn applied_priority(&self) -> Option<PriorityLevel> {
        match self.control.applied.load(Ordering::Acquire) {
            u8::MAX => None,
            level => Some(PriorityLevel::from_u8(level)),
        }
    }

    /// Nonce slice computed for the last observed job version
    pub fn range(&self) -> NonceRange {
        NonceRange {
            start: self.control.range_start.load(Ordering::Relaxed),
            end: self.control.range_end.load(Ordering::Relaxed),
        }
    }

    /// Last job version the worker has acted on
    pub fn observed_version(&self) -> u64 {
        self.control.version.load(Ordering::Acquire)
    }

    /// The worker's hashrate sample
    pub fn hashrate_sample(&self) -> Arc<HashrateSample> {
        Arc::clone(&self.control.hashrate)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::miner::job::read_nonce;
    use crate::types::AlgorithmType;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Digest whose trailing u32 is the candidate nonce, so the solution
    /// nonce is fully determined by the target.
    #[derive(Default)]
    pub(crate) struct NonceEchoOracle {
        calls: AtomicUsize,
        blobs: Mutex<Vec<[u8; BLOB_LEN]>>,
        replace_at: Mutex<Option<(usize, Arc<JobState>, Job)>>,
    }

    impl NonceEchoOracle {
        fn replacing_at(call: usize, state: Arc<JobState>, job: Job) -> Self {
            NonceEchoOracle {
                replace_at: Mutex::new(Some((call, state, job))),
                ..Default::default()
            }
        }
    }

    impl HashOracle for NonceEchoOracle {
        fn digest(&self, blob: &[u8], _: AlgorithmType) -> Result<[u8; 32], MinerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut blobs = self.blobs.lock().unwrap();
            if blobs.len() < 64 {
                blobs.push(blob.try_into().unwrap());
            }
            drop(blobs);

            let mut replace = self.replace_at.lock().unwrap();
            if replace.as_ref().is_some_and(|(at, _, _)| *at == call) {
                let (_, state, job) = replace.take().unwrap();
                state.publish(job);
            }

            let mut digest = [0xffu8; 32];
            digest[28..].copy_from_slice(&blob[39..43]);
            Ok(digest)
        }

        fn supports(&self, _: AlgorithmType) -> bool {
            true
        }
    }

    fn job(id: &str, fill: u8, target: u32) -> Job {
        Job::new(id, &[fill; BLOB_LEN], target, "login", AlgorithmType::Cryptonight).unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn solution_is_submitted_with_job_details() {
        let state = Arc::new(JobState::new(1));
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = Worker::new(
            0,
            state.clone(),
            Arc::new(NonceEchoOracle::default()),
            tx,
            ScanSettings::default(),
            PriorityLevel::Normal,
        )
        .spawn()
        .unwrap();

        state.publish(job("job-1", 3, 1));
        let submission = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(submission.job_id, "job-1");
        assert_eq!(submission.login_id, "login");
        assert_eq!(submission.nonce, [0, 0, 0, 0]);
        assert_eq!(&submission.result[28..], &[0, 0, 0, 0]);

        handle.shutdown();
        handle.join().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn replaced_job_is_picked_up_mid_chunk() {
        let state = Arc::new(JobState::new(1));
        let oracle = Arc::new(NonceEchoOracle::replacing_at(
            10,
            state.clone(),
            job("new", 2, 0),
        ));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let scan = ScanSettings {
            fallback_batch: 1 << 40,
            ..Default::default()
        };
        let handle = Worker::new(0, state.clone(), oracle.clone(), tx, scan, PriorityLevel::Normal)
            .spawn()
            .unwrap();

        state.publish(job("old", 1, 0));
        wait_until(|| oracle.calls.load(Ordering::SeqCst) >= 12);
        handle.shutdown();
        handle.join().unwrap();

        let blobs = oracle.blobs.lock().unwrap();
        let body = |b: &[u8; BLOB_LEN]| (b[0], b[75]);
        assert!(blobs[..10].iter().all(|b| body(b) == (1, 1)));
        // first hash after the replacement already uses the new template
        assert_eq!(body(&blobs[10]), (2, 2));
        assert_eq!(&blobs[10][39..43], &[0, 0, 0, 0]);
    }

    #[test]
    fn invalidation_zeroes_hashrate() {
        let state = Arc::new(JobState::new(1));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let scan = ScanSettings {
            scan_time: Duration::from_millis(20),
            ..Default::default()
        };
        let handle = Worker::new(
            0,
            state.clone(),
            Arc::new(NonceEchoOracle::default()),
            tx,
            scan,
            PriorityLevel::Normal,
        )
        .spawn()
        .unwrap();
        let sample = handle.hashrate_sample();

        state.publish(job("j", 1, 0));
        wait_until(|| sample.read() > 0.0);

        let version = state.invalidate();
        wait_until(|| handle.observed_version() == version && sample.read() == 0.0);

        handle.shutdown();
        handle.join().unwrap();
        assert_eq!(sample.read(), 0.0);
    }

    #[test]
    fn chunks_stop_at_range_end() {
        let range = NonceRange { start: 10, end: 20 };
        assert_eq!(next_chunk(10, &range, 4), Some(10..=13));
        assert_eq!(next_chunk(18, &range, 64), Some(18..=20));
        assert_eq!(next_chunk(21, &range, 64), None);
        assert_eq!(next_chunk(20, &range, 0), Some(20..=20));
    }

    #[test]
    fn random_offset_stays_inside_range() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let range = NonceRange { start: 100, end: 103 };

        // rate * scan_time below one nonce leaves no reserve
        let scan = ScanSettings {
            scan_time: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(scan.reserve(10.0), 0);
        for _ in 0..2000 {
            assert!(range.contains(range.start + random_offset(&range, 0, &mut rng)));
        }
        for _ in 0..200 {
            assert!(random_offset(&range, 2, &mut rng) <= 1);
        }
        assert_eq!(random_offset(&range, 4, &mut rng), 0);
        assert_eq!(random_offset(&range, 100, &mut rng), 0);
    }

    #[test]
    fn randomized_start_hashes_inside_the_slice() {
        let state = Arc::new(JobState::new(4));
        let oracle = Arc::new(NonceEchoOracle::default());
        let (tx, _rx) = crossbeam_channel::unbounded();
        let scan = ScanSettings {
            randomize: true,
            scan_time: Duration::from_millis(1),
            ..Default::default()
        };
        let handle = Worker::new(2, state.clone(), oracle.clone(), tx, scan, PriorityLevel::Normal)
            .spawn()
            .unwrap();

        state.publish(job("j", 1, 0));
        wait_until(|| oracle.calls.load(Ordering::SeqCst) >= 8);
        handle.shutdown();
        handle.join().unwrap();

        let range = NonceRange::for_worker(2, 4);
        for blob in oracle.blobs.lock().unwrap().iter() {
            assert!(range.contains(read_nonce(blob) as u64));
        }
    }

    #[test]
    fn priority_change_applies_mid_chunk() {
        let state = Arc::new(JobState::new(1));
        let oracle = Arc::new(NonceEchoOracle::default());
        let (tx, _rx) = crossbeam_channel::unbounded();
        let scan = ScanSettings {
            fallback_batch: 1 << 40,
            ..Default::default()
        };
        let handle = Worker::new(0, state.clone(), oracle.clone(), tx, scan, PriorityLevel::Normal)
            .spawn()
            .unwrap();
        wait_until(|| handle.applied_priority() == Some(PriorityLevel::Normal));

        state.publish(job("j", 1, 0));
        wait_until(|| oracle.calls.load(Ordering::SeqCst) >= 4);

        // the chunk spans the whole slice, so only the per-hash check can see this
        handle.set_priority(PriorityLevel::Low);
        wait_until(|| handle.applied_priority() == Some(PriorityLevel::Low));
        assert_eq!(handle.priority(), PriorityLevel::Low);

        handle.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn batch_size_follows_rate() {
        let scan = ScanSettings::default();
        assert_eq!(scan.batch_size(0.0), 64);
        assert_eq!(scan.batch_size(100.0), 6000);
        assert_eq!(scan.reserve(0.0), 64 * 60);
    }
}
