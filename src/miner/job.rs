// src/miner/job.rs
//! Work units and the shared job cell
//!
//! A [`Job`] is immutable once built. The pool session publishes jobs into a
//! [`JobState`], a versioned snapshot cell that every worker of the session
//! polls. Each publish swaps in a whole new [`JobSnapshot`], so readers see
//! either the old tuple or the new one, never a mix.

use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Length of a block template blob
pub const BLOB_LEN: usize = 76;

/// Byte offset of the 4-byte nonce inside the blob
pub const NONCE_OFFSET: usize = 39;

/// Largest 32-bit nonce
pub const MAX_NONCE: u64 = 0xFFFF_FFFF;

/// A mining job received from the pool
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Pool-assigned job identifier
    pub job_id: String,
    /// Block template; the nonce lives at `[39, 43)`
    pub blob: [u8; BLOB_LEN],
    /// A digest is a solution when its trailing u32 (LE) is below this
    pub target: u32,
    /// Session token issued by the pool at login
    pub login_id: String,
    /// Hash variant to use for this job
    pub variant: AlgorithmType,
}

impl Job {
    /// Builds a job, checking the blob length
    pub fn new(
        job_id: impl Into<String>,
        blob: &[u8],
        target: u32,
        login_id: impl Into<String>,
        variant: AlgorithmType,
    ) -> Result<Self, MinerError> {
        let blob: [u8; BLOB_LEN] = blob.try_into().map_err(|_| {
            MinerError::DecodeError(format!(
                "blob must be {} bytes, got {}",
                BLOB_LEN,
                blob.len()
            ))
        })?;

        Ok(Job {
            job_id: job_id.into(),
            blob,
            target,
            login_id: login_id.into(),
            variant,
        })
    }
}

/// Difficulty for a 32-bit target (`0xFFFFFFFF / target`)
pub fn difficulty(target: u32) -> f64 {
    if target == 0 {
        0.0
    } else {
        MAX_NONCE as f64 / target as f64
    }
}

/// Writes `nonce` little-endian into the blob's nonce field
pub fn write_nonce(blob: &mut [u8; BLOB_LEN], nonce: u32) {
    blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
}

/// Reads the little-endian nonce back out of a blob
pub fn read_nonce(blob: &[u8; BLOB_LEN]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&blob[NONCE_OFFSET..NONCE_OFFSET + 4]);
    u32::from_le_bytes(bytes)
}

/// Whether a digest satisfies the target
///
/// The last four digest bytes are read as a little-endian u32 and must be
/// strictly below `target`.
pub fn meets_target(digest: &[u8; 32], target: u32) -> bool {
    let tail = u32::from_le_bytes([digest[28], digest[29], digest[30], digest[31]]);
    tail < target
}

/// Inclusive nonce interval assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    /// First nonce to try
    pub start: u64,
    /// Last nonce to try (inclusive)
    pub end: u64,
}

impl NonceRange {
    /// Nonces left unassigned at the top of every partition
    pub const MARGIN: u64 = 0x20;

    /// Partition `index` of `count` equal slices of the 32-bit space
    ///
    /// Slice width is `floor(0xFFFFFFFF / count)`; each slice stops
    /// [`NonceRange::MARGIN`] short of the next one.
    pub fn for_worker(index: usize, count: usize) -> Self {
        let count = count.max(1) as u64;
        let index = (index as u64).min(count - 1);
        let width = MAX_NONCE / count;
        let start = index * width;
        let end = ((index + 1) * width)
            .saturating_sub(Self::MARGIN)
            .max(start);
        NonceRange { start, end }
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether `nonce` falls inside the range
    pub fn contains(&self, nonce: u64) -> bool {
        (self.start..=self.end).contains(&nonce)
    }

    /// Whether two ranges share any nonce
    pub fn overlaps(&self, other: &NonceRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}..={:08x}", self.start, self.end)
    }
}

/// A solution found by a worker, waiting to be sent to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Job the solution belongs to
    pub job_id: String,
    /// Nonce bytes exactly as written into the blob
    pub nonce: [u8; 4],
    /// Full digest of the solved blob
    pub result: [u8; 32],
    /// Login token of the session the job came from
    pub login_id: String,
}

/// One immutable version of the session's work
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    /// Bumped on every publish, invalidate or resize
    pub version: u64,
    /// Current job, or `None` when workers must stop hashing
    pub job: Option<Arc<Job>>,
    /// Number of workers partitioning the nonce space
    pub worker_count: usize,
}

/// Versioned single-writer, multi-reader job cell
///
/// Readers call [`JobState::load`] or [`JobState::version`] on the hot path;
/// both are lock-free.
#[derive(Debug)]
pub struct JobState {
    current: ArcSwap<JobSnapshot>,
}

impl JobState {
    /// Creates an empty cell (no job, version 0)
    pub fn new(worker_count: usize) -> Self {
        JobState {
            current: ArcSwap::from_pointee(JobSnapshot {
                version: 0,
                job: None,
                worker_count: worker_count.max(1),
            }),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<JobSnapshot> {
        self.current.load_full()
    }

    /// Current version number
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Installs a new job, returning the new version
    pub fn publish(&self, job: Job) -> u64 {
        let job = Arc::new(job);
        self.update(|snapshot| JobSnapshot {
            version: snapshot.version + 1,
            job: Some(Arc::clone(&job)),
            worker_count: snapshot.worker_count,
        })
    }

    /// Clears the job so every worker stops hashing, returning the new version
    pub fn invalidate(&self) -> u64 {
        self.update(|snapshot| JobSnapshot {
            version: snapshot.version + 1,
            job: None,
            worker_count: snapshot.worker_count,
        })
    }

    /// Republishes the current job for a new worker count
    ///
    /// Partition width depends on the count, so the version bump makes every
    /// worker recompute its range.
    pub fn set_worker_count(&self, worker_count: usize) -> u64 {
        let worker_count = worker_count.max(1);
        self.update(|snapshot| JobSnapshot {
            version: snapshot.version + 1,
            job: snapshot.job.clone(),
            worker_count,
        })
    }

    fn update(&self, f: impl Fn(&JobSnapshot) -> JobSnapshot) -> u64 {
        let previous = self.current.rcu(|snapshot| f(snapshot));
        previous.version + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn job(id: &str) -> Job {
        Job::new(id, &[7u8; BLOB_LEN], 1000, "login", AlgorithmType::Cryptonight).unwrap()
    }

    #[test]
    fn ranges_partition_without_overlap() {
        for count in [1usize, 2, 3, 4, 6, 7, 8, 16, 31, 64] {
            let ranges: Vec<_> = (0..count)
                .map(|i| NonceRange::for_worker(i, count))
                .collect();

            assert_eq!(ranges[0].start, 0);
            for pair in ranges.windows(2) {
                assert!(!pair[0].overlaps(&pair[1]), "count {}", count);
                // gap between neighbours is exactly the margin
                assert_eq!(pair[1].start - pair[0].end, NonceRange::MARGIN);
            }
            let last = ranges[count - 1];
            assert!(last.end <= MAX_NONCE);
            // only margins and the rounding remainder are left uncovered
            let covered: u64 = ranges.iter().map(NonceRange::len).sum();
            let remainder = MAX_NONCE % count as u64;
            assert_eq!(
                covered + (NonceRange::MARGIN - 1) * count as u64 + remainder,
                MAX_NONCE
            );
        }
    }

    #[test]
    fn single_worker_range() {
        let range = NonceRange::for_worker(0, 1);
        assert_eq!(range.start, 0);
        assert_eq!(range.end, MAX_NONCE - NonceRange::MARGIN);
        assert!(range.contains(0));
        assert!(!range.contains(MAX_NONCE));
    }

    #[test]
    fn nonce_field_round_trip() {
        let mut blob = [0u8; BLOB_LEN];
        for nonce in [0u32, 1, 0xdeadbeef, u32::MAX] {
            write_nonce(&mut blob, nonce);
            assert_eq!(read_nonce(&blob), nonce);
        }
        write_nonce(&mut blob, 0x04030201);
        assert_eq!(&blob[39..43], &[1, 2, 3, 4]);
        assert_eq!(blob[38], 0);
        assert_eq!(blob[43], 0);
    }

    #[test]
    fn target_comparison_is_strict() {
        let mut digest = [0xffu8; 32];
        digest[28..].copy_from_slice(&hex!("e8030000")); // 1000 LE
        assert!(!meets_target(&digest, 1000));
        assert!(meets_target(&digest, 1001));
        assert!(!meets_target(&digest, 999));
    }

    #[test]
    fn blob_length_is_enforced() {
        let err = Job::new("j", &[0u8; 75], 1, "l", AlgorithmType::Cryptonight).unwrap_err();
        assert!(matches!(err, MinerError::DecodeError(_)));
    }

    #[test]
    fn state_versions_are_monotonic() {
        let state = JobState::new(4);
        assert_eq!(state.version(), 0);
        assert!(state.load().job.is_none());

        assert_eq!(state.publish(job("a")), 1);
        assert_eq!(state.load().job.as_ref().unwrap().job_id, "a");

        assert_eq!(state.set_worker_count(6), 2);
        let snapshot = state.load();
        assert_eq!(snapshot.worker_count, 6);
        assert_eq!(snapshot.job.as_ref().unwrap().job_id, "a");

        assert_eq!(state.invalidate(), 3);
        let snapshot = state.load();
        assert!(snapshot.job.is_none());
        assert_eq!(snapshot.worker_count, 6);
    }

    #[test]
    fn readers_never_see_torn_snapshots() {
        let state = Arc::new(JobState::new(1));
        let writer = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for i in 0..2000u32 {
                    let mut blob = [0u8; BLOB_LEN];
                    write_nonce(&mut blob, i);
                    let job = Job::new(i.to_string(), &blob, i + 1, "l", AlgorithmType::Cryptonight)
                        .unwrap();
                    state.publish(job);
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let snapshot = state.load();
            assert!(snapshot.version >= last);
            last = snapshot.version;
            if let Some(job) = &snapshot.job {
                let n = read_nonce(&job.blob);
                assert_eq!(job.job_id, n.to_string());
                assert_eq!(job.target, n + 1);
            }
        }
        writer.join().unwrap();
        assert_eq!(state.version(), 2000);
    }
}
