// src/miner/priority.rs
//! Per-thread OS scheduling priority
//!
//! Hashing threads call [`apply_to_current_thread`] when they start and
//! whenever the session asks for a new level. Raising priority above
//! normal usually needs privileges; failures are reported, never fatal.

use crate::types::PriorityLevel;
use crate::utils::error::MinerError;

/// Applies `level` to the calling thread
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn apply_to_current_thread(level: PriorityLevel) -> Result<(), MinerError> {
    // On Linux nice values are per thread, addressed by the kernel tid
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, level.nice()) };

    if rc == 0 {
        log::debug!("Thread {} priority set to {} (nice {})", tid, level, level.nice());
        Ok(())
    } else {
        Err(MinerError::TaskError(format!(
            "Failed to set priority {}: {}",
            level,
            std::io::Error::last_os_error()
        )))
    }
}

/// Applies `level` to the calling thread
#[cfg(not(target_os = "linux"))]
pub fn apply_to_current_thread(level: PriorityLevel) -> Result<(), MinerError> {
    log::debug!("Thread priority {} not supported on this platform", level);
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn lowering_priority_succeeds_unprivileged() {
        std::thread::spawn(|| apply_to_current_thread(PriorityLevel::Idle))
            .join()
            .unwrap()
            .unwrap();
    }
}
