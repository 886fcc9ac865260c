// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Value of the guard while no fault has been seen. Thread ids are never 0.
const IDLE: u64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FaultGuardError {
    /// The thread that is writing the report faulted again.
    #[error("Recursive fault while handling a crash")]
    Recursive,
    /// Another thread faulted while a report is being written.
    #[error("Concurrent fault while thread {0} is handling a crash")]
    Concurrent(u64),
}

/// One-shot guard ensuring at most one crash report per process.
///
/// Unlike a scoped guard, it is never released: once a thread has started handling a fault the
/// process is going down, and releasing would let a chained handler that returns and re-faults
/// produce a second report.
pub struct FaultGuard;

impl FaultGuard {
    /// Claims `owner` for thread `tid`.
    ///
    /// This uses a CAS to try and "take" the owner from idle to `tid`, so exactly one thread wins
    /// even if several fault at the same instant. The loser learns whether it is the winner
    /// faulting again, or another thread.
    pub fn acquire(owner: &AtomicU64, tid: u64) -> Result<(), FaultGuardError> {
        match owner.compare_exchange(IDLE, tid, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => Ok(()),
            Err(current) if current == tid => Err(FaultGuardError::Recursive),
            Err(current) => Err(FaultGuardError::Concurrent(current)),
        }
    }

    pub fn is_held(owner: &AtomicU64) -> bool {
        owner.load(Ordering::SeqCst) != IDLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_acquire_wins() {
        let owner = AtomicU64::new(IDLE);
        assert!(!FaultGuard::is_held(&owner));
        assert_eq!(FaultGuard::acquire(&owner, 7), Ok(()));
        assert!(FaultGuard::is_held(&owner));
    }

    #[test]
    fn test_same_thread_is_recursive() {
        let owner = AtomicU64::new(IDLE);
        FaultGuard::acquire(&owner, 7).unwrap();
        assert_eq!(
            FaultGuard::acquire(&owner, 7),
            Err(FaultGuardError::Recursive)
        );
    }

    #[test]
    fn test_other_thread_is_concurrent() {
        let owner = AtomicU64::new(IDLE);
        FaultGuard::acquire(&owner, 7).unwrap();
        assert_eq!(
            FaultGuard::acquire(&owner, 8),
            Err(FaultGuardError::Concurrent(7))
        );
        // Still owned by the first thread
        assert_eq!(owner.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_only_one_racing_thread_wins() {
        let owner = Arc::new(AtomicU64::new(IDLE));
        let handles: Vec<_> = (1..=16u64)
            .map(|tid| {
                let owner = Arc::clone(&owner);
                std::thread::spawn(move || FaultGuard::acquire(&owner, tid).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
