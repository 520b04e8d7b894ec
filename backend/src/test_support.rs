//! In-memory port implementations for tests.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration suites in `tests/`. Each double honours the same atomicity
//! contract as its database adapter and exposes switches for injecting
//! failures.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod accounts;
mod clock;
mod queue;
mod storage;
mod uploads;

pub use accounts::InMemoryAccounts;
pub use clock::MutableClock;
pub use queue::{InMemoryPinQueue, QueueSnapshot};
pub use storage::InMemoryContentStore;
pub use uploads::InMemoryUploadRepository;

/// Lock a mutex, recovering the data if another test thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counter of pending injected failures.
#[derive(Debug, Default)]
struct FailureBudget(Mutex<u32>);

impl FailureBudget {
    fn set(&self, count: u32) {
        *lock(&self.0) = count;
    }

    /// Consume one failure, returning whether the call should fail.
    fn take(&self) -> bool {
        let mut remaining = lock(&self.0);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}
