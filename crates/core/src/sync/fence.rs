//! Fence values and the fence abstraction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, WaveError};

/// Fence value returned by a submission.
///
/// Anything that reads GPU-written memory takes one of these, so the
/// dependency on the producing submission is explicit in the signature.
#[must_use = "a fence token is the only way to know when the submission retired"]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceToken(u64);

impl FenceToken {
    /// Wrap a raw fence value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw fence value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic progress counter shared between a producer and a consumer.
pub trait Fence: Send + Sync {
    /// Enqueue a signal for the next value and return it.
    ///
    /// The value is reached once all work submitted before this call retires.
    fn signal(&self) -> FenceToken;

    /// Highest value the consumer has finished.
    fn completed_value(&self) -> u64;

    /// Block until `token` is reached or `timeout` expires.
    ///
    /// # Errors
    /// `FenceTimeout` when the budget runs out first.
    fn wait(&self, token: FenceToken, timeout: Duration) -> Result<()>;

    /// Non-blocking completion check.
    fn is_complete(&self, token: FenceToken) -> bool {
        self.completed_value() >= token.value()
    }
}

/// Fence advanced explicitly by the caller.
///
/// Stands in for the GPU timeline in tests and in loops with no device: the
/// "GPU" side calls [`CpuFence::complete`] when it is done with a value.
#[derive(Debug, Default)]
pub struct CpuFence {
    issued: AtomicU64,
    completed: Mutex<u64>,
    retired: Condvar,
}

impl CpuFence {
    /// Fence with no issued or completed values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every value up to `token` as complete.
    ///
    /// Completing an older value than the current one is ignored; the
    /// counter never regresses.
    pub fn complete(&self, token: FenceToken) {
        let mut completed = match self.completed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.value() > *completed {
            *completed = token.value();
            self.retired.notify_all();
        }
    }

    /// Complete everything signalled so far.
    pub fn complete_all(&self) {
        self.complete(FenceToken::new(self.issued.load(Ordering::Acquire)));
    }

    /// Last value handed out by [`Fence::signal`].
    #[must_use]
    pub fn issued_value(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }
}

impl Fence for CpuFence {
    fn signal(&self) -> FenceToken {
        FenceToken::new(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn completed_value(&self) -> u64 {
        match self.completed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn wait(&self, token: FenceToken, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut completed = self
            .completed
            .lock()
            .map_err(|_| WaveError::LockPoisoned("cpu fence"))?;

        while *completed < token.value() {
            let now = Instant::now();
            if now >= deadline {
                return Err(WaveError::FenceTimeout {
                    value: token.value(),
                    completed: *completed,
                    timeout,
                });
            }
            let (guard, _) = self
                .retired
                .wait_timeout(completed, deadline - now)
                .map_err(|_| WaveError::LockPoisoned("cpu fence"))?;
            completed = guard;
        }
        Ok(())
    }
}
