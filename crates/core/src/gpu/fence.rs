//! Fence backed by the wgpu queue.
//!
//! wgpu has no fence object; completion is reported through
//! `Queue::on_submitted_work_done`, whose callbacks run inside
//! `Device::poll`. Each signal registers a callback that completes its value
//! on an inner [`CpuFence`], and waits alternate short condvar sleeps with
//! non-blocking device polls until the value is reached or the budget runs
//! out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, WaveError};
use crate::sync::{CpuFence, Fence, FenceToken};

/// Longest single sleep between device polls.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Monotonic fence advanced by queue completion callbacks.
pub struct GpuFence {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    timeline: Arc<CpuFence>,
}

impl GpuFence {
    /// Fence on `queue`; `device` is polled while waiting.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            timeline: Arc::new(CpuFence::new()),
        }
    }

    /// Last value handed out by `signal`.
    #[must_use]
    pub fn issued_value(&self) -> u64 {
        self.timeline.issued_value()
    }
}

impl Fence for GpuFence {
    fn signal(&self) -> FenceToken {
        let token = self.timeline.signal();
        let timeline = Arc::clone(&self.timeline);
        self.queue
            .on_submitted_work_done(move || timeline.complete(token));
        token
    }

    fn completed_value(&self) -> u64 {
        self.timeline.completed_value()
    }

    fn wait(&self, token: FenceToken, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            // Callbacks fire from inside poll; no lock is held across it
            self.device.poll(wgpu::Maintain::Poll);
            if self.timeline.is_complete(token) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaveError::FenceTimeout {
                    value: token.value(),
                    completed: self.completed_value(),
                    timeout,
                });
            }
            match self
                .timeline
                .wait(token, POLL_INTERVAL.min(deadline - now))
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_timeout() => {}
                Err(err) => return Err(err),
            }
        }
    }
}
