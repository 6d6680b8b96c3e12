//! Ring of per-frame resources gated by a fence.
//!
//! The CPU records frame `n` into one slot while the GPU may still be reading
//! the slots of frames `n-1 .. n-N+1`. A slot is handed back to the CPU only
//! once the fence has reached the value stamped on it at submission, which
//! allows `N-1` frames of overlap and blocks only when the CPU has outrun the
//! GPU by the full ring depth.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{Fence, FenceToken};
use crate::error::{Result, WaveError};

/// Lifecycle of one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never submitted
    Idle,
    /// CPU is writing the slot's buffers
    Recording,
    /// Submitted; the GPU may still read it
    InFlight,
    /// Fence has passed the slot's stamped value
    Retired,
}

#[derive(Debug)]
struct FrameSlot<T> {
    resource: T,
    fence_value: u64,
    recording: bool,
}

/// Fixed-size ring of frame resources.
pub struct FrameResourceRing<T, F: Fence> {
    slots: Vec<FrameSlot<T>>,
    current: usize,
    fence: Arc<F>,
    timeout: Duration,
}

impl<T, F: Fence> FrameResourceRing<T, F> {
    /// Build a ring from one resource per slot.
    ///
    /// The first [`advance`](Self::advance) selects slot 0.
    ///
    /// # Errors
    /// `InvalidRingSize` for fewer than two slots.
    pub fn new(resources: Vec<T>, fence: Arc<F>, timeout: Duration) -> Result<Self> {
        if resources.len() < 2 {
            return Err(WaveError::InvalidRingSize(resources.len()));
        }

        let slots: Vec<_> = resources
            .into_iter()
            .map(|resource| FrameSlot {
                resource,
                fence_value: 0,
                recording: false,
            })
            .collect();
        let current = slots.len() - 1;

        Ok(Self {
            slots,
            current,
            fence,
            timeout,
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least two slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the slot selected by the last `advance`.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Fence gating the ring.
    #[must_use]
    pub fn fence(&self) -> &Arc<F> {
        &self.fence
    }

    /// Fence value stamped on `slot` (0 if never submitted), or `None` past
    /// the end of the ring.
    #[must_use]
    pub fn fence_value(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|entry| entry.fence_value)
    }

    /// Current lifecycle state of `slot`, or `None` past the end of the ring.
    #[must_use]
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|entry| self.state_of(entry))
    }

    fn state_of(&self, entry: &FrameSlot<T>) -> SlotState {
        if entry.recording {
            SlotState::Recording
        } else if entry.fence_value == 0 {
            SlotState::Idle
        } else if self.fence.completed_value() >= entry.fence_value {
            SlotState::Retired
        } else {
            SlotState::InFlight
        }
    }

    fn next_index(&self) -> usize {
        (self.current + 1) % self.slots.len()
    }

    fn slot_ready(&self, slot: usize) -> bool {
        let value = self.slots[slot].fence_value;
        value == 0 || self.fence.completed_value() >= value
    }

    /// Whether the next slot could be taken without blocking.
    #[must_use]
    pub fn is_next_slot_ready(&self) -> bool {
        self.slot_ready(self.next_index())
    }

    /// Move to the next slot, waiting for the GPU to release it if needed.
    ///
    /// This is the only blocking point of the frame loop. The wait is bounded
    /// by the ring's timeout; on expiry the ring stays on the previous slot.
    ///
    /// # Errors
    /// `SlotStillRecording` if the current slot was never submitted,
    /// `FenceTimeout` if the GPU did not release the next slot in time.
    pub fn advance(&mut self) -> Result<&mut T> {
        if self.slots[self.current].recording {
            return Err(WaveError::SlotStillRecording(self.current));
        }

        let next = self.next_index();
        let value = self.slots[next].fence_value;
        if value != 0 && self.fence.completed_value() < value {
            debug!(
                slot = next,
                fence_value = value,
                completed = self.fence.completed_value(),
                "waiting for GPU to release frame slot"
            );
            self.fence.wait(FenceToken::new(value), self.timeout)?;
        }

        self.current = next;
        let slot = &mut self.slots[next];
        slot.recording = true;
        Ok(&mut slot.resource)
    }

    /// Stamp the recording slot with the fence value of its submission.
    ///
    /// # Errors
    /// `SlotNotRecording` if `advance` was not called first.
    pub fn mark_in_flight(&mut self, token: FenceToken) -> Result<()> {
        let state = self.state_of(&self.slots[self.current]);
        let slot = &mut self.slots[self.current];
        if !slot.recording {
            return Err(WaveError::SlotNotRecording {
                slot: self.current,
                state,
            });
        }
        slot.recording = false;
        slot.fence_value = token.value();
        Ok(())
    }

    /// Give up on the recording slot without submitting it.
    ///
    /// The slot keeps the fence value of its last submission and the ring
    /// steps back, so the next [`advance`](Self::advance) selects the same
    /// slot again.
    ///
    /// # Errors
    /// `SlotNotRecording` if no slot is recording.
    pub fn abandon_recording(&mut self) -> Result<()> {
        let state = self.state_of(&self.slots[self.current]);
        let slot = &mut self.slots[self.current];
        if !slot.recording {
            return Err(WaveError::SlotNotRecording {
                slot: self.current,
                state,
            });
        }
        slot.recording = false;
        debug!(slot = self.current, "abandoned frame slot");
        self.current = (self.current + self.slots.len() - 1) % self.slots.len();
        Ok(())
    }

    /// Resource of the current slot.
    #[must_use]
    pub fn current(&self) -> &T {
        &self.slots[self.current].resource
    }

    /// Mutable resource of the current slot.
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current].resource
    }

    /// Wait until every submitted slot has retired.
    ///
    /// Needed before resizing or dropping anything a slot references.
    ///
    /// # Errors
    /// `FenceTimeout` if the GPU does not drain in time.
    pub fn wait_idle(&self) -> Result<()> {
        let newest = self
            .slots
            .iter()
            .map(|slot| slot.fence_value)
            .max()
            .unwrap_or(0);
        if newest == 0 {
            return Ok(());
        }
        self.fence.wait(FenceToken::new(newest), self.timeout)
    }
}
