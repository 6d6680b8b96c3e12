//! Command recording with checked state transitions.

use super::context::{GpuContext, ResourceId};
use crate::barrier::ResourceState;
use crate::error::Result;

/// A wgpu command encoder paired with the context's state ledger.
///
/// Passes declare every transition through [`CommandStream::transition`]
/// before encoding the work that depends on it; a transition whose `before`
/// state disagrees with the ledger fails at record time.
pub struct CommandStream<'a> {
    ctx: &'a GpuContext,
    encoder: wgpu::CommandEncoder,
    label: &'static str,
    transitions: usize,
}

impl<'a> CommandStream<'a> {
    pub(crate) fn new(ctx: &'a GpuContext, label: &'static str) -> Self {
        let encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self {
            ctx,
            encoder,
            label,
            transitions: 0,
        }
    }

    /// Context the stream records for.
    #[must_use]
    pub fn context(&self) -> &'a GpuContext {
        self.ctx
    }

    /// Declare a state change of `id`.
    ///
    /// # Errors
    /// `StateMismatch` when `before` is not the tracked state.
    pub fn transition(
        &mut self,
        id: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.ctx.transition(id, before, after)?;
        self.transitions += 1;
        Ok(())
    }

    /// Check that `id` is in `expected` before encoding work on it.
    ///
    /// # Errors
    /// `StateMismatch` or `UnknownResource`.
    pub fn require(&self, id: ResourceId, expected: ResourceState) -> Result<()> {
        self.ctx.require(id, expected)
    }

    /// Underlying encoder.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        &mut self.encoder
    }

    /// Transitions declared so far.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.transitions
    }

    pub(crate) fn finish(self) -> (&'static str, usize, wgpu::CommandBuffer) {
        (self.label, self.transitions, self.encoder.finish())
    }
}
