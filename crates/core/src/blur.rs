//! Separable Gaussian blur: kernel weights and pass choreography
//!
//! The GPU filter in `gpu::ComputeBlurFilter` walks the schedule built here,
//! so the order of copies, dispatches and state transitions is defined once
//! and can be checked without a device.

use crate::barrier::{ResourceState, Transition};
use crate::error::{Result, WaveError};

/// Largest radius the blur shader's constant layout can hold.
pub const MAX_BLUR_RADIUS: usize = 5;

/// Gaussian weights for `sigma`, normalised to sum to one.
///
/// The radius is `ceil(2·sigma)`; the returned vector has `2·radius + 1`
/// entries, index `radius` being the centre tap.
///
/// # Errors
/// `InvalidParameter` for a non-positive sigma, `BlurRadiusTooLarge` when the
/// radius exceeds [`MAX_BLUR_RADIUS`].
pub fn gauss_weights(sigma: f32) -> Result<Vec<f32>> {
    if sigma <= 0.0 || !sigma.is_finite() {
        return Err(WaveError::invalid_parameter(
            "sigma",
            format!("must be positive, got {sigma}"),
        ));
    }

    let radius = (2.0 * sigma).ceil() as usize;
    if radius > MAX_BLUR_RADIUS {
        return Err(WaveError::BlurRadiusTooLarge {
            radius,
            max: MAX_BLUR_RADIUS,
        });
    }

    let two_sigma_sq = 2.0 * sigma * sigma;
    let r = radius as i32;
    let mut weights: Vec<f32> = (-r..=r)
        .map(|i| {
            let x = i as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    Ok(weights)
}

/// Resources touched by one blur execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlurResource {
    /// Caller's colour texture, blurred in place
    Input,
    /// Ping-pong map 0; holds the result after every full iteration
    MapA,
    /// Ping-pong map 1
    MapB,
}

/// One step of a blur execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurOp {
    /// Declared state change
    Transition(Transition<BlurResource>),
    /// Copy the input texture into map A
    CopyInputToA,
    /// Horizontal pass, reads A, writes B
    Horizontal,
    /// Vertical pass, reads B, writes A
    Vertical,
    /// Copy map A back into the input texture
    CopyAToInput,
}

fn transition(resource: BlurResource, before: ResourceState, after: ResourceState) -> BlurOp {
    BlurOp::Transition(Transition::new(resource, before, after))
}

/// Full op list for `blur_count` iterations.
///
/// The ping-pong maps rest in `Common` between executions; the input starts
/// in `input_state` and is returned to it at the end.
#[must_use]
pub fn blur_schedule(blur_count: u32, input_state: ResourceState) -> Vec<BlurOp> {
    use BlurResource::{Input, MapA, MapB};
    use ResourceState::{Common, CopyDest, CopySource, ShaderRead, UnorderedAccess};

    let mut ops = vec![
        transition(Input, input_state, CopySource),
        transition(MapA, Common, CopyDest),
        BlurOp::CopyInputToA,
        transition(MapA, CopyDest, ShaderRead),
        transition(MapB, Common, UnorderedAccess),
    ];

    for _ in 0..blur_count {
        ops.push(BlurOp::Horizontal);
        ops.push(transition(MapA, ShaderRead, UnorderedAccess));
        ops.push(transition(MapB, UnorderedAccess, ShaderRead));
        ops.push(BlurOp::Vertical);
        ops.push(transition(MapA, UnorderedAccess, ShaderRead));
        ops.push(transition(MapB, ShaderRead, UnorderedAccess));
    }

    ops.extend([
        transition(MapA, ShaderRead, CopySource),
        transition(Input, CopySource, CopyDest),
        BlurOp::CopyAToInput,
        transition(Input, CopyDest, input_state),
        transition(MapA, CopySource, Common),
        transition(MapB, UnorderedAccess, Common),
    ]);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::StateTracker;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_normalised_and_symmetric() {
        for sigma in [0.3_f32, 0.5, 1.0, 1.7, 2.0, 2.5] {
            let weights = gauss_weights(sigma).unwrap();
            let radius = (2.0 * sigma).ceil() as usize;
            assert_eq!(weights.len(), 2 * radius + 1);

            let sum: f32 = weights.iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-5);

            for i in 0..=radius {
                assert_eq!(weights[radius - i], weights[radius + i]);
            }
            // Centre tap dominates
            assert!(weights.iter().all(|&w| w <= weights[radius]));
        }
    }

    #[test]
    fn test_default_sigma_uses_full_kernel() {
        let weights = gauss_weights(2.5).unwrap();
        assert_eq!(weights.len(), 2 * MAX_BLUR_RADIUS + 1);
    }

    #[test]
    fn test_weights_reject_wide_or_invalid_sigma() {
        assert!(matches!(
            gauss_weights(2.6),
            Err(WaveError::BlurRadiusTooLarge { radius: 6, .. })
        ));
        assert!(gauss_weights(0.0).is_err());
        assert!(gauss_weights(f32::NAN).is_err());
    }

    /// Replay a schedule, checking each dispatch and copy sees the states it
    /// needs. Returns the tracker at the end.
    fn replay(ops: &[BlurOp], input_state: ResourceState) -> StateTracker<BlurResource> {
        use BlurResource::{Input, MapA, MapB};
        use ResourceState::{CopyDest, CopySource, ShaderRead, UnorderedAccess};

        let mut tracker = StateTracker::new();
        tracker.register(Input, input_state).unwrap();
        tracker.register(MapA, ResourceState::Common).unwrap();
        tracker.register(MapB, ResourceState::Common).unwrap();

        for op in ops {
            match *op {
                BlurOp::Transition(t) => tracker.apply(t).unwrap(),
                BlurOp::CopyInputToA => {
                    tracker.require(Input, CopySource).unwrap();
                    tracker.require(MapA, CopyDest).unwrap();
                }
                BlurOp::Horizontal => {
                    tracker.require(MapA, ShaderRead).unwrap();
                    tracker.require(MapB, UnorderedAccess).unwrap();
                }
                BlurOp::Vertical => {
                    tracker.require(MapB, ShaderRead).unwrap();
                    tracker.require(MapA, UnorderedAccess).unwrap();
                }
                BlurOp::CopyAToInput => {
                    tracker.require(MapA, CopySource).unwrap();
                    tracker.require(Input, CopyDest).unwrap();
                }
            }
        }
        tracker
    }

    #[test]
    fn test_schedule_is_consistent_and_restores_states() {
        for count in 0..5 {
            let ops = blur_schedule(count, ResourceState::RenderTarget);
            let tracker = replay(&ops, ResourceState::RenderTarget);

            assert_eq!(
                tracker.state(BlurResource::Input),
                Some(ResourceState::RenderTarget)
            );
            assert_eq!(
                tracker.state(BlurResource::MapA),
                Some(ResourceState::Common)
            );
            assert_eq!(
                tracker.state(BlurResource::MapB),
                Some(ResourceState::Common)
            );
        }
    }

    #[test]
    fn test_schedule_pass_counts() {
        let ops = blur_schedule(3, ResourceState::RenderTarget);
        let horizontal = ops.iter().filter(|op| **op == BlurOp::Horizontal).count();
        let vertical = ops.iter().filter(|op| **op == BlurOp::Vertical).count();
        assert_eq!(horizontal, 3);
        assert_eq!(vertical, 3);

        // The final write before copy-out always lands in map A
        let last_pass = ops
            .iter()
            .rev()
            .find(|op| matches!(op, BlurOp::Horizontal | BlurOp::Vertical));
        assert_eq!(last_pass, Some(&BlurOp::Vertical));
    }

    #[test]
    fn test_schedule_with_other_input_state() {
        let ops = blur_schedule(1, ResourceState::ShaderRead);
        let tracker = replay(&ops, ResourceState::ShaderRead);
        assert_eq!(
            tracker.state(BlurResource::Input),
            Some(ResourceState::ShaderRead)
        );
    }
}
