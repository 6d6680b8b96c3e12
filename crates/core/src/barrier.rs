//! Resource-state ledger
//!
//! wgpu inserts hardware barriers on its own, but the compute passes in this
//! crate are written against an explicit state model: every resource has one
//! usage state at a time, and each pass declares the transitions it needs
//! around the dispatches and copies that touch a resource. The ledger checks
//! every declared transition against the tracked state, so a missing or
//! reordered transition is reported at record time instead of silently
//! producing a hazard.

use std::fmt::Debug;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::error::{Result, WaveError};

/// Usage state of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Freshly created or parked between uses
    Common,
    /// Source of a copy
    CopySource,
    /// Destination of a copy or upload
    CopyDest,
    /// Readable from shaders (sampled / generic read)
    ShaderRead,
    /// Bound for unordered (storage) writes
    UnorderedAccess,
    /// Colour attachment of a render pass
    RenderTarget,
}

impl ResourceState {
    /// Whether a shader or copy may write the resource in this state.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::CopyDest | Self::UnorderedAccess | Self::RenderTarget
        )
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<K> {
    /// Resource key
    pub resource: K,
    /// State the resource leaves
    pub before: ResourceState,
    /// State the resource enters
    pub after: ResourceState,
}

impl<K> Transition<K> {
    /// Build a transition record.
    pub const fn new(resource: K, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource,
            before,
            after,
        }
    }
}

/// Tracks the current state of every registered resource.
#[derive(Debug)]
pub struct StateTracker<K> {
    states: FxHashMap<K, ResourceState>,
    transition_count: u64,
}

impl<K> Default for StateTracker<K> {
    fn default() -> Self {
        Self {
            states: FxHashMap::default(),
            transition_count: 0,
        }
    }
}

impl<K> StateTracker<K>
where
    K: Copy + Eq + Hash + Debug,
{
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `resource` in `initial` state.
    ///
    /// # Errors
    /// `DuplicateResource` if the key is already tracked.
    pub fn register(&mut self, resource: K, initial: ResourceState) -> Result<()> {
        if self.states.contains_key(&resource) {
            return Err(WaveError::DuplicateResource(format!("{resource:?}")));
        }
        self.states.insert(resource, initial);
        Ok(())
    }

    /// Stop tracking `resource`, returning its last state.
    pub fn unregister(&mut self, resource: K) -> Option<ResourceState> {
        self.states.remove(&resource)
    }

    /// Current state of `resource`, if tracked.
    #[must_use]
    pub fn state(&self, resource: K) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    /// Apply a transition after checking its `before` state.
    ///
    /// # Errors
    /// `UnknownResource` for untracked keys, `StateMismatch` when the ledger
    /// disagrees with `before`.
    pub fn transition(
        &mut self,
        resource: K,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        let current = self
            .states
            .get_mut(&resource)
            .ok_or_else(|| WaveError::UnknownResource(format!("{resource:?}")))?;

        if *current != before {
            return Err(WaveError::StateMismatch {
                resource: format!("{resource:?}"),
                expected: before,
                actual: *current,
            });
        }

        *current = after;
        self.transition_count += 1;
        Ok(())
    }

    /// Apply a recorded transition.
    ///
    /// # Errors
    /// Same as [`StateTracker::transition`].
    pub fn apply(&mut self, transition: Transition<K>) -> Result<()> {
        self.transition(transition.resource, transition.before, transition.after)
    }

    /// Check that `resource` is currently in `expected` without changing it.
    ///
    /// # Errors
    /// `UnknownResource` or `StateMismatch`.
    pub fn require(&self, resource: K, expected: ResourceState) -> Result<()> {
        let actual = self
            .state(resource)
            .ok_or_else(|| WaveError::UnknownResource(format!("{resource:?}")))?;
        if actual == expected {
            Ok(())
        } else {
            Err(WaveError::StateMismatch {
                resource: format!("{resource:?}"),
                expected,
                actual,
            })
        }
    }

    /// Number of transitions applied since creation.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Number of tracked resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
