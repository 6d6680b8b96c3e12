//! Three-way role rotation over a fixed set of physical resources, and the
//! state choreography of the GPU wave passes expressed over roles.

use crate::barrier::ResourceState;

/// Logical role a height buffer plays in the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Heights one step back
    Prev,
    /// Heights of the current step (the displayed field)
    Curr,
    /// Destination of the next step
    Next,
}

impl Role {
    /// All roles in slot order.
    pub const ALL: [Role; 3] = [Role::Prev, Role::Curr, Role::Next];

    const fn offset(self) -> usize {
        match self {
            Self::Prev => 0,
            Self::Curr => 1,
            Self::Next => 2,
        }
    }
}

/// Maps roles onto indices of a 3-element resource array.
///
/// Rotation (`prev ← curr ← next ← prev`) is a single modular increment of
/// the base index; no resource is copied or renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleRing {
    base: usize,
}

impl RoleRing {
    /// Ring with `prev = 0`, `curr = 1`, `next = 2`.
    #[must_use]
    pub const fn new() -> Self {
        Self { base: 0 }
    }

    /// Physical index currently playing `role`.
    #[must_use]
    pub const fn index(self, role: Role) -> usize {
        (self.base + role.offset()) % 3
    }

    /// Advance one step: the old `curr` becomes `prev`, the old `next`
    /// becomes `curr`, the old `prev` is recycled as `next`.
    pub fn rotate(&mut self) {
        self.base = (self.base + 1) % 3;
    }

    /// Physical indices in `[prev, curr, next]` order.
    #[must_use]
    pub const fn indices(self) -> [usize; 3] {
        [
            self.index(Role::Prev),
            self.index(Role::Curr),
            self.index(Role::Next),
        ]
    }
}

/// One step of a GPU wave pass, addressed by role rather than resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveOp {
    /// Declared state change of the map currently playing `role`
    Transition {
        /// Role whose physical map changes state
        role: Role,
        /// State it leaves
        before: ResourceState,
        /// State it enters
        after: ResourceState,
    },
    /// Disturb kernel, read-modify-write on `curr`
    DispatchDisturb,
    /// Update kernel, reads `prev` and `curr`, writes `next`
    DispatchUpdate,
    /// Relabel roles for the next recording
    Rotate,
}

/// State of each role between passes, in `[prev, curr, next]` order.
///
/// Only `next` is writable, so no two roles are ever writable together.
pub const RESTING_STATES: [ResourceState; 3] = [
    ResourceState::ShaderRead,
    ResourceState::ShaderRead,
    ResourceState::UnorderedAccess,
];

/// Disturb: make `curr` writable for one dispatch, then readable again.
pub const DISTURB_OPS: &[WaveOp] = &[
    WaveOp::Transition {
        role: Role::Curr,
        before: ResourceState::ShaderRead,
        after: ResourceState::UnorderedAccess,
    },
    WaveOp::DispatchDisturb,
    WaveOp::Transition {
        role: Role::Curr,
        before: ResourceState::UnorderedAccess,
        after: ResourceState::ShaderRead,
    },
];

/// Update: write `next`, hand it over as the readable `curr`, recycle `prev`
/// as the writable `next`, then rotate.
pub const UPDATE_OPS: &[WaveOp] = &[
    WaveOp::DispatchUpdate,
    WaveOp::Transition {
        role: Role::Next,
        before: ResourceState::UnorderedAccess,
        after: ResourceState::ShaderRead,
    },
    WaveOp::Transition {
        role: Role::Prev,
        before: ResourceState::ShaderRead,
        after: ResourceState::UnorderedAccess,
    },
    WaveOp::Rotate,
];

/// States each dispatch expects, in `[prev, curr, next]` order.
#[must_use]
pub const fn dispatch_states(op: WaveOp) -> Option<[Option<ResourceState>; 3]> {
    match op {
        WaveOp::DispatchDisturb => Some([None, Some(ResourceState::UnorderedAccess), None]),
        WaveOp::DispatchUpdate => Some([
            Some(ResourceState::ShaderRead),
            Some(ResourceState::ShaderRead),
            Some(ResourceState::UnorderedAccess),
        ]),
        WaveOp::Transition { .. } | WaveOp::Rotate => None,
    }
}
