//! GPU context and initialization
//!
//! One [`GpuContext`] is created per process and handed to every component
//! constructor. It owns the device and queue, the fence every submission
//! signals, and the resource-state ledger that command streams validate
//! against. Dropping the last handle waits for the queue to drain.
//!
//! Initialization distinguishes "no GPU found" (expected on headless
//! machines) from "GPU found but failed to initialize" (worth a warning).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::fence::GpuFence;
use super::stream::CommandStream;
use crate::barrier::{ResourceState, StateTracker};
use crate::error::{Result, WaveError};
use crate::sync::{Fence, FenceToken};

/// Handle naming one GPU resource in the state ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    index: u32,
    label: &'static str,
}

impl ResourceId {
    /// Label given at registration.
    #[must_use]
    pub fn label(self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.index)
    }
}

/// Result of a GPU initialization attempt
#[derive(Debug)]
pub enum GpuInitResult {
    /// GPU initialized successfully
    Success(GpuContext),
    /// No GPU adapter found
    NoGpuFound,
    /// GPU found but device creation failed
    InitFailed {
        /// Name of the adapter that failed
        adapter_name: String,
        /// Error message
        error: String,
    },
}

/// Device, queue, fence and state ledger shared by all GPU components.
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    fence: Arc<GpuFence>,
    states: Mutex<StateTracker<ResourceId>>,
    next_resource: AtomicU32,
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("fence", &self.fence.completed_value())
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Initialize a GPU context on the high-performance adapter.
    ///
    /// # Returns
    ///
    /// - `GpuInitResult::Success` - GPU ready to use
    /// - `GpuInitResult::NoGpuFound` - No compatible GPU adapter
    /// - `GpuInitResult::InitFailed` - GPU found but initialization failed
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> GpuInitResult {
        info!("Attempting to initialize GPU context");

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = if let Some(a) =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })) {
            debug!("Found GPU adapter: {}", a.get_info().name);
            a
        } else {
            debug!("No GPU adapter found");
            return GpuInitResult::NoGpuFound;
        };

        let adapter_info = adapter.get_info();
        let adapter_name = adapter_info.name.clone();

        match pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Wave Simulation Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )) {
            Ok((device, queue)) => {
                info!(
                    "GPU context initialized: {} ({:?})",
                    adapter_name, adapter_info.backend
                );
                let device = Arc::new(device);
                let queue = Arc::new(queue);
                let fence = Arc::new(GpuFence::new(Arc::clone(&device), Arc::clone(&queue)));
                GpuInitResult::Success(Self {
                    device,
                    queue,
                    adapter_info,
                    fence,
                    states: Mutex::new(StateTracker::new()),
                    next_resource: AtomicU32::new(0),
                })
            }
            Err(e) => {
                debug!("Failed to create GPU device: {}", e);
                GpuInitResult::InitFailed {
                    adapter_name,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Get reference to wgpu device
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to wgpu queue
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adapter information
    #[must_use]
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Adapter name for logging
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Fence signalled after every submission
    #[must_use]
    pub fn fence(&self) -> &Arc<GpuFence> {
        &self.fence
    }

    fn ledger(&self) -> Result<std::sync::MutexGuard<'_, StateTracker<ResourceId>>> {
        self.states
            .lock()
            .map_err(|_| WaveError::LockPoisoned("resource ledger"))
    }

    /// Start tracking a new resource in `initial` state.
    ///
    /// # Errors
    /// `LockPoisoned` if another thread panicked while holding the ledger.
    pub fn register_resource(
        &self,
        label: &'static str,
        initial: ResourceState,
    ) -> Result<ResourceId> {
        let id = ResourceId {
            index: self.next_resource.fetch_add(1, Ordering::Relaxed),
            label,
        };
        self.ledger()?.register(id, initial)?;
        debug!(resource = ?id, ?initial, "registered GPU resource");
        Ok(id)
    }

    /// Stop tracking a resource. Unknown ids are ignored.
    pub fn unregister_resource(&self, id: ResourceId) {
        if let Ok(mut ledger) = self.states.lock() {
            ledger.unregister(id);
        }
    }

    /// Current tracked state of `id`.
    #[must_use]
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.states.lock().ok()?.state(id)
    }

    /// Record a state change, checking `before` against the ledger.
    ///
    /// # Errors
    /// `StateMismatch`, `UnknownResource` or `LockPoisoned`.
    pub fn transition(
        &self,
        id: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.ledger()?.transition(id, before, after)
    }

    /// Check that `id` is in `expected` state.
    ///
    /// # Errors
    /// `StateMismatch`, `UnknownResource` or `LockPoisoned`.
    pub fn require(&self, id: ResourceId, expected: ResourceState) -> Result<()> {
        self.ledger()?.require(id, expected)
    }

    /// Total transitions recorded through this context.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.states
            .lock()
            .map_or(0, |ledger| ledger.transition_count())
    }

    /// Open a command stream.
    #[must_use]
    pub fn begin_commands(&self, label: &'static str) -> CommandStream<'_> {
        CommandStream::new(self, label)
    }

    /// Submit a recorded stream and signal the fence behind it.
    pub fn submit(&self, stream: CommandStream<'_>) -> FenceToken {
        let (label, transitions, commands) = stream.finish();
        self.queue.submit(Some(commands));
        let token = self.fence.signal();
        debug!(
            stream = label,
            transitions,
            fence = token.value(),
            "submitted command stream"
        );
        token
    }

    /// Signal the fence for everything submitted so far and wait for it.
    ///
    /// # Errors
    /// `FenceTimeout` if the queue does not drain within `timeout`.
    pub fn flush(&self, timeout: std::time::Duration) -> Result<()> {
        let token = self.fence.signal();
        self.fence.wait(token, timeout)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        debug!("Draining GPU queue before teardown");
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// Blocking wrapper for creating a shared GPU context
///
/// # Errors
/// `NoAdapter` when no GPU is present, `DeviceCreation` when the adapter
/// refuses a device.
pub fn create_gpu_context_blocking() -> Result<Arc<GpuContext>> {
    match GpuContext::new() {
        GpuInitResult::Success(ctx) => Ok(Arc::new(ctx)),
        GpuInitResult::NoGpuFound => Err(WaveError::NoAdapter),
        GpuInitResult::InitFailed {
            adapter_name,
            error,
        } => Err(WaveError::DeviceCreation {
            adapter: adapter_name,
            message: error,
        }),
    }
}
