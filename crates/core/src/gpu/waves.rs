//! GPU-resident wave simulation
//!
//! Three R32Float height maps play the roles `prev`, `curr` and `next`.
//! The update kernel reads `prev` and `curr` and writes `next`; afterwards
//! the roles rotate through a [`RoleRing`] so no texel is ever copied. The
//! current `curr` map is the displacement texture handed to renderers.
//!
//! Every pass is driven by the op lists in [`crate::waves`]
//! (`DISTURB_OPS`, `UPDATE_OPS`), so the state choreography validated by
//! the ledger here is the same one the unit tests replay without a device.

use std::sync::Arc;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, ResourceId};
use super::stream::CommandStream;
use crate::barrier::ResourceState;
use crate::config::{WaveConfig, WAVE_THREAD_GROUP};
use crate::error::{Result, WaveError};
use crate::sync::Fence;
use crate::timer::GameTimer;
use crate::waves::{
    RandomDisturber, Role, RoleRing, WaveCoefficients, WaveOp, DISTURB_OPS,
    RANDOM_DISTURB_MARGIN, RESTING_STATES, UPDATE_OPS,
};

/// Uniform block shared by the update and disturb kernels.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct WaveConstants {
    k: [f32; 3],
    magnitude: f32,
    /// (column, row)
    disturb_index: [u32; 2],
    _pad: [u32; 2],
}

struct HeightMap {
    texture: wgpu::Texture,
    read_view: wgpu::TextureView,
    write_view: wgpu::TextureView,
    id: ResourceId,
}

/// Wave simulator whose state never leaves the GPU.
pub struct GpuWaveSimulator {
    context: Arc<GpuContext>,
    rows: u32,
    cols: u32,
    spatial_step: f32,
    time_step: f32,
    coefficients: WaveCoefficients,

    maps: [HeightMap; 3],
    roles: RoleRing,
    accumulator: f32,

    /// Coefficients; referenced by every update bind group
    _constants_buffer: wgpu::Buffer,
    update_pipeline: wgpu::ComputePipeline,
    /// Indexed by the physical map currently playing `prev`
    update_bind_groups: Vec<wgpu::BindGroup>,
    disturb_pipeline: wgpu::ComputePipeline,
    disturb_bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuWaveSimulator {
    /// Create a simulator with flat (zero) height maps.
    ///
    /// The zero upload and the initial state transitions are queued on the
    /// context's queue; no wait is needed before the first `update`.
    ///
    /// # Errors
    /// `GridNotDivisible` unless both extents are multiples of 16,
    /// `InvalidGridSize` / `InvalidParameter` for bad physical parameters.
    pub fn new(context: Arc<GpuContext>, config: &WaveConfig) -> Result<Self> {
        config.validate_gpu()?;
        let coefficients = WaveCoefficients::new(
            config.damping,
            config.time_step,
            config.speed,
            config.spatial_step,
        )?;
        let (rows, cols) = (config.rows, config.cols);

        let device = context.device();

        let maps = [
            Self::create_height_map(&context, rows, cols, "Wave Height Map 0")?,
            Self::create_height_map(&context, rows, cols, "Wave Height Map 1")?,
            Self::create_height_map(&context, rows, cols, "Wave Height Map 2")?,
        ];
        let roles = RoleRing::new();
        for (role, state) in Role::ALL.into_iter().zip(RESTING_STATES) {
            let id = maps[roles.index(role)].id;
            context.transition(id, ResourceState::CopyDest, state)?;
        }

        let constants = WaveConstants {
            k: [coefficients.k0, coefficients.k1, coefficients.k2],
            magnitude: 0.0,
            disturb_index: [0, 0],
            _pad: [0, 0],
        };
        let constants_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Wave Constants"),
            contents: bytemuck::bytes_of(&constants),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let update_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Wave Update Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/wave_update.wgsl").into()),
        });
        let disturb_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Wave Disturb Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/wave_disturb.wgsl").into()),
        });

        let uniform_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let height_read_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let height_storage_entry = |binding, access| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access,
                format: wgpu::TextureFormat::R32Float,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        };

        // Binding order: constants, prev, curr, next
        let update_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Wave Update Bind Group Layout"),
                entries: &[
                    uniform_entry,
                    height_read_entry(1),
                    height_read_entry(2),
                    height_storage_entry(3, wgpu::StorageTextureAccess::WriteOnly),
                ],
            });
        let disturb_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Wave Disturb Bind Group Layout"),
                entries: &[
                    uniform_entry,
                    height_storage_entry(1, wgpu::StorageTextureAccess::ReadWrite),
                ],
            });

        let update_pipeline = Self::create_pipeline(
            device,
            "Wave Update Pipeline",
            &update_bind_group_layout,
            &update_shader,
        );
        let disturb_pipeline = Self::create_pipeline(
            device,
            "Wave Disturb Pipeline",
            &disturb_bind_group_layout,
            &disturb_shader,
        );

        // One bind group per rotation; the ring's `prev` index selects it
        let mut rotation = RoleRing::new();
        let mut update_bind_groups: Vec<Option<wgpu::BindGroup>> = vec![None, None, None];
        for _ in 0..3 {
            let [prev, curr, next] = rotation.indices();
            update_bind_groups[prev] = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Wave Update Bind Group"),
                layout: &update_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: constants_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&maps[prev].read_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&maps[curr].read_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&maps[next].write_view),
                    },
                ],
            }));
            rotation.rotate();
        }
        let update_bind_groups = update_bind_groups.into_iter().flatten().collect();

        info!(rows, cols, ?coefficients, "created GPU wave simulator");

        Ok(Self {
            rows,
            cols,
            spatial_step: config.spatial_step,
            time_step: config.time_step,
            coefficients,
            maps,
            roles,
            accumulator: 0.0,
            _constants_buffer: constants_buffer,
            update_pipeline,
            update_bind_groups,
            disturb_pipeline,
            disturb_bind_group_layout,
            context,
        })
    }

    fn create_height_map(
        context: &GpuContext,
        rows: u32,
        cols: u32,
        label: &'static str,
    ) -> Result<HeightMap> {
        let size = wgpu::Extent3d {
            width: cols,
            height: rows,
            depth_or_array_layers: 1,
        };
        let texture = context.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let read_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Wave Height Read View"),
            ..Default::default()
        });
        let write_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Wave Height Write View"),
            ..Default::default()
        });

        let id = context.register_resource(label, ResourceState::Common)?;
        context.transition(id, ResourceState::Common, ResourceState::CopyDest)?;

        // Staged through the queue's upload path
        let zeros = vec![0_u8; (rows * cols * 4) as usize];
        context.queue().write_texture(
            texture.as_image_copy(),
            &zeros,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(cols * 4),
                rows_per_image: Some(rows),
            },
            size,
        );

        Ok(HeightMap {
            texture,
            read_view,
            write_view,
            id,
        })
    }

    fn create_pipeline(
        device: &wgpu::Device,
        label: &'static str,
        layout: &wgpu::BindGroupLayout,
        module: &wgpu::ShaderModule,
    ) -> wgpu::ComputePipeline {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    }

    /// Inclusive range of rows accepted by [`disturb`](Self::disturb).
    #[must_use]
    pub fn disturb_row_range(&self) -> (usize, usize) {
        let margin = RANDOM_DISTURB_MARGIN;
        (margin, self.rows as usize - 1 - margin)
    }

    /// Inclusive range of columns accepted by [`disturb`](Self::disturb).
    #[must_use]
    pub fn disturb_col_range(&self) -> (usize, usize) {
        let margin = RANDOM_DISTURB_MARGIN;
        (margin, self.cols as usize - 1 - margin)
    }

    /// Record a disturbance of cell `(row, col)` on `curr`.
    ///
    /// # Errors
    /// `DisturbOutOfBounds` outside `[4, rows-5] × [4, cols-5]`,
    /// `StateMismatch` if the maps are not in their resting states.
    pub fn disturb(
        &mut self,
        stream: &mut CommandStream<'_>,
        row: usize,
        col: usize,
        magnitude: f32,
    ) -> Result<()> {
        let row_range = self.disturb_row_range();
        let col_range = self.disturb_col_range();
        if row < row_range.0 || row > row_range.1 || col < col_range.0 || col > col_range.1 {
            return Err(WaveError::DisturbOutOfBounds {
                row,
                col,
                row_range,
                col_range,
            });
        }

        let device = self.context.device();
        let constants = WaveConstants {
            k: [self.coefficients.k0, self.coefficients.k1, self.coefficients.k2],
            magnitude,
            disturb_index: [col as u32, row as u32],
            _pad: [0, 0],
        };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Wave Disturb Constants"),
            contents: bytemuck::bytes_of(&constants),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let curr = &self.maps[self.roles.index(Role::Curr)];
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Wave Disturb Bind Group"),
            layout: &self.disturb_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&curr.write_view),
                },
            ],
        });

        debug!(row, col, magnitude, "recording wave disturb");
        self.run_ops(stream, DISTURB_OPS, Some(&bind_group))
    }

    /// Accumulate `dt`; once a full time step has built up, record one
    /// update and rotate the roles.
    ///
    /// At most one step is taken per call and the accumulator is reset to
    /// zero afterwards, so a long frame does not trigger a burst of steps.
    /// Negative or non-finite `dt` is ignored. Returns whether a step was
    /// recorded.
    ///
    /// # Errors
    /// `StateMismatch` if the maps are not in their resting states.
    pub fn update(&mut self, stream: &mut CommandStream<'_>, dt: f32) -> Result<bool> {
        if !dt.is_finite() || dt < 0.0 {
            warn!(dt, "ignoring invalid elapsed time");
            return Ok(false);
        }
        self.accumulator += dt;
        if self.accumulator < self.time_step {
            return Ok(false);
        }
        self.run_ops(stream, UPDATE_OPS, None)?;
        self.accumulator = 0.0;
        Ok(true)
    }

    /// Drop a random disturbance when `disturber`'s interval has elapsed,
    /// then [`update`](Self::update) with the timer's delta.
    ///
    /// # Errors
    /// Same as [`disturb`](Self::disturb) and [`update`](Self::update).
    pub fn update_waves(
        &mut self,
        stream: &mut CommandStream<'_>,
        timer: &GameTimer,
        disturber: &mut RandomDisturber,
    ) -> Result<bool> {
        if let Some(d) = disturber.poll(timer.total_time(), self.rows as usize, self.cols as usize)
        {
            self.disturb(stream, d.row, d.col, d.magnitude)?;
        }
        self.update(stream, timer.delta_time())
    }

    fn run_ops(
        &mut self,
        stream: &mut CommandStream<'_>,
        ops: &[WaveOp],
        disturb_bind_group: Option<&wgpu::BindGroup>,
    ) -> Result<()> {
        for &op in ops {
            match op {
                WaveOp::Transition {
                    role,
                    before,
                    after,
                } => {
                    stream.transition(self.maps[self.roles.index(role)].id, before, after)?;
                }
                WaveOp::DispatchDisturb => {
                    let bind_group = disturb_bind_group.ok_or_else(|| {
                        WaveError::invalid_parameter("disturb", "no bind group recorded")
                    })?;
                    self.check_dispatch_states(stream, op)?;
                    let mut pass = stream
                        .encoder()
                        .begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some("Wave Disturb Pass"),
                            timestamp_writes: None,
                        });
                    pass.set_pipeline(&self.disturb_pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.dispatch_workgroups(1, 1, 1);
                }
                WaveOp::DispatchUpdate => {
                    self.check_dispatch_states(stream, op)?;
                    let bind_group = &self.update_bind_groups[self.roles.index(Role::Prev)];
                    let mut pass = stream
                        .encoder()
                        .begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some("Wave Update Pass"),
                            timestamp_writes: None,
                        });
                    pass.set_pipeline(&self.update_pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.dispatch_workgroups(
                        self.cols.div_ceil(WAVE_THREAD_GROUP),
                        self.rows.div_ceil(WAVE_THREAD_GROUP),
                        1,
                    );
                }
                WaveOp::Rotate => self.roles.rotate(),
            }
        }
        Ok(())
    }

    fn check_dispatch_states(&self, stream: &CommandStream<'_>, op: WaveOp) -> Result<()> {
        if let Some(states) = crate::waves::dispatch_states(op) {
            for (role, state) in Role::ALL.into_iter().zip(states) {
                if let Some(state) = state {
                    stream.require(self.maps[self.roles.index(role)].id, state)?;
                }
            }
        }
        Ok(())
    }

    /// Read view of the current height map.
    ///
    /// The view changes with every update; do not keep it across one.
    #[must_use]
    pub fn displacement_view(&self) -> &wgpu::TextureView {
        &self.maps[self.roles.index(Role::Curr)].read_view
    }

    /// Texture behind [`displacement_view`](Self::displacement_view).
    #[must_use]
    pub fn displacement_texture(&self) -> &wgpu::Texture {
        &self.maps[self.roles.index(Role::Curr)].texture
    }

    /// Copy the current heights back to the CPU, row-major.
    ///
    /// Submits its own stream and waits on it; meant for tests and debug
    /// dumps, not the frame loop.
    ///
    /// # Errors
    /// `FenceTimeout` or `BufferMapping`.
    pub fn read_heights(&self, timeout: Duration) -> Result<Vec<f32>> {
        let ctx = &*self.context;
        let curr = &self.maps[self.roles.index(Role::Curr)];
        let unpadded = self.cols * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Wave Height Readback"),
            size: u64::from(padded * self.rows),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut stream = ctx.begin_commands("Wave Height Readback");
        stream.transition(curr.id, ResourceState::ShaderRead, ResourceState::CopySource)?;
        stream.encoder().copy_texture_to_buffer(
            curr.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.rows),
                },
            },
            curr.texture.size(),
        );
        stream.transition(curr.id, ResourceState::CopySource, ResourceState::ShaderRead)?;
        let token = ctx.submit(stream);
        ctx.fence().wait(token, timeout)?;

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        ctx.device().poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| WaveError::BufferMapping(e.to_string()))?
            .map_err(|e| WaveError::BufferMapping(e.to_string()))?;

        let heights = {
            let data = slice.get_mapped_range();
            data.chunks_exact(padded as usize)
                .flat_map(|row| bytemuck::cast_slice::<u8, f32>(&row[..unpadded as usize]))
                .copied()
                .collect()
        };
        staging.unmap();
        Ok(heights)
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Spacing between vertices, for building the matching mesh.
    #[must_use]
    pub fn spatial_step(&self) -> f32 {
        self.spatial_step
    }

    /// Fixed integration step.
    #[must_use]
    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    /// Coefficients derived at construction.
    #[must_use]
    pub fn coefficients(&self) -> WaveCoefficients {
        self.coefficients
    }

    /// Current role assignment.
    #[must_use]
    pub fn roles(&self) -> RoleRing {
        self.roles
    }

    /// Ledger id of the map playing `role`.
    #[must_use]
    pub fn resource_id(&self, role: Role) -> ResourceId {
        self.maps[self.roles.index(role)].id
    }
}

impl Drop for GpuWaveSimulator {
    fn drop(&mut self) {
        for map in &self.maps {
            self.context.unregister_resource(map.id);
        }
    }
}
