//! Separable Gaussian blur in compute
//!
//! The input colour texture is copied into ping-pong map A, blurred
//! `blur_count` times (horizontal A→B, vertical B→A) and copied back. The
//! op order comes from [`blur_schedule`]; this module only encodes it.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, ResourceId};
use super::stream::CommandStream;
use crate::barrier::ResourceState;
use crate::blur::{blur_schedule, gauss_weights, BlurOp, BlurResource, MAX_BLUR_RADIUS};
use crate::error::{Result, WaveError};

/// Threads per blur workgroup along the blurred axis.
const BLUR_GROUP_SIZE: u32 = 256;

/// Colour format of the ping-pong maps and of accepted inputs.
pub const BLUR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlurConstants {
    radius: i32,
    _pad: [i32; 3],
    /// Up to 11 weights packed four per vec4
    weights: [[f32; 4]; 3],
}

impl BlurConstants {
    fn new(weights: &[f32]) -> Self {
        let mut packed = [[0.0_f32; 4]; 3];
        for (i, w) in weights.iter().enumerate() {
            packed[i / 4][i % 4] = *w;
        }
        Self {
            radius: (weights.len() / 2) as i32,
            _pad: [0; 3],
            weights: packed,
        }
    }
}

struct BlurMap {
    texture: wgpu::Texture,
    id: ResourceId,
}

struct BlurTargets {
    width: u32,
    height: u32,
    a: BlurMap,
    b: BlurMap,
    horizontal: wgpu::BindGroup,
    vertical: wgpu::BindGroup,
}

/// In-place compute blur of a colour texture.
pub struct ComputeBlurFilter {
    context: Arc<GpuContext>,
    weights: Vec<f32>,
    constants: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    horizontal_pipeline: wgpu::ComputePipeline,
    vertical_pipeline: wgpu::ComputePipeline,
    targets: BlurTargets,
}

impl ComputeBlurFilter {
    /// Build the filter for `width × height` inputs.
    ///
    /// The weights are validated before any GPU object is created.
    ///
    /// # Errors
    /// `BlurRadiusTooLarge` when `ceil(2·sigma)` exceeds 5,
    /// `InvalidParameter` for a non-positive sigma, `InvalidDimensions` for an
    /// empty target.
    pub fn new(context: Arc<GpuContext>, width: u32, height: u32, sigma: f32) -> Result<Self> {
        let weights = gauss_weights(sigma)?;
        debug_assert!(weights.len() <= 2 * MAX_BLUR_RADIUS + 1);

        let device = context.device();
        let constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Blur Constants"),
            contents: bytemuck::bytes_of(&BlurConstants::new(&weights)),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // Binding order: constants, source (read), destination (write)
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: BLUR_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blur Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let horizontal_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blur Horizontal Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blur_horizontal.wgsl").into()),
        });
        let vertical_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blur Vertical Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blur_vertical.wgsl").into()),
        });
        let horizontal_pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Blur Horizontal Pipeline"),
                layout: Some(&pipeline_layout),
                module: &horizontal_shader,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        let vertical_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Blur Vertical Pipeline"),
            layout: Some(&pipeline_layout),
            module: &vertical_shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let targets = Self::build_targets(&context, &layout, &constants, width, height)?;
        info!(
            width,
            height,
            sigma,
            radius = weights.len() / 2,
            "created compute blur filter"
        );

        Ok(Self {
            context,
            weights,
            constants,
            layout,
            horizontal_pipeline,
            vertical_pipeline,
            targets,
        })
    }

    fn build_targets(
        context: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        constants: &wgpu::Buffer,
        width: u32,
        height: u32,
    ) -> Result<BlurTargets> {
        if width == 0 || height == 0 {
            return Err(WaveError::InvalidDimensions { width, height });
        }

        let a = Self::create_map(context, width, height, "Blur Map A")?;
        let b = Self::create_map(context, width, height, "Blur Map B")?;

        let bind_group = |src: &BlurMap, dst: &BlurMap, label| {
            let src_view = src.texture.create_view(&wgpu::TextureViewDescriptor::default());
            let dst_view = dst.texture.create_view(&wgpu::TextureViewDescriptor::default());
            context
                .device()
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: constants.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&src_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&dst_view),
                        },
                    ],
                })
        };
        let horizontal = bind_group(&a, &b, "Blur Horizontal Bind Group");
        let vertical = bind_group(&b, &a, "Blur Vertical Bind Group");

        Ok(BlurTargets {
            width,
            height,
            a,
            b,
            horizontal,
            vertical,
        })
    }

    fn create_map(
        context: &GpuContext,
        width: u32,
        height: u32,
        label: &'static str,
    ) -> Result<BlurMap> {
        let texture = context.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BLUR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let id = context.register_resource(label, ResourceState::Common)?;
        Ok(BlurMap { texture, id })
    }

    /// Rebuild the ping-pong maps for a new input size.
    ///
    /// A no-op when the size is unchanged. Callers must have drained any
    /// frame that still references the old maps.
    ///
    /// # Errors
    /// `InvalidDimensions` for an empty size.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.targets.width, self.targets.height) {
            return Ok(());
        }
        let targets =
            Self::build_targets(&self.context, &self.layout, &self.constants, width, height)?;
        let old = std::mem::replace(&mut self.targets, targets);
        self.context.unregister_resource(old.a.id);
        self.context.unregister_resource(old.b.id);
        debug!(width, height, "resized blur maps");
        Ok(())
    }

    /// Record `blur_count` blur iterations of `input`, in place.
    ///
    /// `input` must be a `width × height` [`BLUR_FORMAT`] texture registered
    /// in the context's ledger as `input_id`; it is returned to whatever
    /// state it was in.
    ///
    /// # Errors
    /// `InvalidParameter` for a size or format mismatch, `UnknownResource`
    /// or `StateMismatch` from the ledger.
    pub fn execute(
        &self,
        stream: &mut CommandStream<'_>,
        input: &wgpu::Texture,
        input_id: ResourceId,
        blur_count: u32,
    ) -> Result<()> {
        let targets = &self.targets;
        if input.width() != targets.width || input.height() != targets.height {
            return Err(WaveError::invalid_parameter(
                "input",
                format!(
                    "texture is {}x{}, blur maps are {}x{}; call on_resize first",
                    input.width(),
                    input.height(),
                    targets.width,
                    targets.height
                ),
            ));
        }
        if input.format() != BLUR_FORMAT {
            return Err(WaveError::invalid_parameter(
                "input",
                format!("format {:?} is not {BLUR_FORMAT:?}", input.format()),
            ));
        }
        let input_state = self
            .context
            .resource_state(input_id)
            .ok_or_else(|| WaveError::UnknownResource(format!("{input_id:?}")))?;

        let id_of = |resource| match resource {
            BlurResource::Input => input_id,
            BlurResource::MapA => targets.a.id,
            BlurResource::MapB => targets.b.id,
        };
        let extent = input.size();

        for op in blur_schedule(blur_count, input_state) {
            match op {
                BlurOp::Transition(t) => stream.transition(id_of(t.resource), t.before, t.after)?,
                BlurOp::CopyInputToA => stream.encoder().copy_texture_to_texture(
                    input.as_image_copy(),
                    targets.a.texture.as_image_copy(),
                    extent,
                ),
                BlurOp::CopyAToInput => stream.encoder().copy_texture_to_texture(
                    targets.a.texture.as_image_copy(),
                    input.as_image_copy(),
                    extent,
                ),
                BlurOp::Horizontal => {
                    stream.require(targets.a.id, ResourceState::ShaderRead)?;
                    stream.require(targets.b.id, ResourceState::UnorderedAccess)?;
                    let mut pass = stream
                        .encoder()
                        .begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some("Blur Horizontal Pass"),
                            timestamp_writes: None,
                        });
                    pass.set_pipeline(&self.horizontal_pipeline);
                    pass.set_bind_group(0, &targets.horizontal, &[]);
                    pass.dispatch_workgroups(
                        targets.width.div_ceil(BLUR_GROUP_SIZE),
                        targets.height,
                        1,
                    );
                }
                BlurOp::Vertical => {
                    stream.require(targets.b.id, ResourceState::ShaderRead)?;
                    stream.require(targets.a.id, ResourceState::UnorderedAccess)?;
                    let mut pass = stream
                        .encoder()
                        .begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some("Blur Vertical Pass"),
                            timestamp_writes: None,
                        });
                    pass.set_pipeline(&self.vertical_pipeline);
                    pass.set_bind_group(0, &targets.vertical, &[]);
                    pass.dispatch_workgroups(
                        targets.width,
                        targets.height.div_ceil(BLUR_GROUP_SIZE),
                        1,
                    );
                }
            }
        }
        Ok(())
    }

    /// Normalised kernel weights, centre at index `radius`.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Kernel radius.
    #[must_use]
    pub fn radius(&self) -> usize {
        self.weights.len() / 2
    }

    /// Current map size.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.targets.width, self.targets.height)
    }
}

impl Drop for ComputeBlurFilter {
    fn drop(&mut self) {
        self.context.unregister_resource(self.targets.a.id);
        self.context.unregister_resource(self.targets.b.id);
    }
}
