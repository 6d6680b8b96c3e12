//! Frame loop and composable render passes
//!
//! A [`FrameLoop`] owns the frame-resource ring and an ordered list of
//! [`RenderPass`] objects. Each frame it takes the next ring slot (the only
//! point that may block), fills the pass constants, lets every pass record
//! into one command stream, submits it and stamps the slot with the
//! resulting fence token. Demos differ only in the passes they register.

use std::sync::Arc;

use nalgebra::{Matrix4, Point3, Vector3};
use tracing::{debug, info, warn};

use super::blur::{ComputeBlurFilter, BLUR_FORMAT};
use super::context::{GpuContext, ResourceId};
use super::fence::GpuFence;
use super::frame_resource::{
    FrameResource, FrameResourceCounts, ObjectConstants, PassConstants, WaveVertex,
};
use super::stream::CommandStream;
use super::waves::GpuWaveSimulator;
use crate::barrier::ResourceState;
use crate::config::{BlurConfig, FrameConfig, WaveConfig};
use crate::error::{Result, WaveError};
use crate::sync::{FenceToken, FrameResourceRing};
use crate::timer::{GameTimer, ProfilerScope};
use crate::waves::{RandomDisturber, WaveField};

/// One stage of a frame.
pub trait RenderPass {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// One-time preparation once the pass joins a loop.
    ///
    /// # Errors
    /// Implementation-defined.
    fn setup(&mut self, _ctx: &GpuContext) -> Result<()> {
        Ok(())
    }

    /// Record this pass's work for the current frame.
    ///
    /// # Errors
    /// Implementation-defined; a failed pass ends the frame after the
    /// work recorded so far is submitted.
    fn execute(
        &mut self,
        ctx: &GpuContext,
        frame: &FrameResource,
        stream: &mut CommandStream<'_>,
        timer: &GameTimer,
    ) -> Result<()>;

    /// React to a new output size. The loop drains the GPU first.
    ///
    /// # Errors
    /// Implementation-defined.
    fn resize(&mut self, _ctx: &GpuContext, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

/// Look-at camera producing the pass constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub fov_y: f32,
    pub near_z: f32,
    pub far_z: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Point3::new(0.0, 60.0, -100.0),
            target: Point3::origin(),
            fov_y: std::f32::consts::FRAC_PI_4,
            near_z: 1.0,
            far_z: 1000.0,
        }
    }
}

impl Camera {
    /// Constants for a `width × height` target at the timer's time.
    #[must_use]
    pub fn pass_constants(&self, width: u32, height: u32, timer: &GameTimer) -> PassConstants {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let view = Matrix4::look_at_rh(&self.eye, &self.target, &Vector3::y());
        let proj = Matrix4::new_perspective(w / h, self.fov_y, self.near_z, self.far_z);
        PassConstants {
            view: view.into(),
            proj: proj.into(),
            view_proj: (proj * view).into(),
            eye_pos_w: self.eye.coords.into(),
            _pad0: 0.0,
            render_target_size: [w, h],
            inv_render_target_size: [1.0 / w, 1.0 / h],
            near_z: self.near_z,
            far_z: self.far_z,
            total_time: timer.total_time(),
            delta_time: timer.delta_time(),
        }
    }
}

/// Fixed render-loop driver.
pub struct FrameLoop {
    context: Arc<GpuContext>,
    ring: FrameResourceRing<FrameResource, GpuFence>,
    passes: Vec<Box<dyn RenderPass>>,
    camera: Camera,
    width: u32,
    height: u32,
}

impl FrameLoop {
    /// Allocate `config.frame_count` frame resources of `counts` each.
    ///
    /// # Errors
    /// `InvalidRingSize`, or any buffer allocation error.
    pub fn new(
        context: Arc<GpuContext>,
        config: &FrameConfig,
        counts: &FrameResourceCounts,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        config.validate()?;
        let resources = (0..config.frame_count)
            .map(|_| FrameResource::new(context.device(), counts))
            .collect::<Result<Vec<_>>>()?;
        let ring = FrameResourceRing::new(
            resources,
            Arc::clone(context.fence()),
            config.fence_timeout(),
        )?;
        info!(frames = config.frame_count, width, height, "created frame loop");

        Ok(Self {
            context,
            ring,
            passes: Vec::new(),
            camera: Camera::default(),
            width,
            height,
        })
    }

    /// Append a pass, running its setup.
    ///
    /// # Errors
    /// Whatever the pass's `setup` returns.
    pub fn add_pass(&mut self, mut pass: Box<dyn RenderPass>) -> Result<()> {
        pass.setup(&self.context)?;
        debug!(pass = pass.name(), "added render pass");
        self.passes.push(pass);
        Ok(())
    }

    /// Replace the camera.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Record and submit one frame.
    ///
    /// If the pass constants cannot be written the slot is abandoned. If a
    /// pass fails, whatever was already recorded is still submitted and
    /// stamped, so the ledger transitions match the GPU's work. Either way
    /// the next call starts cleanly.
    ///
    /// # Errors
    /// `FenceTimeout` if the GPU holds the next slot too long, or the first
    /// pass error.
    pub fn run_frame(&mut self, timer: &GameTimer) -> Result<FenceToken> {
        let _scope = ProfilerScope::new("frame");
        let ctx = &*self.context;

        let frame = self.ring.advance()?;
        let constants = self.camera.pass_constants(self.width, self.height, timer);
        if let Err(e) = frame.pass.copy_data(ctx.queue(), 0, &constants) {
            self.ring.abandon_recording()?;
            return Err(e);
        }

        let mut stream = ctx.begin_commands("Frame");
        let mut recorded = Ok(());
        for pass in &mut self.passes {
            recorded = pass.execute(ctx, frame, &mut stream, timer);
            if let Err(e) = &recorded {
                warn!(pass = pass.name(), error = %e, "render pass failed");
                break;
            }
        }
        let token = ctx.submit(stream);
        self.ring.mark_in_flight(token)?;
        recorded.map(|()| token)
    }

    /// Drain the GPU, then forward the new size to every pass.
    ///
    /// # Errors
    /// `InvalidDimensions` for a zero extent (nothing is touched),
    /// `FenceTimeout` while draining, or any pass error.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(WaveError::InvalidDimensions { width, height });
        }
        self.ring.wait_idle()?;
        self.width = width;
        self.height = height;
        for pass in &mut self.passes {
            pass.resize(&self.context, width, height)?;
        }
        Ok(())
    }

    /// Wait for every submitted frame.
    ///
    /// # Errors
    /// `FenceTimeout`.
    pub fn wait_idle(&self) -> Result<()> {
        self.ring.wait_idle()
    }

    /// The frame ring.
    #[must_use]
    pub fn ring(&self) -> &FrameResourceRing<FrameResource, GpuFence> {
        &self.ring
    }

    /// Registered pass names, in execution order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }
}

/// Drives a [`GpuWaveSimulator`] and publishes its displacement parameters.
pub struct GpuWavesPass {
    simulator: GpuWaveSimulator,
    disturber: RandomDisturber,
    object_index: usize,
    steps: u64,
}

impl GpuWavesPass {
    /// Build the simulator and its random disturber.
    ///
    /// # Errors
    /// Construction errors of the simulator or disturber.
    pub fn new(
        context: Arc<GpuContext>,
        waves: &WaveConfig,
        frame: &FrameConfig,
        object_index: usize,
    ) -> Result<Self> {
        Ok(Self {
            simulator: GpuWaveSimulator::new(context, waves)?,
            disturber: RandomDisturber::new(
                frame.disturb_interval,
                frame.disturb_magnitude(),
                frame.seed,
            )?,
            object_index,
            steps: 0,
        })
    }

    /// The simulator.
    #[must_use]
    pub fn simulator(&self) -> &GpuWaveSimulator {
        &self.simulator
    }

    /// Update steps recorded so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl RenderPass for GpuWavesPass {
    fn name(&self) -> &'static str {
        "gpu-waves"
    }

    fn execute(
        &mut self,
        ctx: &GpuContext,
        frame: &FrameResource,
        stream: &mut CommandStream<'_>,
        timer: &GameTimer,
    ) -> Result<()> {
        if self
            .simulator
            .update_waves(stream, timer, &mut self.disturber)?
        {
            self.steps += 1;
        }

        let sim = &self.simulator;
        let constants = ObjectConstants {
            displacement_map_texel_size: [1.0 / sim.cols() as f32, 1.0 / sim.rows() as f32],
            grid_spatial_step: sim.spatial_step(),
            ..ObjectConstants::default()
        };
        frame
            .objects
            .copy_data(ctx.queue(), self.object_index, &constants)
    }
}

/// Integrates a [`WaveField`] on the CPU and streams it into the frame's
/// dynamic vertex buffer.
pub struct CpuWavesPass {
    field: WaveField,
    disturber: RandomDisturber,
    vertices: Vec<WaveVertex>,
}

impl CpuWavesPass {
    /// Build the field and its random disturber.
    ///
    /// # Errors
    /// Construction errors of the field or disturber.
    pub fn new(waves: &WaveConfig, frame: &FrameConfig) -> Result<Self> {
        let field = WaveField::from_config(waves)?;
        Ok(Self {
            vertices: vec![WaveVertex::default(); field.vertex_count()],
            field,
            disturber: RandomDisturber::new(
                frame.disturb_interval,
                frame.disturb_magnitude(),
                frame.seed,
            )?,
        })
    }

    /// The field.
    #[must_use]
    pub fn field(&self) -> &WaveField {
        &self.field
    }
}

impl RenderPass for CpuWavesPass {
    fn name(&self) -> &'static str {
        "cpu-waves"
    }

    fn execute(
        &mut self,
        ctx: &GpuContext,
        frame: &FrameResource,
        _stream: &mut CommandStream<'_>,
        timer: &GameTimer,
    ) -> Result<()> {
        let (rows, cols) = (self.field.rows(), self.field.cols());
        if let Some(d) = self.disturber.poll(timer.total_time(), rows, cols) {
            self.field.disturb(d.row, d.col, d.magnitude)?;
        }
        self.field.update(timer.delta_time());

        let (width, depth) = (self.field.width(), self.field.depth());
        for (i, vertex) in self.vertices.iter_mut().enumerate() {
            let p = self.field.position(i);
            *vertex = WaveVertex {
                pos: p.into(),
                normal: self.field.normal(i).into(),
                tex_c: [0.5 + p.x / width, 0.5 - p.z / depth],
            };
        }

        let vb = frame.waves_vb.as_ref().ok_or_else(|| {
            WaveError::invalid_parameter("waves_vb", "frame resource has no wave vertex buffer")
        })?;
        vb.copy_slice(ctx.queue(), 0, &self.vertices)
    }
}

/// Clears an offscreen colour target and blurs it in place.
///
/// The target stands in for the back buffer and rests in `RenderTarget`.
pub struct BlurPass {
    context: Arc<GpuContext>,
    filter: ComputeBlurFilter,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    target_id: ResourceId,
    blur_count: u32,
    clear_color: wgpu::Color,
}

impl BlurPass {
    /// Build the filter and a `width × height` offscreen target.
    ///
    /// # Errors
    /// Filter construction errors.
    pub fn new(
        context: Arc<GpuContext>,
        config: &BlurConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let filter = ComputeBlurFilter::new(Arc::clone(&context), width, height, config.sigma)?;
        let (target, target_view, target_id) = Self::create_target(&context, width, height)?;
        Ok(Self {
            context,
            filter,
            target,
            target_view,
            target_id,
            blur_count: config.blur_count,
            clear_color: wgpu::Color {
                r: 0.7,
                g: 0.7,
                b: 0.7,
                a: 1.0,
            },
        })
    }

    fn create_target(
        context: &GpuContext,
        width: u32,
        height: u32,
    ) -> Result<(wgpu::Texture, wgpu::TextureView, ResourceId)> {
        let texture = context.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BLUR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = context.register_resource("Offscreen Target", ResourceState::RenderTarget)?;
        Ok((texture, view, id))
    }

    /// The offscreen target.
    #[must_use]
    pub fn target(&self) -> &wgpu::Texture {
        &self.target
    }

    /// Set the clear colour.
    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }
}

impl RenderPass for BlurPass {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn execute(
        &mut self,
        _ctx: &GpuContext,
        _frame: &FrameResource,
        stream: &mut CommandStream<'_>,
        _timer: &GameTimer,
    ) -> Result<()> {
        stream.require(self.target_id, ResourceState::RenderTarget)?;
        {
            let _pass = stream
                .encoder()
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Offscreen Clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &self.target_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(self.clear_color),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
        }
        self.filter
            .execute(stream, &self.target, self.target_id, self.blur_count)
    }

    fn resize(&mut self, ctx: &GpuContext, width: u32, height: u32) -> Result<()> {
        // The filter rejects an empty size before any texture is created
        self.filter.on_resize(width, height)?;
        let (target, view, id) = Self::create_target(ctx, width, height)?;
        ctx.unregister_resource(self.target_id);
        self.target = target;
        self.target_view = view;
        self.target_id = id;
        Ok(())
    }
}

impl Drop for BlurPass {
    fn drop(&mut self) {
        self.context.unregister_resource(self.target_id);
    }
}
