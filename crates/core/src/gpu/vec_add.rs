//! Compute-then-readback round trip
//!
//! Two fixed input arrays are summed element-wise on the GPU and the result
//! is copied into a mappable readback buffer. Reading it back requires the
//! [`FenceToken`] returned by [`VecAddDemo::do_compute_work`]; the read waits
//! on it with a bounded timeout before mapping.

use std::fmt::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, ResourceId};
use crate::barrier::ResourceState;
use crate::error::{Result, WaveError};
use crate::sync::{Fence, FenceToken};

/// Elements per buffer; one workgroup covers them all.
pub const VEC_ADD_ELEMENTS: usize = 32;

/// One record of the compute-add buffers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VecAddData {
    pub v1: [f32; 3],
    pub _pad0: f32,
    pub v2: [f32; 2],
    pub _pad1: [f32; 2],
}

impl VecAddData {
    /// Record with the given vectors.
    #[must_use]
    pub const fn new(v1: [f32; 3], v2: [f32; 2]) -> Self {
        Self {
            v1,
            _pad0: 0.0,
            v2,
            _pad1: [0.0; 2],
        }
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            [
                self.v1[0] + other.v1[0],
                self.v1[1] + other.v1[1],
                self.v1[2] + other.v1[2],
            ],
            [self.v2[0] + other.v2[0], self.v2[1] + other.v2[1]],
        )
    }
}

/// The fixed inputs: `a[i] = ((i, i, i), (i, 0))`, `b[i] = ((-i, i², 0), (0, -i))`.
#[must_use]
pub fn vec_add_inputs() -> (Vec<VecAddData>, Vec<VecAddData>) {
    (0..VEC_ADD_ELEMENTS)
        .map(|i| {
            let f = i as f32;
            (
                VecAddData::new([f, f, f], [f, 0.0]),
                VecAddData::new([-f, f * f, 0.0], [0.0, -f]),
            )
        })
        .unzip()
}

/// CPU reference of the kernel.
#[must_use]
pub fn vec_add_reference(a: &[VecAddData], b: &[VecAddData]) -> Vec<VecAddData> {
    a.iter().zip(b).map(|(x, y)| x.add(y)).collect()
}

/// One `(x, y, z, u, v)` line per record.
fn format_records(data: &[VecAddData]) -> String {
    data.iter().fold(String::new(), |mut out, d| {
        let _ = writeln!(
            out,
            "({}, {}, {}, {}, {})",
            d.v1[0], d.v1[1], d.v1[2], d.v2[0], d.v2[1]
        );
        out
    })
}

/// Unmaps the readback buffer however the read ends.
struct MappedReadback<'a> {
    buffer: &'a wgpu::Buffer,
}

impl Drop for MappedReadback<'_> {
    fn drop(&mut self) {
        self.buffer.unmap();
    }
}

/// Two inputs in, one output out, read back on the CPU.
pub struct VecAddDemo {
    context: Arc<GpuContext>,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    output: wgpu::Buffer,
    readback: wgpu::Buffer,
    ids: [ResourceId; 3],
    timeout: Duration,
}

impl VecAddDemo {
    /// Upload the inputs through staging buffers and build the pipeline.
    ///
    /// `timeout` bounds every fence wait of [`read_output`](Self::read_output).
    ///
    /// # Errors
    /// `StateMismatch` or `LockPoisoned` from the ledger.
    pub fn new(context: Arc<GpuContext>, timeout: Duration) -> Result<Self> {
        let device = context.device();
        let (a, b) = vec_add_inputs();
        let byte_size = (VEC_ADD_ELEMENTS * std::mem::size_of::<VecAddData>()) as u64;

        let gpu_buffer = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: byte_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let input_a = gpu_buffer("VecAdd Input A");
        let input_b = gpu_buffer("VecAdd Input B");
        let output = gpu_buffer("VecAdd Output");
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VecAdd Readback"),
            size: byte_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let ids = [
            context.register_resource("VecAdd Input A", ResourceState::Common)?,
            context.register_resource("VecAdd Input B", ResourceState::Common)?,
            context.register_resource("VecAdd Output", ResourceState::Common)?,
        ];

        // Staging upload: CPU-visible copies, then a GPU copy into local memory
        let mut stream = context.begin_commands("VecAdd Upload");
        for (data, target, id) in [(&a, &input_a, ids[0]), (&b, &input_b, ids[1])] {
            let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("VecAdd Staging"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            stream.transition(id, ResourceState::Common, ResourceState::CopyDest)?;
            stream
                .encoder()
                .copy_buffer_to_buffer(&staging, 0, target, 0, byte_size);
            stream.transition(id, ResourceState::CopyDest, ResourceState::ShaderRead)?;
        }
        let upload = context.submit(stream);
        debug!(fence = upload.value(), "queued compute-add input upload");

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VecAdd Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/vec_add.wgsl").into()),
        });
        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        // Whole-buffer bindings: input A, input B, output
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VecAdd Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VecAdd Bind Group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input_b.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VecAdd Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("VecAdd Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(Self {
            context,
            pipeline,
            bind_group,
            output,
            readback,
            ids,
            timeout,
        })
    }

    /// Dispatch the kernel and copy the output into the readback buffer.
    ///
    /// # Errors
    /// `StateMismatch` from the ledger.
    pub fn do_compute_work(&self) -> Result<FenceToken> {
        let ctx = &*self.context;
        let [a, b, out] = self.ids;
        let mut stream = ctx.begin_commands("VecAdd Compute");

        stream.require(a, ResourceState::ShaderRead)?;
        stream.require(b, ResourceState::ShaderRead)?;
        {
            let mut pass = stream
                .encoder()
                .begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("VecAdd Pass"),
                    timestamp_writes: None,
                });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        stream.transition(out, ResourceState::Common, ResourceState::CopySource)?;
        stream
            .encoder()
            .copy_buffer_to_buffer(&self.output, 0, &self.readback, 0, self.output.size());
        stream.transition(out, ResourceState::CopySource, ResourceState::Common)?;

        Ok(ctx.submit(stream))
    }

    /// Wait for `token`, map the readback buffer and hand the mapped
    /// records to `visit`. The buffer is unmapped however `visit` returns.
    fn with_mapped<R>(
        &self,
        token: FenceToken,
        visit: impl FnOnce(&[VecAddData]) -> Result<R>,
    ) -> Result<R> {
        let ctx = &*self.context;
        ctx.fence().wait(token, self.timeout)?;

        let slice = self.readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        ctx.device().poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| WaveError::BufferMapping(e.to_string()))?
            .map_err(|e| WaveError::BufferMapping(e.to_string()))?;

        let _guard = MappedReadback {
            buffer: &self.readback,
        };
        let view = slice.get_mapped_range();
        visit(bytemuck::cast_slice(&view))
    }

    /// Output records, once the submission behind `token` has retired.
    ///
    /// # Errors
    /// `FenceTimeout` if the GPU does not finish in time, `BufferMapping`
    /// if mapping fails.
    pub fn read_output(&self, token: FenceToken) -> Result<Vec<VecAddData>> {
        self.with_mapped(token, |data| Ok(data.to_vec()))
    }

    /// Write the output records to `path`, one `(x, y, z, u, v)` line each.
    ///
    /// The file is only created once the readback succeeded.
    ///
    /// # Errors
    /// As [`read_output`](Self::read_output), plus `Io` for file errors.
    pub fn print_output(&self, token: FenceToken, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.with_mapped(token, |data| Ok(format_records(data)))?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "wrote compute-add results");
        Ok(())
    }
}

impl Drop for VecAddDemo {
    fn drop(&mut self) {
        for id in self.ids {
            self.context.unregister_resource(id);
        }
    }
}
