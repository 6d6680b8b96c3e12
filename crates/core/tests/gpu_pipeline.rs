#![cfg(feature = "gpu")]
//! GPU integration suite
//!
//! Every test degrades to a pass when no adapter is available, so the suite
//! runs unchanged on headless CI.
//!
//! Covered:
//! - GPU wave integration matches the CPU field step for step
//! - the role rotation cycles through all three maps
//! - compute-add readback and the printed result file
//! - blur of a known image, and the full frame loop with every pass

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use wave_sim_core::gpu::{
    vec_add_inputs, vec_add_reference, BlurPass, CommandStream, CpuWavesPass, FrameLoop,
    FrameResource, FrameResourceCounts, GpuWavesPass, RenderPass, BLUR_FORMAT,
};
use wave_sim_core::{
    create_gpu_context_blocking, BlurConfig, ComputeBlurFilter, Fence, FenceToken, FrameConfig,
    GameTimer, GpuContext, GpuWaveSimulator, ResourceState, Result, Role, SlotState, VecAddDemo,
    WaveConfig, WaveError, WaveField,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn gpu() -> Option<Arc<GpuContext>> {
    match create_gpu_context_blocking() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("GPU test skipped: {e}");
            None
        }
    }
}

fn small_waves() -> WaveConfig {
    WaveConfig {
        rows: 64,
        cols: 64,
        ..WaveConfig::gpu_waves()
    }
}

/// Read an `Rgba8Unorm` texture back as rows of RGBA bytes.
fn read_rgba8(ctx: &GpuContext, texture: &wgpu::Texture) -> Vec<[u8; 4]> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded = width * 4;
    let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Readback"),
        size: u64::from(padded * height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut stream = ctx.begin_commands("Test Readback");
    stream.encoder().copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    let token = ctx.submit(stream);
    ctx.fence().wait(token, TIMEOUT).unwrap();

    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
    ctx.device().poll(wgpu::Maintain::Wait);
    let texels = slice
        .get_mapped_range()
        .chunks_exact(padded as usize)
        .flat_map(|row| {
            row[..unpadded as usize]
                .chunks_exact(4)
                .map(|px| [px[0], px[1], px[2], px[3]])
                .collect::<Vec<_>>()
        })
        .collect();
    staging.unmap();
    texels
}

#[test]
fn test_gpu_waves_match_cpu_field() {
    let Some(ctx) = gpu() else { return };
    let config = small_waves();
    let mut sim = GpuWaveSimulator::new(Arc::clone(&ctx), &config).unwrap();
    let mut field = WaveField::from_config(&config).unwrap();

    let mut stream = ctx.begin_commands("Test Disturb");
    sim.disturb(&mut stream, 32, 20, 1.0).unwrap();
    let _ = ctx.submit(stream);
    field.disturb(32, 20, 1.0).unwrap();

    for _ in 0..20 {
        let mut stream = ctx.begin_commands("Test Update");
        assert!(sim.update(&mut stream, config.time_step).unwrap());
        let _ = ctx.submit(stream);
        assert_eq!(field.update(config.time_step), 1);

        let heights = sim.read_heights(TIMEOUT).unwrap();
        assert_eq!(heights.len(), 64 * 64);
        for row in 0..64 {
            for col in 0..64 {
                assert_relative_eq!(
                    heights[row * 64 + col],
                    field.height(row, col),
                    epsilon = 1e-5,
                    max_relative = 1e-4
                );
            }
        }
    }
}

#[test]
fn test_gpu_waves_role_cycle_and_states() {
    let Some(ctx) = gpu() else { return };
    let config = small_waves();
    let mut sim = GpuWaveSimulator::new(Arc::clone(&ctx), &config).unwrap();
    let start = sim.roles();
    let curr_ids: Vec<_> = (0..3)
        .map(|_| {
            let id = sim.resource_id(Role::Curr);
            let mut stream = ctx.begin_commands("Test Update");
            // Half a step only accumulates
            assert!(!sim.update(&mut stream, config.time_step * 0.5).unwrap());
            assert!(sim.update(&mut stream, config.time_step * 0.5).unwrap());
            let _ = ctx.submit(stream);
            id
        })
        .collect();

    assert_eq!(sim.roles(), start);
    assert_ne!(curr_ids[0], curr_ids[1]);
    assert_ne!(curr_ids[1], curr_ids[2]);
    assert_ne!(curr_ids[0], curr_ids[2]);

    assert_eq!(
        ctx.resource_state(sim.resource_id(Role::Prev)),
        Some(ResourceState::ShaderRead)
    );
    assert_eq!(
        ctx.resource_state(sim.resource_id(Role::Curr)),
        Some(ResourceState::ShaderRead)
    );
    assert_eq!(
        ctx.resource_state(sim.resource_id(Role::Next)),
        Some(ResourceState::UnorderedAccess)
    );
    ctx.flush(TIMEOUT).unwrap();
}

#[test]
fn test_gpu_waves_reject_bad_input() {
    let Some(ctx) = gpu() else { return };
    let config = WaveConfig {
        rows: 100,
        cols: 100,
        ..WaveConfig::gpu_waves()
    };
    assert!(matches!(
        GpuWaveSimulator::new(Arc::clone(&ctx), &config),
        Err(WaveError::GridNotDivisible { .. })
    ));

    let mut sim = GpuWaveSimulator::new(Arc::clone(&ctx), &small_waves()).unwrap();
    let mut stream = ctx.begin_commands("Test Disturb");
    assert!(matches!(
        sim.disturb(&mut stream, 3, 32, 1.0),
        Err(WaveError::DisturbOutOfBounds { .. })
    ));
    assert!(matches!(
        sim.disturb(&mut stream, 32, 60, 1.0),
        Err(WaveError::DisturbOutOfBounds { .. })
    ));
    sim.disturb(&mut stream, 59, 4, 1.0).unwrap();
    let _ = ctx.submit(stream);
}

#[test]
fn test_vec_add_round_trip() {
    let Some(ctx) = gpu() else { return };
    let demo = VecAddDemo::new(Arc::clone(&ctx), TIMEOUT).unwrap();
    let token = demo.do_compute_work().unwrap();
    let output = demo.read_output(token).unwrap();

    let (a, b) = vec_add_inputs();
    assert_eq!(output, vec_add_reference(&a, &b));

    // A second run reuses the same buffers
    let token = demo.do_compute_work().unwrap();
    assert_eq!(demo.read_output(token).unwrap().len(), 32);
}

#[test]
fn test_vec_add_print_output() {
    let Some(ctx) = gpu() else { return };
    let demo = VecAddDemo::new(Arc::clone(&ctx), TIMEOUT).unwrap();
    let token = demo.do_compute_work().unwrap();

    let path = std::env::temp_dir().join(format!("vec_add_{}.txt", std::process::id()));
    demo.print_output(token, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 32);
    assert_eq!(lines[0], "(0, 0, 0, 0, 0)");
    assert_eq!(lines[3], "(0, 12, 3, 3, -3)");
}

#[test]
fn test_vec_add_timeout_leaves_no_file() {
    let Some(ctx) = gpu() else { return };
    let demo = VecAddDemo::new(Arc::clone(&ctx), Duration::from_millis(50)).unwrap();
    let token = demo.do_compute_work().unwrap();

    let path = std::env::temp_dir().join(format!("vec_add_timeout_{}.txt", std::process::id()));
    std::fs::remove_file(&path).ok();
    // A value that is never signalled
    let err = demo
        .print_output(FenceToken::new(token.value() + 1000), &path)
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(!path.exists());

    ctx.flush(TIMEOUT).unwrap();
}

#[test]
fn test_blur_spreads_a_stripe() {
    let Some(ctx) = gpu() else { return };
    let (width, height) = (64, 16);
    let filter = ComputeBlurFilter::new(Arc::clone(&ctx), width, height, 1.0).unwrap();
    assert_eq!(filter.radius(), 2);

    let input = ctx.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Stripe"),
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
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    // One white column at x = 32
    let mut texels = vec![0_u8; (width * height * 4) as usize];
    for y in 0..height {
        let i = ((y * width + 32) * 4) as usize;
        texels[i..i + 4].copy_from_slice(&[255; 4]);
    }
    ctx.queue().write_texture(
        input.as_image_copy(),
        &texels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        input.size(),
    );
    let id = ctx
        .register_resource("Stripe", ResourceState::Common)
        .unwrap();

    let mut stream = ctx.begin_commands("Test Blur");
    filter.execute(&mut stream, &input, id, 1).unwrap();
    let _ = ctx.submit(stream);
    assert_eq!(ctx.resource_state(id), Some(ResourceState::Common));

    let out = read_rgba8(&ctx, &input);
    let weights = filter.weights();
    for y in 0..height as usize {
        let row = &out[y * width as usize..(y + 1) * width as usize];
        for dx in -2_i32..=2 {
            let expected = weights[(dx + 2) as usize] * 255.0;
            let got = f32::from(row[(32 + dx) as usize][0]);
            assert!((got - expected).abs() <= 1.5, "x={} got {got}", 32 + dx);
        }
        assert_eq!(row[29][0], 0);
        assert_eq!(row[35][0], 0);
    }

    // Wrong size is refused before recording anything
    let mut stream = ctx.begin_commands("Test Blur");
    let mut small = ComputeBlurFilter::new(Arc::clone(&ctx), 32, 16, 1.0).unwrap();
    assert!(small.execute(&mut stream, &input, id, 1).is_err());
    small.on_resize(width, height).unwrap();
    small.execute(&mut stream, &input, id, 1).unwrap();
    let _ = ctx.submit(stream);

    ctx.flush(TIMEOUT).unwrap();
    ctx.unregister_resource(id);
}

#[test]
fn test_blur_rejects_wide_kernel() {
    let Some(ctx) = gpu() else { return };
    assert!(matches!(
        ComputeBlurFilter::new(Arc::clone(&ctx), 64, 64, 2.6),
        Err(WaveError::BlurRadiusTooLarge { radius: 6, max: 5 })
    ));
}

#[test]
fn test_frame_loop_runs_every_pass() {
    let Some(ctx) = gpu() else { return };
    let frame_config = FrameConfig::default();
    let cpu_waves = WaveConfig {
        rows: 32,
        cols: 32,
        ..WaveConfig::land_and_waves()
    };
    let counts = FrameResourceCounts {
        object_count: 2,
        wave_vertex_count: Some(32 * 32),
        ..FrameResourceCounts::default()
    };
    let (width, height) = (128, 96);

    let mut frames =
        FrameLoop::new(Arc::clone(&ctx), &frame_config, &counts, width, height).unwrap();
    frames
        .add_pass(Box::new(
            CpuWavesPass::new(&cpu_waves, &frame_config).unwrap(),
        ))
        .unwrap();
    frames
        .add_pass(Box::new(
            GpuWavesPass::new(Arc::clone(&ctx), &small_waves(), &frame_config, 1).unwrap(),
        ))
        .unwrap();
    frames
        .add_pass(Box::new(
            BlurPass::new(Arc::clone(&ctx), &BlurConfig::default(), width, height).unwrap(),
        ))
        .unwrap();
    assert_eq!(frames.pass_names(), ["cpu-waves", "gpu-waves", "blur"]);

    let mut timer = GameTimer::new();
    let mut last = None;
    for _ in 0..12 {
        timer.tick(1.0 / 30.0);
        let token = frames.run_frame(&timer).unwrap();
        if let Some(previous) = last {
            assert!(token > previous);
        }
        last = Some(token);
    }

    frames.resize(64, 48).unwrap();
    timer.tick(1.0 / 30.0);
    let token = frames.run_frame(&timer).unwrap();
    frames.wait_idle().unwrap();
    assert!(ctx.fence().is_complete(token));
}

#[test]
fn test_cpu_waves_pass_needs_vertex_buffer() {
    let Some(ctx) = gpu() else { return };
    let frame_config = FrameConfig::default();
    let mut frames = FrameLoop::new(
        Arc::clone(&ctx),
        &frame_config,
        &FrameResourceCounts::default(),
        64,
        64,
    )
    .unwrap();
    frames
        .add_pass(Box::new(
            CpuWavesPass::new(&WaveConfig::land_and_waves(), &frame_config).unwrap(),
        ))
        .unwrap();

    let mut timer = GameTimer::new();
    timer.tick(1.0 / 30.0);
    assert!(matches!(
        frames.run_frame(&timer),
        Err(WaveError::InvalidParameter { name: "waves_vb", .. })
    ));
}

/// Fails the first `failures` frames, then records nothing.
struct FailingPass {
    failures: u32,
}

impl RenderPass for FailingPass {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn execute(
        &mut self,
        _ctx: &GpuContext,
        _frame: &FrameResource,
        _stream: &mut CommandStream<'_>,
        _timer: &GameTimer,
    ) -> Result<()> {
        if self.failures == 0 {
            return Ok(());
        }
        self.failures -= 1;
        Err(WaveError::invalid_parameter("failing", "scripted failure"))
    }
}

#[test]
fn test_frame_loop_recovers_after_pass_error() {
    let Some(ctx) = gpu() else { return };
    let frame_config = FrameConfig::default();
    let mut frames = FrameLoop::new(
        Arc::clone(&ctx),
        &frame_config,
        &FrameResourceCounts::default(),
        64,
        64,
    )
    .unwrap();
    frames
        .add_pass(Box::new(
            BlurPass::new(Arc::clone(&ctx), &BlurConfig::default(), 64, 64).unwrap(),
        ))
        .unwrap();
    frames.add_pass(Box::new(FailingPass { failures: 2 })).unwrap();

    let mut timer = GameTimer::new();
    for _ in 0..2 {
        timer.tick(1.0 / 30.0);
        assert!(matches!(
            frames.run_frame(&timer),
            Err(WaveError::InvalidParameter { name: "failing", .. })
        ));
        // The partial frame was still submitted
        let slot = frames.ring().current_index();
        assert_ne!(frames.ring().slot_state(slot), Some(SlotState::Recording));
    }

    for _ in 0..4 {
        timer.tick(1.0 / 30.0);
        let _ = frames.run_frame(&timer).unwrap();
    }
    frames.wait_idle().unwrap();
}

#[test]
fn test_blur_pass_clear_and_empty_resize() {
    let Some(ctx) = gpu() else { return };
    let frame = FrameResource::new(ctx.device(), &FrameResourceCounts::default()).unwrap();
    let mut pass = BlurPass::new(Arc::clone(&ctx), &BlurConfig::default(), 32, 32).unwrap();
    pass.set_clear_color(wgpu::Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    });

    // A minimised window reports a zero extent; nothing is rebuilt
    assert!(matches!(
        pass.resize(&ctx, 0, 64),
        Err(WaveError::InvalidDimensions {
            width: 0,
            height: 64
        })
    ));
    assert_eq!(pass.target().width(), 32);

    let mut timer = GameTimer::new();
    timer.tick(1.0 / 30.0);
    let mut stream = ctx.begin_commands("Test Blur Pass");
    pass.execute(&ctx, &frame, &mut stream, &timer).unwrap();
    let _ = ctx.submit(stream);

    // Blurring a uniform clear leaves it uniform
    for texel in read_rgba8(&ctx, pass.target()) {
        assert_eq!(texel[0], 0);
        assert_eq!(texel[1], 0);
        assert!(texel[2] >= 254, "blue channel {}", texel[2]);
    }

    let mut frames = FrameLoop::new(
        Arc::clone(&ctx),
        &FrameConfig::default(),
        &FrameResourceCounts::default(),
        32,
        32,
    )
    .unwrap();
    frames.add_pass(Box::new(pass)).unwrap();
    assert!(matches!(
        frames.resize(64, 0),
        Err(WaveError::InvalidDimensions { .. })
    ));
    frames.resize(48, 40).unwrap();
    timer.tick(1.0 / 30.0);
    let _ = frames.run_frame(&timer).unwrap();
    frames.wait_idle().unwrap();
}
