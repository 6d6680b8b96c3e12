use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use wave_sim_core::{DemoConfig, GameTimer, RandomDisturber, Result, WaveError, WaveField};

/// Which demo to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// CPU wave field only
    Cpu,
    /// GPU wave simulator driven by the frame loop
    Gpu,
    /// Offscreen clear plus compute blur
    Blur,
    /// Compute-add readback
    VecAdd,
    /// Everything, in order
    All,
}

/// Headless wave simulation demos with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "wave-sim-demo")]
#[command(about = "Headless wave, blur and compute-readback demos", long_about = None)]
struct Args {
    /// JSON configuration file (missing fields fall back to the presets)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to simulate
    #[arg(short, long, default_value_t = 300)]
    frames: u32,

    /// Fixed frame time in seconds
    #[arg(long, default_value_t = 1.0 / 60.0)]
    dt: f32,

    /// Demo to run
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Output file of the compute-add demo
    #[arg(short, long, default_value = "results.txt")]
    output: PathBuf,

    /// Override the disturbance seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Report interval in frames
    #[arg(short, long, default_value_t = 30)]
    report_interval: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!(error = %e, "demo failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => DemoConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.frame.seed = seed;
    }
    config.validate()?;
    if args.report_interval == 0 {
        return Err(WaveError::invalid_parameter(
            "report_interval",
            "must be at least 1",
        ));
    }

    println!("=== Wave Simulation Demo ===\n");
    let all = args.mode == Mode::All;
    if all || args.mode == Mode::Cpu {
        run_cpu(args, &config)?;
    }
    if all || args.mode == Mode::Gpu {
        gpu_demos::run_waves(args, &config)?;
    }
    if all || args.mode == Mode::Blur {
        gpu_demos::run_blur(args, &config)?;
    }
    if all || args.mode == Mode::VecAdd {
        gpu_demos::run_vec_add(args, &config)?;
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<DemoConfig> {
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text).map_err(|e| {
        WaveError::invalid_parameter("config", format!("{}: {e}", path.display()))
    })?;
    info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn run_cpu(args: &Args, config: &DemoConfig) -> Result<()> {
    let mut field = WaveField::from_config(&config.cpu_waves)?;
    let mut disturber = RandomDisturber::new(
        config.frame.disturb_interval,
        config.frame.disturb_magnitude(),
        config.frame.seed,
    )?;
    let mut timer = GameTimer::new();

    println!(
        "CPU waves: {}x{} grid, dx {:.2}, dt {:.3}s",
        field.rows(),
        field.cols(),
        field.spatial_step(),
        field.time_step()
    );
    println!("  Frame | Time(s) | Steps | Disturbs | Max amplitude");
    println!("--------|---------|-------|----------|--------------");

    let mut steps = 0;
    let mut disturbs = 0;
    for frame in 1..=args.frames {
        timer.tick(args.dt);
        if let Some(d) = disturber.poll(timer.total_time(), field.rows(), field.cols()) {
            field.disturb(d.row, d.col, d.magnitude)?;
            disturbs += 1;
        }
        steps += field.update(timer.delta_time());

        if frame % args.report_interval == 0 {
            println!(
                "{:7} | {:7.2} | {:5} | {:8} | {:13.4}",
                frame,
                timer.total_time(),
                steps,
                disturbs,
                field.max_amplitude()
            );
        }
    }
    println!();
    Ok(())
}

#[cfg(feature = "gpu")]
mod gpu_demos {
    use std::sync::Arc;

    use wave_sim_core::gpu::{FrameResourceCounts, VEC_ADD_ELEMENTS};
    use wave_sim_core::{
        create_gpu_context_blocking, BlurPass, CpuWavesPass, DemoConfig, Fence, FrameLoop,
        GameTimer, GpuContext, GpuWavesPass, Result, VecAddDemo,
    };

    use super::Args;

    fn context() -> Result<Arc<GpuContext>> {
        let ctx = create_gpu_context_blocking()?;
        println!("GPU adapter: {}", ctx.adapter_name());
        Ok(ctx)
    }

    fn drive(args: &Args, frames: &mut FrameLoop, ctx: &GpuContext) -> Result<()> {
        println!("  Frame | Time(s) | Fence | Completed | Ahead");
        println!("--------|---------|-------|-----------|------");

        let mut timer = GameTimer::new();
        for frame in 1..=args.frames {
            timer.tick(args.dt);
            let token = frames.run_frame(&timer)?;
            if frame % args.report_interval == 0 {
                let completed = ctx.fence().completed_value();
                println!(
                    "{:7} | {:7.2} | {:5} | {:9} | {:5}",
                    frame,
                    timer.total_time(),
                    token.value(),
                    completed,
                    token.value().saturating_sub(completed)
                );
            }
        }
        frames.wait_idle()?;
        println!("State transitions recorded: {}\n", ctx.transition_count());
        Ok(())
    }

    pub(super) fn run_waves(args: &Args, config: &DemoConfig) -> Result<()> {
        let ctx = context()?;
        let cpu = &config.cpu_waves;
        let gpu = &config.gpu_waves;
        println!(
            "Land and waves: CPU {}x{}, GPU {}x{}, {} frame resources",
            cpu.rows, cpu.cols, gpu.rows, gpu.cols, config.frame.frame_count
        );

        let counts = FrameResourceCounts {
            object_count: 2,
            wave_vertex_count: Some((cpu.rows * cpu.cols) as usize),
            ..FrameResourceCounts::default()
        };
        let mut frames = FrameLoop::new(
            Arc::clone(&ctx),
            &config.frame,
            &counts,
            config.width,
            config.height,
        )?;
        frames.add_pass(Box::new(CpuWavesPass::new(cpu, &config.frame)?))?;
        frames.add_pass(Box::new(GpuWavesPass::new(
            Arc::clone(&ctx),
            gpu,
            &config.frame,
            1,
        )?))?;
        drive(args, &mut frames, &ctx)
    }

    pub(super) fn run_blur(args: &Args, config: &DemoConfig) -> Result<()> {
        let ctx = context()?;
        println!(
            "Blur: {}x{} target, sigma {:.2}, {} iterations per frame",
            config.width, config.height, config.blur.sigma, config.blur.blur_count
        );

        let mut frames = FrameLoop::new(
            Arc::clone(&ctx),
            &config.frame,
            &FrameResourceCounts::default(),
            config.width,
            config.height,
        )?;
        frames.add_pass(Box::new(BlurPass::new(
            Arc::clone(&ctx),
            &config.blur,
            config.width,
            config.height,
        )?))?;
        drive(args, &mut frames, &ctx)
    }

    pub(super) fn run_vec_add(args: &Args, config: &DemoConfig) -> Result<()> {
        let ctx = context()?;
        println!("Compute add: {VEC_ADD_ELEMENTS} elements");

        let demo = VecAddDemo::new(ctx, config.frame.fence_timeout())?;
        let token = demo.do_compute_work()?;
        demo.print_output(token, &args.output)?;
        println!("Results written to {}\n", args.output.display());
        Ok(())
    }
}

#[cfg(not(feature = "gpu"))]
mod gpu_demos {
    use wave_sim_core::{DemoConfig, Result};

    use super::Args;

    fn skipped(name: &str) -> Result<()> {
        println!("{name}: skipped (built without the `gpu` feature)\n");
        Ok(())
    }

    pub(super) fn run_waves(_args: &Args, _config: &DemoConfig) -> Result<()> {
        skipped("GPU waves")
    }

    pub(super) fn run_blur(_args: &Args, _config: &DemoConfig) -> Result<()> {
        skipped("Blur")
    }

    pub(super) fn run_vec_add(_args: &Args, _config: &DemoConfig) -> Result<()> {
        skipped("Compute add")
    }
}
