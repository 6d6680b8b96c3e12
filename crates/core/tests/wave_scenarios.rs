//! End-to-end scenarios that need no GPU: the CPU wave field, the frame ring
//! driven by a simulated consumer, and configuration loading.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use wave_sim_core::{
    CpuFence, DemoConfig, Fence, FenceToken, FrameResourceRing, GameTimer, RandomDisturber,
    SlotState, WaveConfig, WaveError, WaveField,
};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn land_and_waves() -> WaveField {
    WaveField::from_config(&WaveConfig::land_and_waves()).unwrap()
}

#[test]
fn test_single_disturbance_propagates_one_cell_per_step() {
    let mut field = land_and_waves();
    let k = field.coefficients();
    field.disturb(64, 64, 1.0).unwrap();
    assert_eq!(field.update(field.time_step()), 1);

    assert_relative_eq!(field.height(64, 64), k.step(0.0, 1.0, 2.0));
    assert_relative_eq!(field.height(64, 65), k.step(0.0, 0.5, 1.0));
    assert_relative_eq!(field.height(65, 65), k.step(0.0, 0.0, 1.0));
    assert_relative_eq!(field.height(64, 66), k.step(0.0, 0.0, 0.5));

    for row in 0..field.rows() {
        for col in 0..field.cols() {
            let distance = row.abs_diff(64) + col.abs_diff(64);
            if distance > 2 {
                assert_eq!(field.height(row, col), 0.0, "cell ({row}, {col}) moved");
            }
        }
    }
}

#[test]
fn test_ripple_stays_symmetric_and_decays() {
    let mut field = land_and_waves();
    field.disturb(64, 64, 1.0).unwrap();

    let mut peak = Vec::new();
    for _ in 0..200 {
        field.update(field.time_step());
        peak.push(field.max_amplitude());

        for offset in 1..20 {
            let east = field.height(64, 64 + offset);
            let west = field.height(64, 64 - offset);
            let south = field.height(64 + offset, 64);
            assert_relative_eq!(east, west, epsilon = 1e-4, max_relative = 1e-4);
            assert_relative_eq!(east, south, epsilon = 1e-4, max_relative = 1e-4);
        }
    }

    // Damped field settles below its early peak
    let highest = peak.iter().copied().fold(0.0, f32::max);
    assert!(peak.iter().all(|p| p.is_finite()));
    assert!(peak[199] < highest);
}

#[test]
fn test_boundary_never_moves() {
    let mut field = land_and_waves();
    let mut disturber = RandomDisturber::new(0.25, 0.2..=0.5, 7).unwrap();
    let mut timer = GameTimer::new();

    for _ in 0..300 {
        timer.tick(1.0 / 60.0);
        if let Some(d) = disturber.poll(timer.total_time(), field.rows(), field.cols()) {
            field.disturb(d.row, d.col, d.magnitude).unwrap();
        }
        field.update(timer.delta_time());
    }

    let (rows, cols) = (field.rows(), field.cols());
    for i in 0..rows {
        assert_eq!(field.height(i, 0), 0.0);
        assert_eq!(field.height(i, cols - 1), 0.0);
    }
    for j in 0..cols {
        assert_eq!(field.height(0, j), 0.0);
        assert_eq!(field.height(rows - 1, j), 0.0);
    }
}

#[test]
fn test_frame_ring_with_simulated_consumer() {
    const FRAMES: u64 = 60;
    let fence = Arc::new(CpuFence::new());
    let mut ring = FrameResourceRing::new(
        vec![Vec::<u64>::new(); 3],
        Arc::clone(&fence),
        Duration::from_secs(5),
    )
    .unwrap();

    // The consumer retires one value at a time, slower than the producer
    let done = Arc::new(AtomicBool::new(false));
    let consumer = {
        let fence = Arc::clone(&fence);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) || fence.completed_value() < fence.issued_value() {
                let next = fence.completed_value() + 1;
                if next <= fence.issued_value() {
                    thread::sleep(Duration::from_micros(200));
                    fence.complete(FenceToken::new(next));
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    for frame in 1..=FRAMES {
        let slot = ring.current_index();
        let resource = ring.advance().unwrap();
        resource.push(frame);
        let token = fence.signal();
        ring.mark_in_flight(token).unwrap();

        // The CPU is never more than ring depth - 1 frames ahead once it
        // has taken a fresh slot
        assert!(token.value() - fence.completed_value() <= 3);
        assert_ne!(slot, ring.current_index());
    }
    done.store(true, Ordering::Release);
    ring.wait_idle().unwrap();
    consumer.join().unwrap();

    for slot in 0..ring.len() {
        assert_eq!(ring.slot_state(slot), Some(SlotState::Retired));
    }
    assert_eq!(fence.completed_value(), FRAMES);
}

#[test]
fn test_frame_ring_times_out_without_consumer() {
    let fence = Arc::new(CpuFence::new());
    let mut ring =
        FrameResourceRing::new(vec![(); 2], Arc::clone(&fence), Duration::from_millis(20))
            .unwrap();

    for _ in 0..2 {
        ring.advance().unwrap();
        ring.mark_in_flight(fence.signal()).unwrap();
    }
    let err = ring.advance().unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");

    // Once the consumer catches up the ring moves again
    fence.complete_all();
    ring.advance().unwrap();
}

#[test]
fn test_demo_config_from_json() {
    let json = r#"{
        "cpu_waves": { "rows": 64, "cols": 64 },
        "blur": { "sigma": 1.5 },
        "frame": { "frame_count": 2, "seed": 42 }
    }"#;
    let config: DemoConfig = serde_json::from_str(json).unwrap();
    config.validate().unwrap();

    assert_eq!(config.cpu_waves.rows, 64);
    assert_eq!(config.cpu_waves.time_step, WaveConfig::default().time_step);
    assert_eq!(config.blur.blur_count, 4);
    assert_eq!(config.frame.frame_count, 2);
    assert_eq!(config.gpu_waves, WaveConfig::gpu_waves());

    let field = WaveField::from_config(&config.cpu_waves).unwrap();
    assert_eq!(field.vertex_count(), 64 * 64);
}

#[test]
fn test_demo_config_rejections() {
    let mut config = DemoConfig::default();
    config.blur.sigma = 3.0;
    assert!(matches!(
        config.validate(),
        Err(WaveError::BlurRadiusTooLarge { radius: 6, max: 5 })
    ));

    let mut config = DemoConfig::default();
    config.gpu_waves.rows = 100;
    assert!(matches!(
        config.validate(),
        Err(WaveError::GridNotDivisible { .. })
    ));

    let mut config = DemoConfig::default();
    config.frame.frame_count = 1;
    assert!(matches!(
        config.validate(),
        Err(WaveError::InvalidRingSize(1))
    ));
}
