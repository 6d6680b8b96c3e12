//! Simulation and frame-loop configuration
//!
//! Plain serde structs with named presets. Binaries load them from JSON and
//! override individual fields from the command line; everything is checked
//! by `validate()` before any simulator is built.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaveError};

/// Edge length of the compute thread group used by the GPU wave kernels.
pub const WAVE_THREAD_GROUP: u32 = 16;

/// Physical and grid parameters of a wave simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Vertex rows
    pub rows: u32,
    /// Vertex columns
    pub cols: u32,
    /// Distance between neighbouring vertices
    pub spatial_step: f32,
    /// Fixed integration step in seconds
    pub time_step: f32,
    /// Wave propagation speed
    pub speed: f32,
    /// Damping factor
    pub damping: f32,
}

impl WaveConfig {
    /// CPU "land and waves" demo: 128×128, dx 1.0, dt 0.03, speed 4, damping 0.2.
    #[must_use]
    pub const fn land_and_waves() -> Self {
        Self {
            rows: 128,
            cols: 128,
            spatial_step: 1.0,
            time_step: 0.03,
            speed: 4.0,
            damping: 0.2,
        }
    }

    /// GPU waves demo: 256×256, dx 0.25, dt 0.03, speed 2, damping 0.2.
    #[must_use]
    pub const fn gpu_waves() -> Self {
        Self {
            rows: 256,
            cols: 256,
            spatial_step: 0.25,
            time_step: 0.03,
            speed: 2.0,
            damping: 0.2,
        }
    }

    /// Check ranges shared by both integrators.
    ///
    /// # Errors
    /// `InvalidGridSize` or `InvalidParameter`.
    pub fn validate(&self) -> Result<()> {
        let min = crate::waves::MIN_GRID_EXTENT;
        if (self.rows as usize) < min || (self.cols as usize) < min {
            return Err(WaveError::InvalidGridSize {
                rows: self.rows as usize,
                cols: self.cols as usize,
                min,
            });
        }
        positive("spatial_step", self.spatial_step)?;
        positive("time_step", self.time_step)?;
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(WaveError::invalid_parameter(
                "speed",
                format!("must be finite and non-negative, got {}", self.speed),
            ));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(WaveError::invalid_parameter(
                "damping",
                format!("must be finite and non-negative, got {}", self.damping),
            ));
        }
        Ok(())
    }

    /// Additional check for the GPU simulator: both extents must tile the
    /// 16×16 thread group.
    ///
    /// # Errors
    /// `GridNotDivisible`.
    pub fn validate_gpu(&self) -> Result<()> {
        self.validate()?;
        if self.rows % WAVE_THREAD_GROUP != 0 || self.cols % WAVE_THREAD_GROUP != 0 {
            return Err(WaveError::GridNotDivisible {
                rows: self.rows,
                cols: self.cols,
                group: WAVE_THREAD_GROUP,
            });
        }
        Ok(())
    }
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self::land_and_waves()
    }
}

/// Separable blur settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    /// Gaussian standard deviation in texels
    pub sigma: f32,
    /// Horizontal+vertical iterations per frame
    pub blur_count: u32,
}

impl BlurConfig {
    /// Check that sigma yields a kernel the blur shader can encode.
    ///
    /// # Errors
    /// `InvalidParameter` or `BlurRadiusTooLarge`.
    pub fn validate(&self) -> Result<()> {
        crate::blur::gauss_weights(self.sigma).map(|_| ())
    }
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            sigma: 2.5,
            blur_count: 4,
        }
    }
}

/// Frame-loop and driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Slots in the frame-resource ring
    pub frame_count: usize,
    /// Bound on any single fence wait, in milliseconds
    pub fence_timeout_ms: u64,
    /// Seconds between randomized disturbances
    pub disturb_interval: f32,
    /// Smallest random disturbance
    pub disturb_min: f32,
    /// Largest random disturbance
    pub disturb_max: f32,
    /// Seed of the disturbance RNG
    pub seed: u64,
}

impl FrameConfig {
    /// Fence timeout as a [`Duration`].
    #[must_use]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Magnitude range of randomized disturbances.
    #[must_use]
    pub fn disturb_magnitude(&self) -> RangeInclusive<f32> {
        self.disturb_min..=self.disturb_max
    }

    /// Check ring depth, timeout and disturbance settings.
    ///
    /// # Errors
    /// `InvalidRingSize` or `InvalidParameter`.
    pub fn validate(&self) -> Result<()> {
        if self.frame_count < 2 {
            return Err(WaveError::InvalidRingSize(self.frame_count));
        }
        if self.fence_timeout_ms == 0 {
            return Err(WaveError::invalid_parameter(
                "fence_timeout_ms",
                "must be at least 1",
            ));
        }
        positive("disturb_interval", self.disturb_interval)?;
        if self.disturb_min > self.disturb_max {
            return Err(WaveError::invalid_parameter(
                "disturb_min",
                format!(
                    "{} is larger than disturb_max {}",
                    self.disturb_min, self.disturb_max
                ),
            ));
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            fence_timeout_ms: 2000,
            disturb_interval: 0.25,
            disturb_min: 0.2,
            disturb_max: 0.5,
            seed: 0x5eed,
        }
    }
}

/// Everything a demo run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// CPU wave field
    pub cpu_waves: WaveConfig,
    /// GPU wave simulator
    pub gpu_waves: WaveConfig,
    /// Blur filter
    pub blur: BlurConfig,
    /// Frame loop
    pub frame: FrameConfig,
    /// Offscreen target width
    pub width: u32,
    /// Offscreen target height
    pub height: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            cpu_waves: WaveConfig::land_and_waves(),
            gpu_waves: WaveConfig::gpu_waves(),
            blur: BlurConfig::default(),
            frame: FrameConfig::default(),
            width: 800,
            height: 600,
        }
    }
}

impl DemoConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// The first section error found.
    pub fn validate(&self) -> Result<()> {
        self.cpu_waves.validate()?;
        self.gpu_waves.validate_gpu()?;
        self.blur.validate()?;
        self.frame.validate()?;
        if self.width == 0 || self.height == 0 {
            return Err(WaveError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(WaveError::invalid_parameter(
            name,
            format!("must be positive, got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        WaveConfig::land_and_waves().validate().unwrap();
        WaveConfig::gpu_waves().validate_gpu().unwrap();
        DemoConfig::default().validate().unwrap();
    }

    #[test]
    fn test_gpu_grid_must_tile_thread_group() {
        let mut config = WaveConfig::gpu_waves();
        config.rows = 100;
        config.cols = 100;
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.validate_gpu(),
            Err(WaveError::GridNotDivisible { group: 16, .. })
        ));

        // 8×32 has 256 cells but rows do not tile the group
        config.rows = 8;
        config.cols = 32;
        assert!(config.validate_gpu().is_err());
    }

    #[test]
    fn test_frame_config_checks() {
        let mut frame = FrameConfig::default();
        frame.frame_count = 1;
        assert!(matches!(frame.validate(), Err(WaveError::InvalidRingSize(1))));

        let mut frame = FrameConfig::default();
        frame.disturb_min = 0.9;
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_blur_sigma_limit() {
        assert!(BlurConfig::default().validate().is_ok());
        let wide = BlurConfig {
            sigma: 3.0,
            blur_count: 1,
        };
        assert!(matches!(
            wide.validate(),
            Err(WaveError::BlurRadiusTooLarge { radius: 6, max: 5 })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DemoConfig =
            serde_json::from_str(r#"{ "blur": { "sigma": 1.5 }, "frame": { "frame_count": 2 } }"#)
                .unwrap();
        assert_eq!(config.blur.sigma, 1.5);
        assert_eq!(config.blur.blur_count, 4);
        assert_eq!(config.frame.frame_count, 2);
        assert_eq!(config.gpu_waves, WaveConfig::gpu_waves());
    }
}
