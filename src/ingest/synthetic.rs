use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Label for logs and stats, e.g. `stub://dock-3`.
    pub origin: String,
    /// Target frame rate. Consumers pace themselves with `frame_period`.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation reported with every frame.
    pub rotation_degrees: u16,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            origin: "stub://camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            rotation_degrees: 0,
        }
    }
}

impl SourceConfig {
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1_000 / u64::from(self.target_fps.max(1)))
    }
}

/// Endless source of patterned frames.
///
/// The pattern shifts every frame and the "scene" changes every 50 frames.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "synthetic source needs non-zero dimensions, got {}x{}",
                config.width,
                config.height
            ));
        }
        Ok(Self {
            config,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + u64::from(self.scene_state) * 37;
        (0..pixel_count)
            .map(|i| ((i as u64 + shift) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("frame source connected: {} (synthetic)", self.config.origin);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Some(
            Frame::new(pixels, self.config.width, self.config.height)
                .with_rotation(self.config.rotation_degrees),
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            origin: self.config.origin.clone(),
        }
    }
}
