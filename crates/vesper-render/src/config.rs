// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::time::Duration;

/// Startup configuration for the frame loop. Passed by value into the
/// scheduler; nothing here is global.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    pub max_frames_in_flight: usize,
    pub present_mode: PresentModePref,
    pub surface_format: SurfaceFormatPref,
    /// Upper bound for every blocking GPU wait. Exceeding it is fatal.
    pub gpu_timeout_ms: u64,
    pub clear_color: [f32; 4],
    pub validation: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePref {
    /// Low-latency triple buffering when the surface offers it.
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormatPref {
    /// 8 bits per channel, sRGB encoded.
    #[default]
    Srgb,
    Unorm,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            max_frames_in_flight: 2,
            present_mode: PresentModePref::Mailbox,
            surface_format: SurfaceFormatPref::Srgb,
            gpu_timeout_ms: 5_000,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

impl FrameConfig {
    /// Frame-slot count, never below one.
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.max(1)
    }

    pub fn gpu_timeout(&self) -> Duration {
        Duration::from_millis(self.gpu_timeout_ms)
    }
}
