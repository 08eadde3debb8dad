// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use ash::vk;

use crate::pipeline::PulsePush;
use crate::recorder::{DrawState, Scene};

/// Spinning, breathing triangle. Every frame differs, so every frame is re-recorded.
pub struct PulseScene {
    started: Instant,
    pub clear: [f32; 4],
}

impl PulseScene {
    pub fn new(clear: [f32; 4]) -> Self {
        Self {
            started: Instant::now(),
            clear,
        }
    }

    pub fn push_at(seconds: f32, extent: vk::Extent2D) -> PulsePush {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let pulse = 0.75 + 0.25 * (seconds * 2.0).sin();
        PulsePush {
            tint: [pulse, pulse, pulse, 1.0],
            angle: seconds * 0.8,
            aspect,
            _pad: [0.0; 2],
        }
    }
}

impl Scene for PulseScene {
    fn prepare(&mut self, _image_index: usize, extent: vk::Extent2D) -> DrawState {
        let push = Self::push_at(self.started.elapsed().as_secs_f32(), extent);
        DrawState {
            clear_color: self.clear,
            push_constants: bytemuck::bytes_of(&push).to_vec(),
            vertex_count: 3,
            instance_count: 1,
        }
    }
}
