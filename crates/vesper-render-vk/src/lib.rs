// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: swapchain lifecycle and frame pacing on top of ash.
use std::sync::Arc;

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;
use vesper_render::{FrameConfig, FrameError, FrameLoop, FrameOutcome, RenderSize};

mod bootstrap;
mod error;
mod gpu;
mod pipeline;
mod probe;
mod recorder;
mod scene;
mod scheduler;
mod swapchain;
mod sync;

#[cfg(test)]
mod mock;

pub use bootstrap::{QueueFamilies, VkContext};
pub use gpu::{AshGpu, Gpu, Submission, SwapchainRequest};
pub use pipeline::{PulsePush, TrianglePipeline};
pub use probe::SurfaceSupport;
pub use recorder::{CommandRecorder, DrawState, PipelineHandles, Scene};
pub use scene::PulseScene;
pub use scheduler::FrameScheduler;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    FramebufferLayout, Swapchain, SwapchainManager, SwapchainPlan,
};
pub use sync::{FrameSlot, FrameSynchronizer, ImageInFlightTracker};

// Field order is drop order: frame resources, then the pipeline, then the device.
pub struct VkRenderer {
    scene: PulseScene,
    scheduler: FrameScheduler<AshGpu>,
    _pipeline: TrianglePipeline,
    _context: VkContext,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: FrameConfig,
) -> Result<VkRenderer> {
    let context = VkContext::new(window, display, config.validation)?;
    let gpu = Arc::new(AshGpu::new(&context));

    // The render pass fixes the colour format for every later rebuild.
    let support = SurfaceSupport::query(&*gpu).context("initial surface query")?;
    let format = choose_surface_format(&support.formats, config.surface_format)?;
    let depth_format = context.depth_format()?;
    let pipeline = TrianglePipeline::new(&context.device, format.format, depth_format)?;

    let scheduler = FrameScheduler::new(gpu, &config, pipeline.handles(), format, size)
        .context("initial swapchain")?;
    Ok(VkRenderer {
        scene: PulseScene::new(config.clear_color),
        scheduler,
        _pipeline: pipeline,
        _context: context,
    })
}

impl FrameLoop for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: FrameConfig,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, config) }
    }

    fn resized(&mut self, size: RenderSize) {
        self.scheduler.notify_resized(size);
    }

    fn tick(&mut self) -> std::result::Result<FrameOutcome, FrameError> {
        self.scheduler.tick(&mut self.scene)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        debug!("clear color -> {:?}", rgba);
        self.scene.clear = rgba;
    }
}
