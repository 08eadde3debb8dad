// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use vesper_render::FrameError;

use crate::error::VkResultExt;
use crate::gpu::Gpu;

/// The immutable render-pass/pipeline bundle handed over by the pipeline owner.
#[derive(Clone, Copy, Debug)]
pub struct PipelineHandles {
    pub render_pass: vk::RenderPass,
    /// Format of the render pass's depth attachment.
    pub depth_format: vk::Format,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_stages: vk::ShaderStageFlags,
}

/// Per-frame inputs for one recording.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawState {
    pub clear_color: [f32; 4],
    /// Written at offset 0; empty means no push.
    pub push_constants: Vec<u8>,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// Supplies the dynamic part of each frame.
pub trait Scene {
    fn prepare(&mut self, image_index: usize, extent: vk::Extent2D) -> DrawState;
}

/// One primary command buffer per swapchain image, re-recorded every frame.
pub struct CommandRecorder<G: Gpu> {
    gpu: Arc<G>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl<G: Gpu> CommandRecorder<G> {
    pub fn new(gpu: Arc<G>) -> Result<Self, FrameError> {
        let pool = gpu.create_command_pool().or_frame("create_command_pool")?;
        Ok(Self {
            gpu,
            pool,
            buffers: Vec::new(),
        })
    }

    /// Replaces the current buffers with `count` fresh ones.
    pub fn allocate(&mut self, count: usize) -> Result<(), FrameError> {
        self.release();
        self.buffers = self
            .gpu
            .allocate_command_buffers(self.pool, count as u32)
            .or_frame("allocate_command_buffers")?;
        Ok(())
    }

    /// The device must not be executing any of them.
    pub fn release(&mut self) {
        if !self.buffers.is_empty() {
            self.gpu.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Re-records image `image_index`'s buffer from scratch. No diffing.
    pub fn record(
        &self,
        image_index: usize,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: &PipelineHandles,
        draw: &DrawState,
    ) -> Result<vk::CommandBuffer, FrameError> {
        let cmd = self.buffers[image_index];
        let gpu = &*self.gpu;
        gpu.begin_commands(cmd).or_frame("begin_command_buffer")?;
        gpu.cmd_begin_render_pass(cmd, pipeline.render_pass, framebuffer, extent, draw.clear_color);
        gpu.cmd_bind_pipeline(cmd, pipeline.pipeline);
        gpu.cmd_set_viewport_scissor(cmd, extent);
        if !draw.push_constants.is_empty() {
            gpu.cmd_push_constants(
                cmd,
                pipeline.layout,
                pipeline.push_stages,
                &draw.push_constants,
            );
        }
        if draw.vertex_count > 0 {
            gpu.cmd_draw(cmd, draw.vertex_count, draw.instance_count.max(1));
        }
        gpu.cmd_end_render_pass(cmd);
        gpu.end_commands(cmd).or_frame("end_command_buffer")?;
        Ok(cmd)
    }
}

impl<G: Gpu> Drop for CommandRecorder<G> {
    fn drop(&mut self) {
        self.release();
        self.gpu.destroy_command_pool(self.pool);
    }
}
