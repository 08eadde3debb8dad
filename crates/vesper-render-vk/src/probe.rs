// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use vesper_render::FrameError;

use crate::error::VkResultExt;
use crate::gpu::Gpu;

/// Snapshot of what the presentation surface supports right now.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query<G: Gpu + ?Sized>(gpu: &G) -> Result<Self, FrameError> {
        // capabilities: image counts, transforms, current extent (u32::MAX when free-size)
        let capabilities = gpu
            .surface_capabilities()
            .or_frame("get_physical_device_surface_capabilities")?;
        let formats = gpu
            .surface_formats()
            .or_frame("get_physical_device_surface_formats")?;
        let present_modes = gpu
            .surface_present_modes()
            .or_frame("get_physical_device_surface_present_modes")?;
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// The extent the surface dictates, if it does not let the swapchain pick.
    pub fn fixed_extent(&self) -> Option<vk::Extent2D> {
        let cur = self.capabilities.current_extent;
        (cur.width != u32::MAX).then_some(cur)
    }
}
