// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and everything derived from its images.
use std::sync::Arc;

use ash::vk::{self, Handle};
use tracing::{debug, info};
use vesper_render::{FrameError, PresentModePref, RenderSize, SurfaceFormatPref};

use crate::error::VkResultExt;
use crate::gpu::{Gpu, SwapchainRequest};
use crate::probe::SurfaceSupport;

/// 8-bit sRGB when asked for and offered, else the UNORM twin, else whatever comes first.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    pref: SurfaceFormatPref,
) -> Result<vk::SurfaceFormatKHR, FrameError> {
    let wanted: &[vk::Format] = match pref {
        SurfaceFormatPref::Srgb => &[vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB],
        SurfaceFormatPref::Unorm => &[vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM],
    };
    wanted
        .iter()
        .find_map(|want| {
            formats
                .iter()
                .find(|f| f.format == *want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(FrameError::Unsupported("surface format"))
}

/// The preferred mode when offered; FIFO is the guaranteed fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentModePref,
) -> Result<vk::PresentModeKHR, FrameError> {
    if modes.is_empty() {
        return Err(FrameError::Unsupported("present mode"));
    }
    let want = match pref {
        PresentModePref::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePref::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePref::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    Ok([want, vk::PresentModeKHR::FIFO]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO))
}

/// A fixed surface extent wins; otherwise the window size clamped to the surface limits.
/// A zero window dimension stays zero so callers can see the window is minimised.
pub fn choose_extent(support: &SurfaceSupport, want: RenderSize) -> vk::Extent2D {
    if let Some(fixed) = support.fixed_extent() {
        return fixed;
    }
    let caps = &support.capabilities;
    if want.is_empty() {
        return vk::Extent2D::default();
    }
    vk::Extent2D {
        width: want
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: want
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum. A maximum of 0 means no limit.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|a| caps.supported_composite_alpha.contains(*a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Every choice for one build, made from a single surface snapshot.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pre_transform: vk::SurfaceTransformFlagsKHR,
    composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainPlan {
    /// `format` is the one the render pass was created for; the surface must still offer it.
    pub fn new(
        support: &SurfaceSupport,
        desired: RenderSize,
        format: vk::SurfaceFormatKHR,
        present: PresentModePref,
    ) -> Result<Self, FrameError> {
        if !support.formats.contains(&format) {
            return Err(FrameError::Unsupported("surface format"));
        }
        let caps = &support.capabilities;
        Ok(Self {
            format,
            present_mode: choose_present_mode(&support.present_modes, present)?,
            extent: choose_extent(support, desired),
            image_count: choose_image_count(caps),
            pre_transform: choose_transform(caps),
            composite_alpha: choose_composite_alpha(caps),
        })
    }

    /// Nothing can be presented to a zero-sized surface.
    pub fn is_minimized(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }

    fn request(&self, old_swapchain: vk::SwapchainKHR) -> SwapchainRequest {
        SwapchainRequest {
            min_image_count: self.image_count,
            format: self.format,
            extent: self.extent,
            present_mode: self.present_mode,
            pre_transform: self.pre_transform,
            composite_alpha: self.composite_alpha,
            old_swapchain,
        }
    }
}

/// What every framebuffer is built against.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferLayout {
    pub render_pass: vk::RenderPass,
    /// Attachment 1 of the render pass; colour is attachment 0.
    pub depth_format: vk::Format,
}

/// One depth image shared by every framebuffer of a chain. Sized to the
/// chain's extent, so it is rebuilt with it.
#[derive(Clone, Copy, Debug, Default)]
struct DepthAttachment {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// A built chain. `views[i]` and `framebuffers[i]` belong to `images[i]`.
pub struct Swapchain<G: Gpu> {
    gpu: Arc<G>,
    handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: DepthAttachment,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<G: Gpu> Swapchain<G> {
    /// Any failure part way through releases what was already created.
    pub fn build(
        gpu: Arc<G>,
        plan: &SwapchainPlan,
        layout: &FramebufferLayout,
        old: vk::SwapchainKHR,
    ) -> Result<Self, FrameError> {
        let handle = gpu
            .create_swapchain(&plan.request(old))
            .or_frame("create_swapchain")?;
        let mut chain = Swapchain {
            gpu,
            handle,
            format: plan.format,
            present_mode: plan.present_mode,
            extent: plan.extent,
            images: Vec::new(),
            views: Vec::new(),
            depth: DepthAttachment::default(),
            framebuffers: Vec::new(),
        };
        chain.images = chain
            .gpu
            .swapchain_images(handle)
            .or_frame("get_swapchain_images")?;

        let (image, memory) = chain
            .gpu
            .create_depth_image(layout.depth_format, chain.extent)
            .or_frame("create_depth_image")?;
        chain.depth.image = image;
        chain.depth.memory = memory;
        chain.depth.view = chain
            .gpu
            .create_image_view(image, layout.depth_format, vk::ImageAspectFlags::DEPTH)
            .or_frame("create_image_view")?;

        chain.views.reserve(chain.images.len());
        chain.framebuffers.reserve(chain.images.len());
        for i in 0..chain.images.len() {
            let view = chain
                .gpu
                .create_image_view(
                    chain.images[i],
                    chain.format.format,
                    vk::ImageAspectFlags::COLOR,
                )
                .or_frame("create_image_view")?;
            chain.views.push(view);
            let fb = chain
                .gpu
                .create_framebuffer(layout.render_pass, &[view, chain.depth.view], chain.extent)
                .or_frame("create_framebuffer")?;
            chain.framebuffers.push(fb);
        }
        Ok(chain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.framebuffers[image_index]
    }

    /// Drops framebuffers, then views, then the depth image; the chain
    /// handle stays valid.
    pub fn release_attachments(&mut self) {
        for fb in self.framebuffers.drain(..) {
            self.gpu.destroy_framebuffer(fb);
        }
        for view in self.views.drain(..) {
            self.gpu.destroy_image_view(view);
        }
        let depth = std::mem::take(&mut self.depth);
        if !depth.view.is_null() {
            self.gpu.destroy_image_view(depth.view);
        }
        if !depth.image.is_null() {
            self.gpu.destroy_depth_image(depth.image, depth.memory);
        }
    }

    /// Idempotent. Images are owned by the chain and go with it.
    pub fn destroy(&mut self) {
        self.release_attachments();
        self.images.clear();
        if !self.handle.is_null() {
            self.gpu.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

impl<G: Gpu> Drop for Swapchain<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owns the current chain and rebuilds it in place against a fixed render pass.
pub struct SwapchainManager<G: Gpu> {
    gpu: Arc<G>,
    layout: FramebufferLayout,
    format: vk::SurfaceFormatKHR,
    present: PresentModePref,
    current: Option<Swapchain<G>>,
}

impl<G: Gpu> SwapchainManager<G> {
    pub fn new(
        gpu: Arc<G>,
        layout: FramebufferLayout,
        format: vk::SurfaceFormatKHR,
        present: PresentModePref,
    ) -> Self {
        Self {
            gpu,
            layout,
            format,
            present,
            current: None,
        }
    }

    pub fn plan(
        &self,
        support: &SurfaceSupport,
        desired: RenderSize,
    ) -> Result<SwapchainPlan, FrameError> {
        SwapchainPlan::new(support, desired, self.format, self.present)
    }

    /// The caller guarantees the device is idle. The previous chain is handed
    /// over as a hint and destroyed whether or not the new build succeeds,
    /// since creation retires it either way.
    pub fn rebuild(&mut self, plan: &SwapchainPlan) -> Result<&Swapchain<G>, FrameError> {
        let mut old = self.current.take();
        let old_handle = match old.as_mut() {
            Some(chain) => {
                chain.release_attachments();
                chain.handle()
            }
            None => vk::SwapchainKHR::null(),
        };
        let built = Swapchain::build(self.gpu.clone(), plan, &self.layout, old_handle);
        drop(old);
        let chain = built?;
        info!(
            "swapchain: format={:?}/{:?} present_mode={:?} extent={}x{} images={}",
            chain.format.format,
            chain.format.color_space,
            chain.present_mode,
            chain.extent.width,
            chain.extent.height,
            chain.image_count()
        );
        let chain = self.current.insert(chain);
        Ok(&*chain)
    }

    pub fn current(&self) -> Option<&Swapchain<G>> {
        self.current.as_ref()
    }

    pub fn destroy(&mut self) {
        if self.current.take().is_some() {
            debug!("swapchain destroyed");
        }
    }
}
