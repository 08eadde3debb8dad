// SPDX-License-Identifier: CEPL-1.0
//! In-memory device for unit tests. Handles are counters, fences and
//! semaphores carry state, and misuse the validation layer would flag panics.
//! Submitted work completes the moment the CPU waits on its fence.
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::gpu::{Gpu, Submission, SwapchainRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    Image,
    Memory,
    ImageView,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateSwapchain { old: vk::SwapchainKHR },
    DestroySwapchain(vk::SwapchainKHR),
    WaitFences(Vec<vk::Fence>),
    ResetFence(vk::Fence),
    Acquire { image: Option<u32> },
    Record { command_buffer: vk::CommandBuffer, framebuffer: vk::Framebuffer },
    Submit { command_buffer: vk::CommandBuffer, fence: vk::Fence },
    Present { image: u32 },
    DeviceWaitIdle,
}

#[derive(Clone, Copy, Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

struct Work {
    command_buffer: u64,
    framebuffer: u64,
}

struct MockState {
    next: u64,
    live: HashMap<u64, Kind>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    pool_of: HashMap<u64, u64>,
    recorded_fb: HashMap<u64, u64>,
    in_flight: HashMap<u64, Work>,
    max_pending: usize,
    images: HashMap<u64, Vec<u64>>,
    cursor: HashMap<u64, usize>,
    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    submit_script: VecDeque<vk::Result>,
    fail_views_after: Option<usize>,
    fail_depth: bool,
    fail_records: usize,
    hung: bool,
    last_request: Option<SwapchainRequest>,
    last_depth: Option<(vk::Format, vk::Extent2D)>,
    calls: Vec<Call>,
}

impl MockState {
    fn mint(&mut self, kind: Kind) -> u64 {
        self.next += 1;
        self.live.insert(self.next, kind);
        self.next
    }

    fn release(&mut self, raw: u64, kind: Kind) {
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => panic!("destroyed {k:?} {raw:#x} as {kind:?}"),
            None => panic!("{kind:?} {raw:#x} destroyed twice or never created"),
        }
    }

    fn complete(&mut self, fence: u64) {
        if let Some(state) = self.fences.get_mut(&fence) {
            state.pending = false;
            state.signaled = true;
        }
        self.in_flight.remove(&fence);
    }

    fn pending(&self) -> usize {
        self.fences.values().filter(|f| f.pending).count()
    }
}

pub struct MockGpu {
    state: Mutex<MockState>,
}

impl MockGpu {
    pub fn new() -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        MockGpu {
            state: Mutex::new(MockState {
                next: 0x1000,
                live: HashMap::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                pool_of: HashMap::new(),
                recorded_fb: HashMap::new(),
                in_flight: HashMap::new(),
                max_pending: 0,
                images: HashMap::new(),
                cursor: HashMap::new(),
                caps,
                formats,
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submit_script: VecDeque::new(),
                fail_views_after: None,
                fail_depth: false,
                fail_records: 0,
                hung: false,
                last_request: None,
                last_depth: None,
                calls: Vec::new(),
            }),
        }
    }

    fn st(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.st().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.st().formats = formats;
    }

    /// Results returned by the next acquires, in order. `SUCCESS` means normal.
    pub fn script_acquire(&self, results: &[vk::Result]) {
        self.st().acquire_script.extend(results.iter().copied());
    }

    pub fn script_present(&self, results: &[vk::Result]) {
        self.st().present_script.extend(results.iter().copied());
    }

    pub fn script_submit(&self, results: &[vk::Result]) {
        self.st().submit_script.extend(results.iter().copied());
    }

    /// Lets `n` more image views be created, then fails with host OOM.
    pub fn fail_views_after(&self, n: usize) {
        self.st().fail_views_after = Some(n);
    }

    /// The next depth image allocation fails with device OOM.
    pub fn fail_next_depth_image(&self) {
        self.st().fail_depth = true;
    }

    pub fn last_depth(&self) -> Option<(vk::Format, vk::Extent2D)> {
        self.st().last_depth
    }

    pub fn fail_next_records(&self, n: usize) {
        self.st().fail_records = n;
    }

    /// Pending fences never complete; waits on them time out.
    pub fn hang(&self) {
        self.st().hung = true;
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.st().live.values().filter(|k| **k == kind).count()
    }

    pub fn total_live(&self) -> usize {
        self.st().live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.st().live.contains_key(&handle.as_raw())
    }

    pub fn max_pending(&self) -> usize {
        self.st().max_pending
    }

    pub fn pending(&self) -> usize {
        self.st().pending()
    }

    pub fn last_request(&self) -> Option<SwapchainRequest> {
        self.st().last_request
    }

    pub fn calls(&self) -> Vec<Call> {
        self.st().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.st().calls.clear();
    }

    pub fn presented(&self) -> Vec<u32> {
        self.st()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Present { image } => Some(*image),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.st().calls.iter().filter(|c| pred(c)).count()
    }
}

impl Gpu for MockGpu {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.st().caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.st().formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.st().present_modes.clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        let mut st = self.st();
        let old = request.old_swapchain;
        assert!(
            old.is_null() || st.live.contains_key(&old.as_raw()),
            "old_swapchain {old:?} is not a live chain"
        );
        assert!(
            request.extent.width > 0 && request.extent.height > 0,
            "swapchain requested with zero extent"
        );
        st.calls.push(Call::CreateSwapchain { old });
        st.last_request = Some(*request);
        let raw = st.mint(Kind::Swapchain);
        let images = (0..request.min_image_count)
            .map(|i| 0xA000_0000 + raw * 16 + u64::from(i))
            .collect();
        st.images.insert(raw, images);
        st.cursor.insert(raw, 0);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let st = self.st();
        let images = st
            .images
            .get(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        Ok(images.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut st = self.st();
        st.release(swapchain.as_raw(), Kind::Swapchain);
        st.images.remove(&swapchain.as_raw());
        st.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn create_depth_image(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let mut st = self.st();
        assert!(extent.width > 0 && extent.height > 0, "zero-sized depth image");
        if std::mem::take(&mut st.fail_depth) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        st.last_depth = Some((format, extent));
        let image = vk::Image::from_raw(st.mint(Kind::Image));
        let memory = vk::DeviceMemory::from_raw(st.mint(Kind::Memory));
        Ok((image, memory))
    }

    fn destroy_depth_image(&self, image: vk::Image, memory: vk::DeviceMemory) {
        let mut st = self.st();
        st.release(image.as_raw(), Kind::Image);
        st.release(memory.as_raw(), Kind::Memory);
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut st = self.st();
        if let Some(left) = st.fail_views_after.as_mut() {
            if *left == 0 {
                return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            *left -= 1;
        }
        Ok(vk::ImageView::from_raw(st.mint(Kind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.st().release(view.as_raw(), Kind::ImageView);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut st = self.st();
        for view in attachments {
            assert!(st.live.contains_key(&view.as_raw()), "framebuffer over a dead view");
        }
        Ok(vk::Framebuffer::from_raw(st.mint(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut st = self.st();
        let raw = framebuffer.as_raw();
        assert!(
            !st.in_flight.values().any(|w| w.framebuffer == raw),
            "framebuffer {raw:#x} destroyed while in flight"
        );
        st.release(raw, Kind::Framebuffer);
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.st().mint(Kind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut st = self.st();
        let raw = pool.as_raw();
        let owned: Vec<u64> = st
            .pool_of
            .iter()
            .filter(|(_, p)| **p == raw)
            .map(|(b, _)| *b)
            .collect();
        for buffer in owned {
            st.pool_of.remove(&buffer);
            st.live.remove(&buffer);
        }
        st.release(raw, Kind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut st = self.st();
        assert!(st.live.contains_key(&pool.as_raw()), "allocating from a dead pool");
        Ok((0..count)
            .map(|_| {
                let raw = st.mint(Kind::CommandBuffer);
                st.pool_of.insert(raw, pool.as_raw());
                vk::CommandBuffer::from_raw(raw)
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut st = self.st();
        for cmd in buffers {
            let raw = cmd.as_raw();
            assert!(
                !st.in_flight.values().any(|w| w.command_buffer == raw),
                "command buffer {raw:#x} freed while in flight"
            );
            st.pool_of.remove(&raw);
            st.release(raw, Kind::CommandBuffer);
        }
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut st = self.st();
        let raw = cmd.as_raw();
        assert!(
            !st.in_flight.values().any(|w| w.command_buffer == raw),
            "command buffer {raw:#x} re-recorded while in flight"
        );
        if st.fail_records > 0 {
            st.fail_records -= 1;
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear: [f32; 4],
    ) {
        let mut st = self.st();
        st.recorded_fb.insert(cmd.as_raw(), framebuffer.as_raw());
        st.calls.push(Call::Record {
            command_buffer: cmd,
            framebuffer,
        });
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {}

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _bytes: &[u8],
    ) {
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32) {}

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn end_commands(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut st = self.st();
        let raw = st.mint(Kind::Semaphore);
        st.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut st = self.st();
        st.release(semaphore.as_raw(), Kind::Semaphore);
        st.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut st = self.st();
        let raw = st.mint(Kind::Fence);
        st.fences.insert(
            raw,
            FenceState {
                signaled,
                pending: false,
            },
        );
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut st = self.st();
        let raw = fence.as_raw();
        let state = st.fences.remove(&raw).unwrap_or_default();
        assert!(!state.pending, "fence {raw:#x} destroyed while in flight");
        st.release(raw, Kind::Fence);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> VkResult<()> {
        let mut st = self.st();
        st.calls.push(Call::WaitFences(fences.to_vec()));
        for fence in fences {
            let raw = fence.as_raw();
            let state = *st
                .fences
                .get(&raw)
                .unwrap_or_else(|| panic!("waiting on dead fence {raw:#x}"));
            if state.signaled {
                continue;
            }
            assert!(state.pending, "waiting on fence {raw:#x} that was never submitted");
            if st.hung {
                return Err(vk::Result::TIMEOUT);
            }
            st.complete(raw);
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut st = self.st();
        let raw = fence.as_raw();
        st.calls.push(Call::ResetFence(fence));
        let state = st
            .fences
            .get_mut(&raw)
            .unwrap_or_else(|| panic!("resetting dead fence {raw:#x}"));
        assert!(!state.pending, "fence {raw:#x} reset while in flight");
        state.signaled = false;
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut st = self.st();
        let raw = swapchain.as_raw();
        assert!(st.live.contains_key(&raw), "acquire on a dead swapchain");
        let result = st.acquire_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        let suboptimal = match result {
            vk::Result::SUCCESS => false,
            vk::Result::SUBOPTIMAL_KHR => true,
            failure => {
                st.calls.push(Call::Acquire { image: None });
                return Err(failure);
            }
        };
        let sem = signal.as_raw();
        match st.semaphores.get_mut(&sem) {
            Some(signaled) => {
                assert!(!*signaled, "acquire signals semaphore {sem:#x} that is already signalled");
                *signaled = true;
            }
            None => panic!("acquire with dead semaphore {sem:#x}"),
        }
        let count = st.images.get(&raw).map_or(0, Vec::len);
        let cursor = st.cursor.entry(raw).or_insert(0);
        let index = *cursor as u32;
        *cursor = (*cursor + 1) % count.max(1);
        st.calls.push(Call::Acquire { image: Some(index) });
        Ok((index, suboptimal))
    }

    fn submit(&self, submission: &Submission) -> VkResult<()> {
        let mut st = self.st();
        if let Some(code) = st.submit_script.pop_front() {
            if code != vk::Result::SUCCESS {
                return Err(code);
            }
        }
        let wait = submission.wait.as_raw();
        match st.semaphores.get_mut(&wait) {
            Some(signaled) => {
                assert!(*signaled, "submit waits on semaphore {wait:#x} that will never signal");
                *signaled = false;
            }
            None => panic!("submit waits on dead semaphore {wait:#x}"),
        }
        let signal = submission.signal.as_raw();
        match st.semaphores.get_mut(&signal) {
            Some(signaled) => {
                assert!(
                    !*signaled,
                    "submit signals semaphore {signal:#x} that is already signalled"
                );
                *signaled = true;
            }
            None => panic!("submit signals dead semaphore {signal:#x}"),
        }
        let fence = submission.fence.as_raw();
        match st.fences.get_mut(&fence) {
            Some(state) => {
                assert!(
                    !state.signaled && !state.pending,
                    "submitted with fence {fence:#x} that was not reset"
                );
                state.pending = true;
            }
            None => panic!("submit with dead fence {fence:#x}"),
        }
        let cmd = submission.command_buffer.as_raw();
        let framebuffer = st.recorded_fb.get(&cmd).copied().unwrap_or(0);
        st.in_flight.insert(
            fence,
            Work {
                command_buffer: cmd,
                framebuffer,
            },
        );
        let pending = st.pending();
        st.max_pending = st.max_pending.max(pending);
        st.calls.push(Call::Submit {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
        });
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut st = self.st();
        assert!(st.live.contains_key(&swapchain.as_raw()), "present on a dead swapchain");
        let sem = wait.as_raw();
        match st.semaphores.get_mut(&sem) {
            Some(signaled) => {
                assert!(*signaled, "present waits on semaphore {sem:#x} that will never signal");
                *signaled = false;
            }
            None => panic!("present waits on dead semaphore {sem:#x}"),
        }
        st.calls.push(Call::Present { image: image_index });
        match st.present_script.pop_front().unwrap_or(vk::Result::SUCCESS) {
            vk::Result::SUCCESS => Ok(false),
            vk::Result::SUBOPTIMAL_KHR => Ok(true),
            failure => Err(failure),
        }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut st = self.st();
        st.calls.push(Call::DeviceWaitIdle);
        let pending: Vec<u64> = st.in_flight.keys().copied().collect();
        for fence in pending {
            st.complete(fence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_destroy_is_caught() {
        let gpu = MockGpu::new();
        let sem = gpu.create_semaphore().unwrap();
        gpu.destroy_semaphore(sem);
        let caught = std::panic::catch_unwind(|| gpu.destroy_semaphore(sem));
        assert!(caught.is_err());
    }

    #[test]
    fn unreset_fence_cannot_be_submitted() {
        let gpu = MockGpu::new();
        let sem_a = gpu.create_semaphore().unwrap();
        let sem_b = gpu.create_semaphore().unwrap();
        let fence = gpu.create_fence(true).unwrap();
        let chain = gpu
            .create_swapchain(&SwapchainRequest {
                min_image_count: 2,
                format: vk::SurfaceFormatKHR::default(),
                extent: vk::Extent2D { width: 4, height: 4 },
                present_mode: vk::PresentModeKHR::FIFO,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                old_swapchain: vk::SwapchainKHR::null(),
            })
            .unwrap();
        gpu.acquire_next_image(chain, 0, sem_a).unwrap();
        let caught = std::panic::catch_unwind(|| {
            gpu.submit(&Submission {
                command_buffer: vk::CommandBuffer::null(),
                wait: sem_a,
                signal: sem_b,
                fence,
            })
        });
        assert!(caught.is_err());
    }
}
