// SPDX-License-Identifier: CEPL-1.0
//! Per-tick frame state machine.
//!
//! `Idle -> WaitSlot -> Acquire -> RecordAndSubmit -> Present -> Idle`, with
//! `Rebuilding` entered whenever the chain stops matching the surface. Slot
//! objects, the pipeline and the device survive rebuilds; only the chain,
//! its attachments and the command buffers are recreated.
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};
use vesper_render::{FrameConfig, FrameError, FrameOutcome, FrameState, RenderSize, SkipReason};

use crate::error::{translate, VkResultExt};
use crate::gpu::{Gpu, Submission};
use crate::probe::SurfaceSupport;
use crate::recorder::{CommandRecorder, PipelineHandles, Scene};
use crate::swapchain::{FramebufferLayout, SwapchainManager};
use crate::sync::FrameSynchronizer;

enum Rebuild {
    Done,
    Minimized,
}

pub struct FrameScheduler<G: Gpu> {
    gpu: Arc<G>,
    pipeline: PipelineHandles,
    timeout_ns: u64,
    // Dropped in this order, after `Drop::drop` has idled the device.
    swapchain: SwapchainManager<G>,
    recorder: CommandRecorder<G>,
    sync: FrameSynchronizer<G>,
    state: FrameState,
    frame: u64,
    window: RenderSize,
    resize_pending: bool,
    rebuild_pending: bool,
    /// Slot left mid-frame by a failed record or submit.
    abandoned: Option<usize>,
    minimized: bool,
    rebuilds: u64,
}

impl<G: Gpu> FrameScheduler<G> {
    /// `format` is the colour format `pipeline.render_pass` was created for.
    pub fn new(
        gpu: Arc<G>,
        config: &FrameConfig,
        pipeline: PipelineHandles,
        format: vk::SurfaceFormatKHR,
        window: RenderSize,
    ) -> Result<Self, FrameError> {
        let sync = FrameSynchronizer::create_slots(
            gpu.clone(),
            config.frames_in_flight(),
            config.gpu_timeout(),
        )?;
        let recorder = CommandRecorder::new(gpu.clone())?;
        let layout = FramebufferLayout {
            render_pass: pipeline.render_pass,
            depth_format: pipeline.depth_format,
        };
        let swapchain = SwapchainManager::new(gpu.clone(), layout, format, config.present_mode);
        let mut scheduler = FrameScheduler {
            gpu,
            pipeline,
            timeout_ns: u64::try_from(config.gpu_timeout().as_nanos()).unwrap_or(u64::MAX),
            swapchain,
            recorder,
            sync,
            state: FrameState::Rebuilding,
            frame: 0,
            window,
            resize_pending: false,
            rebuild_pending: true,
            abandoned: None,
            minimized: false,
            rebuilds: 0,
        };
        scheduler.rebuild("initial build")?;
        Ok(scheduler)
    }

    /// Window collaborator's resize notification. Consumed at the top of the next tick.
    pub fn notify_resized(&mut self, size: RenderSize) {
        debug!("resize to {}x{} queued", size.width, size.height);
        self.window = size;
        self.resize_pending = true;
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.current().map_or(0, |c| c.image_count())
    }

    pub fn slot_count(&self) -> usize {
        self.sync.slot_count()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// At most one frame: an optional rebuild, then wait, acquire, record,
    /// submit and present.
    pub fn tick(&mut self, scene: &mut dyn Scene) -> Result<FrameOutcome, FrameError> {
        if self.resize_pending || self.rebuild_pending || self.swapchain.current().is_none() {
            let cause = if self.resize_pending {
                "window resized"
            } else if self.abandoned.is_some() {
                "abandoned frame"
            } else {
                "pending rebuild"
            };
            if let Rebuild::Minimized = self.rebuild(cause)? {
                return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
            }
        }

        let slot_index = self.sync.slot_index(self.frame);
        let slot = *self.sync.slot(slot_index);

        self.state = FrameState::WaitSlot;
        self.sync.wait_for_slot(slot_index)?;

        self.state = FrameState::Acquire;
        let Some(chain) = self.swapchain.current() else {
            self.rebuild_pending = true;
            self.state = FrameState::Rebuilding;
            return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
        };
        let handle = chain.handle();
        let extent = chain.extent;
        let (image_index, suboptimal) =
            match self
                .gpu
                .acquire_next_image(handle, self.timeout_ns, slot.image_available)
            {
                Ok(acquired) => acquired,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.rebuild_pending = true;
                    self.rebuild("acquire out of date")?;
                    return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
                }
                Err(e) => return Err(translate("acquire_next_image", e)),
            };
        let image = image_index as usize;
        let framebuffer = chain.framebuffer(image);
        if suboptimal {
            debug!("acquire: swapchain suboptimal, rebuilding next tick");
            self.rebuild_pending = true;
        }

        self.state = FrameState::RecordAndSubmit;
        self.sync.track_image_use(image, slot_index)?;
        let draw = scene.prepare(image, extent);
        let cmd = match self
            .recorder
            .record(image, framebuffer, extent, &self.pipeline, &draw)
        {
            Ok(cmd) => cmd,
            Err(e) => return Err(self.abandon(slot_index, e)),
        };
        if let Err(e) = self.sync.arm_slot(slot_index) {
            return Err(self.abandon(slot_index, e));
        }
        let submitted = self
            .gpu
            .submit(&Submission {
                command_buffer: cmd,
                wait: slot.image_available,
                signal: slot.render_finished,
                fence: slot.in_flight,
            })
            .or_frame("queue_submit");
        if let Err(e) = submitted {
            return Err(self.abandon(slot_index, e));
        }

        self.state = FrameState::Present;
        let presented = self
            .gpu
            .present(handle, image_index, slot.render_finished);
        self.frame += 1;
        let (outcome, stale) = match presented {
            Ok(suboptimal) => (
                FrameOutcome::Presented {
                    image_index,
                    slot: slot_index,
                },
                suboptimal,
            ),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                (FrameOutcome::Skipped(SkipReason::OutOfDate), true)
            }
            Err(e) => return Err(translate("queue_present", e)),
        };
        if stale || self.resize_pending {
            self.rebuild_pending = true;
            self.rebuild(if stale { "present out of date" } else { "window resized" })?;
        }
        self.state = if self.rebuild_pending {
            FrameState::Rebuilding
        } else {
            FrameState::Idle
        };
        Ok(outcome)
    }

    /// Recreates everything derived from the chain's images. Does no GPU work
    /// while the surface has zero extent.
    fn rebuild(&mut self, cause: &str) -> Result<Rebuild, FrameError> {
        self.state = FrameState::Rebuilding;
        let minimized = if self.window.is_empty() {
            true
        } else {
            let support = SurfaceSupport::query(&*self.gpu)?;
            let plan = self.swapchain.plan(&support, self.window)?;
            if plan.is_minimized() {
                true
            } else {
                debug!("rebuilding swapchain: {}", cause);
                self.sync.wait_all(self.abandoned)?;
                self.gpu.device_wait_idle().or_frame("device_wait_idle")?;
                if let Some(slot) = self.abandoned {
                    self.sync.recycle_slot(slot)?;
                    self.abandoned = None;
                }
                self.recorder.release();
                let images = self.swapchain.rebuild(&plan)?.image_count();
                self.recorder.allocate(images)?;
                self.sync.reset_image_tracking(images);
                false
            }
        };
        if minimized {
            if !self.minimized {
                info!("surface has zero extent; presentation paused");
                self.minimized = true;
            }
            return Ok(Rebuild::Minimized);
        }
        if self.minimized {
            info!("surface restored; presentation resumed");
            self.minimized = false;
        }
        self.rebuild_pending = false;
        self.resize_pending = false;
        self.rebuilds += 1;
        self.state = FrameState::Idle;
        Ok(Rebuild::Done)
    }

    fn abandon(&mut self, slot: usize, err: FrameError) -> FrameError {
        warn!("frame {} abandoned on slot {}: {}", self.frame, slot, err);
        self.abandoned = Some(slot);
        self.rebuild_pending = true;
        self.state = FrameState::Rebuilding;
        err
    }
}

impl<G: Gpu> Drop for FrameScheduler<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.device_wait_idle() {
            warn!("device_wait_idle on shutdown failed: {:?}", e);
        }
        self.swapchain.destroy();
    }
}
