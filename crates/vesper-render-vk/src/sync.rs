// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot ring and the per-image fence table.
use std::sync::Arc;
use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use tracing::{debug, warn};
use vesper_render::FrameError;

use crate::error::VkResultExt;
use crate::gpu::Gpu;

/// One frame's worth of synchronization. Lives for the whole render loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSlot {
    /// Signalled by acquire, waited on by submit.
    pub image_available: vk::Semaphore,
    /// Signalled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signalled when the slot's submission retires. Created signalled.
    pub in_flight: vk::Fence,
}

/// Image index -> fence of the slot that last submitted work against it.
/// Entries borrow slot fences; nothing here is destroyed.
#[derive(Debug, Default)]
pub struct ImageInFlightTracker {
    guards: Vec<Option<vk::Fence>>,
}

impl ImageInFlightTracker {
    pub fn reset(&mut self, image_count: usize) {
        self.guards.clear();
        self.guards.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn guard(&self, image: usize) -> Option<vk::Fence> {
        self.guards.get(image).copied().flatten()
    }

    /// The fence that must be waited on before `fence`'s frame may touch `image`.
    pub fn conflicting(&self, image: usize, fence: vk::Fence) -> Option<vk::Fence> {
        self.guard(image).filter(|prev| *prev != fence)
    }

    pub fn record(&mut self, image: usize, fence: vk::Fence) {
        if image >= self.guards.len() {
            self.guards.resize(image + 1, None);
        }
        self.guards[image] = Some(fence);
    }

    /// Drops every entry pointing at `fence`.
    pub fn forget(&mut self, fence: vk::Fence) {
        for guard in &mut self.guards {
            if *guard == Some(fence) {
                *guard = None;
            }
        }
    }
}

/// Owns the slot ring. Dropping destroys every slot object, so the owner
/// must idle the device first; `FrameScheduler` does so in its own `Drop`.
pub struct FrameSynchronizer<G: Gpu> {
    gpu: Arc<G>,
    slots: Vec<FrameSlot>,
    images: ImageInFlightTracker,
    timeout_ns: u64,
}

impl<G: Gpu> FrameSynchronizer<G> {
    /// Creates `count` slots, fences pre-signalled so the first wait on each returns at once.
    pub fn create_slots(gpu: Arc<G>, count: usize, timeout: Duration) -> Result<Self, FrameError> {
        let mut sync = FrameSynchronizer {
            gpu,
            slots: Vec::with_capacity(count),
            images: ImageInFlightTracker::default(),
            timeout_ns: u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX),
        };
        for _ in 0..count {
            let slot = create_slot(&*sync.gpu).or_frame("create frame slot")?;
            sync.slots.push(slot);
        }
        debug!("created {} frame slots", count);
        Ok(sync)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    pub fn images(&self) -> &ImageInFlightTracker {
        &self.images
    }

    /// Blocks until the slot's previous submission has retired. The fence
    /// stays signalled until `arm_slot`.
    pub fn wait_for_slot(&self, index: usize) -> Result<(), FrameError> {
        self.gpu
            .wait_for_fences(&[self.slots[index].in_flight], self.timeout_ns)
            .or_frame("slot fence")
    }

    /// Unsignals the slot fence. Only call right before the submission that signals it.
    pub fn arm_slot(&self, index: usize) -> Result<(), FrameError> {
        self.gpu
            .reset_fence(self.slots[index].in_flight)
            .or_frame("reset slot fence")
    }

    /// Waits out any other slot's work still targeting `image`, then makes
    /// this slot its guard. Returns the fence waited on, if any.
    pub fn track_image_use(
        &mut self,
        image: usize,
        slot: usize,
    ) -> Result<Option<vk::Fence>, FrameError> {
        let fence = self.slots[slot].in_flight;
        let prev = self.images.conflicting(image, fence);
        if let Some(prev) = prev {
            self.gpu
                .wait_for_fences(&[prev], self.timeout_ns)
                .or_frame("image in-flight fence")?;
        }
        self.images.record(image, fence);
        Ok(prev)
    }

    /// Waits on every slot fence except `skip`, whose fence may never signal.
    pub fn wait_all(&self, skip: Option<usize>) -> Result<(), FrameError> {
        let fences: Vec<vk::Fence> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, s)| s.in_flight)
            .collect();
        if fences.is_empty() {
            return Ok(());
        }
        self.gpu
            .wait_for_fences(&fences, self.timeout_ns)
            .or_frame("all slot fences")
    }

    /// Replaces a slot whose objects were left mid-frame. The device must be idle.
    pub fn recycle_slot(&mut self, index: usize) -> Result<(), FrameError> {
        let old = self.slots[index];
        self.images.forget(old.in_flight);
        destroy_slot(&*self.gpu, &old);
        self.slots[index] = FrameSlot::default();
        self.slots[index] = create_slot(&*self.gpu).or_frame("recreate frame slot")?;
        warn!("frame slot {} recreated after an abandoned frame", index);
        Ok(())
    }

    /// Sized to the new chain; all guards dropped.
    pub fn reset_image_tracking(&mut self, image_count: usize) {
        self.images.reset(image_count);
    }
}

impl<G: Gpu> Drop for FrameSynchronizer<G> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            destroy_slot(&*self.gpu, &slot);
        }
    }
}

fn create_slot<G: Gpu + ?Sized>(gpu: &G) -> VkResult<FrameSlot> {
    let mut slot = FrameSlot::default();
    if let Err(e) = fill_slot(gpu, &mut slot) {
        destroy_slot(gpu, &slot);
        return Err(e);
    }
    Ok(slot)
}

fn fill_slot<G: Gpu + ?Sized>(gpu: &G, slot: &mut FrameSlot) -> VkResult<()> {
    slot.image_available = gpu.create_semaphore()?;
    slot.render_finished = gpu.create_semaphore()?;
    slot.in_flight = gpu.create_fence(true)?;
    Ok(())
}

fn destroy_slot<G: Gpu + ?Sized>(gpu: &G, slot: &FrameSlot) {
    if !slot.in_flight.is_null() {
        gpu.destroy_fence(slot.in_flight);
    }
    if !slot.render_finished.is_null() {
        gpu.destroy_semaphore(slot.render_finished);
    }
    if !slot.image_available.is_null() {
        gpu.destroy_semaphore(slot.image_available);
    }
}
