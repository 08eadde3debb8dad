// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic vocabulary shared by the host loop and a rendering backend.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod config;
mod error;
mod frame;

pub use config::{FrameConfig, PresentModePref, SurfaceFormatPref};
pub use error::{FrameError, Severity};
pub use frame::{FrameOutcome, FrameState, SkipReason};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports zero in at least one dimension.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the host event loop drives: one `tick` per iteration, plus the
/// window collaborator's resize notification.
pub trait FrameLoop {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: FrameConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the new client-area extent and flags the swapchain for rebuild.
    /// Consumed at the top of the next `tick`.
    fn resized(&mut self, size: RenderSize);

    /// Performs at most one frame's worth of work and returns control.
    fn tick(&mut self) -> std::result::Result<FrameOutcome, FrameError>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
