// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use vesper_render::FrameError;

/// Maps a driver status onto the frame error taxonomy. Callers handle
/// out-of-date and suboptimal themselves before anything reaches here.
pub(crate) fn translate(what: &'static str, code: vk::Result) -> FrameError {
    match code {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_TOO_MANY_OBJECTS
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_FRAGMENTATION => FrameError::ResourceExhausted(what),
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost(what),
        vk::Result::TIMEOUT | vk::Result::NOT_READY => FrameError::Timeout(what),
        vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost,
        other => FrameError::Driver {
            what,
            detail: format!("{other:?}"),
        },
    }
}

pub(crate) trait VkResultExt<T> {
    fn or_frame(self, what: &'static str) -> Result<T, FrameError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn or_frame(self, what: &'static str) -> Result<T, FrameError> {
        self.map_err(|code| translate(what, code))
    }
}
