// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. The rest of the workspace reaches winit through here.
use anyhow::{Context, Result};
use tracing::info;

pub use winit;

use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Opens the single application window, sized in logical pixels.
pub fn create_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width.max(1), height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let (w, h) = client_extent(window.inner_size());
    info!("window '{}' opened at {}x{} (scale {:.2})", title, w, h, window.scale_factor());
    Ok(window)
}

/// Client-area extent in physical pixels. Zero in either dimension when minimised.
pub fn client_extent(size: PhysicalSize<u32>) -> (u32, u32) {
    (size.width, size.height)
}
