// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use vesper_core::init_tracing;
use vesper_render::{FrameConfig, FrameLoop, FrameOutcome, PresentModePref, RenderSize, SkipReason};
use vesper_render_vk::VkRenderer;

use vesper_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing or malformed falls back to defaults
    #[arg(long, default_value = "vesper.toml")]
    config: PathBuf,
    /// Frames the CPU may run ahead of the GPU
    #[arg(long)]
    frames_in_flight: Option<usize>,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresentModeArg {
    Mailbox,
    Fifo,
    Immediate,
}

impl From<PresentModeArg> for PresentModePref {
    fn from(arg: PresentModeArg) -> Self {
        match arg {
            PresentModeArg::Mailbox => PresentModePref::Mailbox,
            PresentModeArg::Fifo => PresentModePref::Fifo,
            PresentModeArg::Immediate => PresentModePref::Immediate,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "vesper".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    frame: FrameConfig,
}

impl AppCfg {
    fn apply(mut self, args: &Args) -> Self {
        if let Some(n) = args.frames_in_flight {
            self.frame.max_frames_in_flight = n;
        }
        if let Some(mode) = args.present_mode {
            self.frame.present_mode = mode.into();
        }
        self
    }
}

fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            info!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
    }
}

struct App {
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("fatal: {err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer before window: the surface borrows the window.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match renderer.tick() {
            Ok(FrameOutcome::Presented { .. }) => {
                self.frames = self.frames.saturating_add(1);
                if self.paused {
                    info!("presenting again");
                    self.paused = false;
                }
            }
            Ok(FrameOutcome::Skipped(SkipReason::Minimized)) => {
                if !self.paused {
                    info!("minimised; waiting for a resize");
                    self.paused = true;
                }
            }
            Ok(FrameOutcome::Skipped(SkipReason::OutOfDate)) => {}
            Err(e) if e.is_fatal() => self.fail(event_loop, e.into()),
            Err(e) => warn!("frame dropped: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let wc = &self.cfg.window;
        let created = vesper_platform::create_window(event_loop, &wc.title, wc.width, wc.height);
        let window = match created {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, e),
        };
        let (w, h) = vesper_platform::client_extent(window.inner_size());
        self.render_size = RenderSize::new(w, h);

        match VkRenderer::new(&window, &window, self.render_size, self.cfg.frame.clone()) {
            Ok(r) => {
                info!(
                    "frames_in_flight={} present_mode={:?} surface_format={:?}",
                    self.cfg.frame.frames_in_flight(),
                    self.cfg.frame.present_mode,
                    self.cfg.frame.surface_format
                );
                self.renderer = Some(r);
            }
            Err(e) => return self.fail(event_loop, e.context("vulkan init")),
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let (w, h) = vesper_platform::client_extent(new_size);
                self.render_size = RenderSize::new(w, h);
                info!("Resized → {}x{}", w, h);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resized(self.render_size);
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // A Resized event wakes us up again.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config).apply(&args);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg,
        window: None,
        renderer: None,
        render_size: RenderSize::new(1, 1),
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
        fatal: None,
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
