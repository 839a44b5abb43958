// SPDX-License-Identifier: CEPL-1.0
//! winit-backed surface provider.
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use cubelet_render::{EngineConfig, RenderSize, SurfaceProvider};
use tracing::info;

pub use winit;

use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle},
    window::{Window, WindowId},
};

/// Owns the OS window. The swapchain is never recreated, so the window is
/// created with a fixed size.
pub struct WindowSurface {
    window: Window,
}

impl WindowSurface {
    pub fn create(event_loop: &ActiveEventLoop, config: &EngineConfig) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.window_width, config.window_height))
            .with_resizable(false);
        let window = event_loop.create_window(attrs).context("create_window")?;
        let size = window.inner_size();
        info!("window {}x{} \"{}\"", size.width, size.height, config.title);
        Ok(Self { window })
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for WindowSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for WindowSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl SurfaceProvider for WindowSurface {
    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize {
            width: size.width,
            height: size.height,
        }
    }
}
