//! # Pixel Engine
//!
//! A minimal pixel-oriented windowing library. Applications open windows,
//! write individual pixels into a CPU-side framebuffer, and the library
//! presents that framebuffer through a Vulkan swapchain every frame.
//!
//! ## Features
//!
//! - **Pixel Framebuffers**: One persistent `0xAARRGGBB` buffer per window
//! - **Vulkan Presentation**: Double-buffered frames in flight with explicit fences and semaphores
//! - **Resize Handling**: Swapchain recreation on resize and out-of-date surfaces
//! - **Headless Backend**: Deterministic in-memory device for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixel_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = Application::new(AppConfig::default())?;
//!     let window = app.new_window(800, 600, "Pixels")?;
//!     app.pixel_put(window, 10, 10, 0xFF0000)?;
//!     app.loop_hook(|_app| 0);
//!     app.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod window;

mod application;

pub use application::{AppError, AppResult, Application, WindowId};

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        AppError, AppResult, Application, WindowId,
        core::config::{AppConfig, EngineConfig, RendererConfig, ShaderConfig},
        config::{Config, ConfigError},
        render::{
            FrameBackend, PixelBuffer, RenderError, RenderResult, Renderer,
            MAX_FRAMES_IN_FLIGHT,
        },
    };
}
