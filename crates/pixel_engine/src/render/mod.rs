//! Rendering system
//!
//! Presents per-window pixel buffers through a swapchain. The frame loop
//! ([`Renderer`] and [`frame::FrameSynchronizer`]) is written against the
//! [`FrameBackend`] trait, implemented by the Vulkan backend and by an
//! in-memory headless backend.

pub mod backend;
pub mod backends;
pub mod error;
pub mod frame;
pub mod pixel_buffer;
pub mod renderer;
pub mod vertex;

pub use backend::{AcquireOutcome, FrameBackend, PresentOutcome, SwapchainInfo, MAX_FRAMES_IN_FLIGHT};
pub use backends::headless::{HeadlessBackend, HeadlessEvent, HeadlessStats};
pub use backends::vulkan::VulkanBackend;
pub use error::{RenderError, RenderResult};
pub use frame::{BeginOutcome, FrameState, FrameSynchronizer};
pub use pixel_buffer::{color, PixelBuffer};
pub use renderer::Renderer;
pub use vertex::Vertex;
