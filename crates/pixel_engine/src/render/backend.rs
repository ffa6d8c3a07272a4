//! Backend abstraction for frame presentation
//!
//! The frame synchronizer and renderer only talk to the GPU through
//! [`FrameBackend`]. The Vulkan backend implements it on a real device; the
//! headless backend implements it in memory so frame pacing, resize handling
//! and teardown can be exercised without a GPU.

use ash::vk;

use crate::render::{PixelBuffer, RenderResult};

/// Number of frame slots recorded ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Properties fixed for the lifetime of one swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// Image extent as (width, height)
    pub extent: (u32, u32),
    /// Number of presentable images
    pub image_count: u32,
    /// Image format
    pub format: vk::Format,
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; its "image available" semaphore will be signaled
    Acquired {
        /// Index of the acquired image
        image_index: u32,
        /// The surface changed; the image is usable but the chain should be rebuilt
        suboptimal: bool,
    },
    /// The chain no longer matches the surface; nothing was acquired
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the chain should be rebuilt
    Suboptimal,
    /// Not presented; the chain must be rebuilt
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain must be recreated after this present
    pub const fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// GPU operations needed to present one window's pixel buffer
///
/// `slot` is always in `0..MAX_FRAMES_IN_FLIGHT`. Each slot owns a command
/// buffer, an "image available" semaphore, a "render finished" semaphore and
/// a fence created in the signaled state.
pub trait FrameBackend {
    /// Properties of the current swapchain
    fn swapchain_info(&self) -> SwapchainInfo;

    /// Block until the slot's previous submission has completed
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Return the slot's fence to the unsignaled state
    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquire the next image, signaling the slot's "image available" semaphore
    fn acquire_next_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Record the pixel upload and quad draw into the slot's command buffer
    fn record_frame(&mut self, slot: usize, image_index: u32, pixels: &PixelBuffer) -> RenderResult<()>;

    /// Submit the slot's command buffer, signaling "render finished" and the fence
    fn submit_frame(&mut self, slot: usize) -> RenderResult<()>;

    /// Return a slot whose frame failed before reaching the queue to a usable state
    ///
    /// Consumes the slot's unwaited "image available" signal and leaves its
    /// fence signaled, so the next wait on the slot returns. The acquired
    /// image stays out of reach until the swapchain is rebuilt.
    fn discard_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Present the image once the slot's "render finished" semaphore signals
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Wait for the device to drain, then rebuild the swapchain and framebuffers
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<SwapchainInfo>;

    /// Block until all submitted work has completed
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Release pipeline, swapchain, surface and synchronization resources, in that order
    ///
    /// Callers must have waited for idle first. Calling it twice is a no-op.
    fn destroy(&mut self) -> RenderResult<()>;
}
