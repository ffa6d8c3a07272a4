//! Per-window renderer
//!
//! Owns a [`FrameBackend`], the frame synchronizer and the window's pixel
//! buffer. Swapchain out-of-date and suboptimal conditions are handled here
//! by recreating the swapchain; callers only ever see a skipped frame.

use crate::render::backend::{FrameBackend, SwapchainInfo};
use crate::render::frame::{BeginOutcome, FrameSynchronizer};
use crate::render::{PixelBuffer, RenderError, RenderResult};

/// Presents one window's pixel buffer every frame
pub struct Renderer<B: FrameBackend> {
    backend: B,
    sync: FrameSynchronizer,
    pixels: PixelBuffer,
    window_extent: (u32, u32),
    framebuffer_resized: bool,
    destroyed: bool,
}

impl<B: FrameBackend> Renderer<B> {
    /// Create a renderer for a `width` x `height` window
    ///
    /// The pixel buffer keeps this size for the renderer's lifetime and is
    /// stretched over the swapchain when the window is resized.
    pub fn new(backend: B, width: u32, height: u32) -> Self {
        let info = backend.swapchain_info();
        log::info!(
            "Renderer created: {width}x{height} pixels, swapchain {}x{} with {} images",
            info.extent.0,
            info.extent.1,
            info.image_count
        );

        Self {
            sync: FrameSynchronizer::new(info.image_count),
            backend,
            pixels: PixelBuffer::new(width, height),
            window_extent: (width, height),
            framebuffer_resized: false,
            destroyed: false,
        }
    }

    /// Start a frame
    ///
    /// Returns `Ok(false)` when the frame must be skipped: the swapchain was
    /// out of date (and has been recreated), or the window is minimized.
    /// Nothing was submitted in that case and `end_frame` must not be called.
    pub fn begin_frame(&mut self) -> RenderResult<bool> {
        self.ensure_alive()?;

        if self.framebuffer_resized && !self.recreate_swapchain()? {
            return Ok(false);
        }

        match self.sync.begin(&mut self.backend)? {
            BeginOutcome::Ready { suboptimal, .. } => {
                if suboptimal {
                    // Keep the image; rebuild once this frame is presented
                    self.framebuffer_resized = true;
                }
                Ok(true)
            }
            BeginOutcome::OutOfDate => {
                self.framebuffer_resized = true;
                self.recreate_swapchain()?;
                Ok(false)
            }
        }
    }

    /// Upload the pixel buffer, draw it and present the frame
    ///
    /// On failure the frame slot is back to idle, so the caller may keep
    /// calling `begin_frame`. Unless the device was lost the swapchain is
    /// rebuilt first, since the failed frame's image was never presented.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        self.ensure_alive()?;

        let was_recording = self.sync.is_recording();
        let outcome = match self.sync.end(&mut self.backend, &self.pixels) {
            Ok(outcome) => outcome,
            Err(err) => {
                if was_recording && !err.is_device_fatal() {
                    self.framebuffer_resized = true;
                }
                return Err(err);
            }
        };
        if outcome.needs_recreation() {
            log::debug!("Present reported {outcome:?}, recreating swapchain");
            self.framebuffer_resized = true;
        }
        if self.framebuffer_resized {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    /// Write one pixel of the window's buffer
    ///
    /// Coordinates outside the buffer are ignored. Writes persist across
    /// frames.
    pub fn put_pixel(&mut self, x: i32, y: i32, color: u32) {
        self.pixels.put_pixel(x, y, color);
    }

    /// Fill the window's buffer with one color
    pub fn clear(&mut self, color: u32) {
        self.pixels.clear(color);
    }

    /// Request a swapchain rebuild before the next frame
    pub fn require_framebuffer_resize(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Record a new framebuffer size and request a swapchain rebuild
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Framebuffer resized to {width}x{height}");
        self.window_extent = (width, height);
        self.framebuffer_resized = true;
    }

    /// Wait for the GPU, then release all window resources
    ///
    /// Safe to call at any point, including between `begin_frame` and
    /// `end_frame`; the acquired image is then abandoned. Later calls do
    /// nothing.
    pub fn destroy(&mut self) -> RenderResult<()> {
        if self.destroyed {
            return Ok(());
        }

        if let Err(e) = self.backend.wait_idle() {
            log::warn!("Device wait before renderer teardown failed: {e}");
        }
        self.sync.abandon();
        self.backend.destroy()?;
        self.destroyed = true;
        log::debug!("Renderer destroyed");
        Ok(())
    }

    /// Slot the next frame will use
    pub const fn frame_index(&self) -> usize {
        self.sync.frame_index()
    }

    /// Image acquired by the frame in progress
    pub const fn image_index(&self) -> Option<u32> {
        self.sync.image_index()
    }

    /// Whether `begin_frame` succeeded and `end_frame` has not run yet
    pub fn is_frame_in_progress(&self) -> bool {
        self.sync.is_recording()
    }

    /// Current swapchain properties
    pub fn swapchain_info(&self) -> SwapchainInfo {
        self.backend.swapchain_info()
    }

    /// Last framebuffer size reported for the window
    pub const fn window_extent(&self) -> (u32, u32) {
        self.window_extent
    }

    /// The window's pixel buffer
    pub const fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// The window's pixel buffer, mutably
    pub fn pixels_mut(&mut self) -> &mut PixelBuffer {
        &mut self.pixels
    }

    /// The backend driving this renderer
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend driving this renderer, mutably
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Whether `destroy` has run
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn ensure_alive(&self) -> RenderResult<()> {
        if self.destroyed {
            return Err(RenderError::invalid("renderer already destroyed"));
        }
        Ok(())
    }

    /// Rebuild the swapchain at the window size
    ///
    /// Returns false and keeps the request pending while the window has no
    /// area.
    fn recreate_swapchain(&mut self) -> RenderResult<bool> {
        let (width, height) = self.window_extent;
        if width == 0 || height == 0 {
            log::trace!("Window minimized, deferring swapchain recreation");
            return Ok(false);
        }

        let info = self.backend.recreate_swapchain(width, height)?;
        self.sync.on_swapchain_recreated(info.image_count);
        self.framebuffer_resized = false;
        Ok(true)
    }
}

impl<B: FrameBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Renderer teardown failed: {e}");
        }
    }
}

impl<B: FrameBackend + std::fmt::Debug> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend)
            .field("frame_index", &self.sync.frame_index())
            .field("window_extent", &self.window_extent)
            .field("framebuffer_resized", &self.framebuffer_resized)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
