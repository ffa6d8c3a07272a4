//! In-memory frame backend
//!
//! Models a device with one graphics queue and a presentable swapchain
//! without touching a GPU. Submitted work stays pending until the CPU waits
//! on its fence (or the device is drained), so the backend can observe
//! exactly how often the frame loop blocks and how many submissions are
//! outstanding. Misuse that would hang or corrupt a real device, such as
//! waiting on a fence nothing will signal, is reported as an error.

use ash::vk;

use crate::render::backend::{
    AcquireOutcome, FrameBackend, PresentOutcome, SwapchainInfo, MAX_FRAMES_IN_FLIGHT,
};
use crate::render::backends::vulkan::swapchain::{choose_extent, choose_image_count};
use crate::render::{PixelBuffer, RenderError, RenderResult};

/// Backend operations in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessEvent {
    /// CPU waited on a slot fence
    WaitFence {
        /// Slot waited on
        slot: usize,
        /// The wait had to complete pending GPU work
        blocked: bool,
    },
    /// Slot fence reset
    ResetFence(usize),
    /// Image acquired for a slot
    Acquire {
        /// Acquiring slot
        slot: usize,
        /// Acquired image
        image_index: u32,
    },
    /// Command buffer submitted
    Submit(usize),
    /// Failed frame dropped before reaching the queue
    Discard(usize),
    /// Image presented
    Present {
        /// Presenting slot
        slot: usize,
        /// Presented image
        image_index: u32,
    },
    /// Swapchain rebuilt at the given extent
    Recreate(u32, u32),
    /// Device drained
    WaitIdle,
    /// Pipeline, render pass and descriptor resources released
    ReleasePipeline,
    /// Framebuffers, image views and swapchain released
    ReleaseSwapchain,
    /// Surface released
    ReleaseSurface,
    /// Semaphores, fences and command buffers released
    ReleaseSyncObjects,
}

/// Counters kept by [`HeadlessBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Total fence waits issued by the frame loop
    pub fence_waits: u64,
    /// Fence waits that had to complete a pending submission
    pub blocking_waits: u64,
    /// Fences signaled by completed submissions
    pub fence_signals: u64,
    /// Images acquired
    pub acquires: u64,
    /// Command buffers submitted
    pub submissions: u64,
    /// Images presented, whatever the outcome
    pub presents: u64,
    /// Swapchain recreations
    pub recreations: u64,
    /// Explicit device-idle waits
    pub idle_waits: u64,
    /// Frames dropped after a recording or submission failure
    pub discards: u64,
    /// Highest number of submissions pending at once
    pub max_outstanding: usize,
}

#[derive(Debug, Clone)]
enum InjectedAcquire {
    OutOfDate,
    Suboptimal,
    Fail(RenderError),
}

#[derive(Debug, Clone)]
enum InjectedPresent {
    Outcome(PresentOutcome),
    Fail(RenderError),
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    fence_signaled: bool,
    image_available: bool,
    render_finished: bool,
    recorded: Option<u32>,
    pending: bool,
}

impl SlotState {
    const fn new() -> Self {
        Self {
            fence_signaled: true,
            image_available: false,
            render_finished: false,
            recorded: None,
            pending: false,
        }
    }
}

/// In-memory implementation of [`FrameBackend`]
#[derive(Debug)]
pub struct HeadlessBackend {
    capabilities: vk::SurfaceCapabilitiesKHR,
    format: vk::Format,
    surface_extent: vk::Extent2D,
    info: SwapchainInfo,
    slots: [SlotState; MAX_FRAMES_IN_FLIGHT],
    images: Vec<PixelBuffer>,
    next_image: u32,
    staged: Option<PixelBuffer>,
    last_presented: Option<PixelBuffer>,
    injected_acquire: Option<InjectedAcquire>,
    injected_present: Option<InjectedPresent>,
    injected_record: Option<RenderError>,
    injected_submit: Option<RenderError>,
    stats: HeadlessStats,
    events: Vec<HeadlessEvent>,
    destroyed: bool,
}

impl HeadlessBackend {
    /// Surface capabilities of a typical windowed desktop surface
    ///
    /// The window manager lets the application pick the extent, and the
    /// surface supports between two and three images.
    pub fn default_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            ..Default::default()
        }
    }

    /// Create a backend whose swapchain matches a `width` x `height` window
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        Self::with_capabilities(Self::default_capabilities(), width, height)
    }

    /// Create a backend reporting custom surface capabilities
    pub fn with_capabilities(
        capabilities: vk::SurfaceCapabilitiesKHR,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        if capabilities.min_image_count == 0 {
            return Err(RenderError::Initialization(
                "surface reports a minimum of zero images".to_string(),
            ));
        }

        let mut backend = Self {
            capabilities,
            format: vk::Format::B8G8R8A8_SRGB,
            surface_extent: vk::Extent2D { width, height },
            info: SwapchainInfo {
                extent: (0, 0),
                image_count: 0,
                format: vk::Format::B8G8R8A8_SRGB,
            },
            slots: [SlotState::new(); MAX_FRAMES_IN_FLIGHT],
            images: Vec::new(),
            next_image: 0,
            staged: None,
            last_presented: None,
            injected_acquire: None,
            injected_present: None,
            injected_record: None,
            injected_submit: None,
            stats: HeadlessStats::default(),
            events: Vec::new(),
            destroyed: false,
        };
        backend.build_swapchain(width, height);
        log::debug!(
            "Headless swapchain created: {:?}, {} images",
            backend.info.extent,
            backend.info.image_count
        );
        Ok(backend)
    }

    /// Counters collected so far
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Every backend operation in order
    pub fn events(&self) -> &[HeadlessEvent] {
        &self.events
    }

    /// Forget the events recorded so far; counters are kept
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Submissions whose fence has not been waited on yet
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|slot| slot.pending).count()
    }

    /// Whether `destroy` has released everything
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Content of the most recently presented image
    pub fn last_presented(&self) -> Option<&PixelBuffer> {
        self.last_presented.as_ref()
    }

    /// Content of one swapchain image
    pub fn image(&self, image_index: u32) -> Option<&PixelBuffer> {
        self.images.get(image_index as usize)
    }

    /// Change the size of the surface, as a window resize would
    ///
    /// Acquisitions report out-of-date until the swapchain is rebuilt at the
    /// new size.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_extent = vk::Extent2D { width, height };
    }

    /// Make the next acquisition report an out-of-date swapchain
    pub fn inject_acquire_out_of_date(&mut self) {
        self.injected_acquire = Some(InjectedAcquire::OutOfDate);
    }

    /// Make the next acquisition succeed but report a suboptimal swapchain
    pub fn inject_acquire_suboptimal(&mut self) {
        self.injected_acquire = Some(InjectedAcquire::Suboptimal);
    }

    /// Make the next acquisition fail with `error`
    pub fn inject_acquire_error(&mut self, error: RenderError) {
        self.injected_acquire = Some(InjectedAcquire::Fail(error));
    }

    /// Make the next presentation report `outcome`
    pub fn inject_present_outcome(&mut self, outcome: PresentOutcome) {
        self.injected_present = Some(InjectedPresent::Outcome(outcome));
    }

    /// Make the next presentation fail with `error`
    ///
    /// The submission behind it still completes.
    pub fn inject_present_error(&mut self, error: RenderError) {
        self.injected_present = Some(InjectedPresent::Fail(error));
    }

    /// Make the next command recording fail with `error`
    pub fn inject_record_error(&mut self, error: RenderError) {
        self.injected_record = Some(error);
    }

    /// Make the next queue submission fail with `error`
    pub fn inject_submit_error(&mut self, error: RenderError) {
        self.injected_submit = Some(error);
    }

    fn build_swapchain(&mut self, width: u32, height: u32) {
        let extent = choose_extent(&self.capabilities, width, height);
        let image_count = choose_image_count(&self.capabilities);

        self.info = SwapchainInfo {
            extent: (extent.width, extent.height),
            image_count,
            format: self.format,
        };
        self.images = vec![PixelBuffer::new(0, 0); image_count as usize];
        self.next_image = 0;
    }

    fn surface_changed(&self) -> bool {
        let current = self.capabilities.current_extent;
        if current.width != u32::MAX {
            return false;
        }
        let expected = choose_extent(
            &self.capabilities,
            self.surface_extent.width,
            self.surface_extent.height,
        );
        (expected.width, expected.height) != self.info.extent
    }

    fn ensure_alive(&self) -> RenderResult<()> {
        if self.destroyed {
            return Err(RenderError::invalid("headless backend already destroyed"));
        }
        Ok(())
    }

    fn check_slot(slot: usize) -> RenderResult<()> {
        if slot >= MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::invalid(format!("frame slot {slot} out of range")));
        }
        Ok(())
    }

    fn complete(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        if state.pending {
            state.pending = false;
            state.fence_signaled = true;
            self.stats.fence_signals += 1;
        }
    }

    fn drain(&mut self) {
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            self.complete(slot);
        }
    }
}

impl FrameBackend for HeadlessBackend {
    fn swapchain_info(&self) -> SwapchainInfo {
        self.info
    }

    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        let state = self.slots[slot];
        let blocked = if state.fence_signaled {
            false
        } else if state.pending {
            self.complete(slot);
            self.stats.blocking_waits += 1;
            true
        } else {
            return Err(RenderError::invalid(format!(
                "waiting on unsignaled fence of slot {slot} with no pending submission would never return"
            )));
        };

        self.stats.fence_waits += 1;
        self.events.push(HeadlessEvent::WaitFence { slot, blocked });
        Ok(())
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        if self.slots[slot].pending {
            return Err(RenderError::invalid(format!(
                "resetting fence of slot {slot} while its submission is pending"
            )));
        }
        self.slots[slot].fence_signaled = false;
        self.events.push(HeadlessEvent::ResetFence(slot));
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        let suboptimal = match self.injected_acquire.take() {
            Some(InjectedAcquire::OutOfDate) => return Ok(AcquireOutcome::OutOfDate),
            Some(InjectedAcquire::Suboptimal) => true,
            Some(InjectedAcquire::Fail(error)) => return Err(error),
            None if self.surface_changed() => return Ok(AcquireOutcome::OutOfDate),
            None => false,
        };

        if self.slots[slot].image_available {
            return Err(RenderError::invalid(format!(
                "image-available semaphore of slot {slot} is already signaled"
            )));
        }

        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.info.image_count;
        self.slots[slot].image_available = true;
        self.stats.acquires += 1;
        self.events.push(HeadlessEvent::Acquire { slot, image_index });

        Ok(AcquireOutcome::Acquired { image_index, suboptimal })
    }

    fn record_frame(&mut self, slot: usize, image_index: u32, pixels: &PixelBuffer) -> RenderResult<()> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        if image_index >= self.info.image_count {
            return Err(RenderError::invalid(format!("image {image_index} is outside the swapchain")));
        }
        if self.slots[slot].pending {
            return Err(RenderError::invalid(format!(
                "recording slot {slot} while its command buffer is still executing"
            )));
        }
        if let Some(error) = self.injected_record.take() {
            return Err(error);
        }

        self.slots[slot].recorded = Some(image_index);
        self.staged = Some(pixels.clone());
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize) -> RenderResult<()> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        let state = self.slots[slot];
        let Some(image_index) = state.recorded else {
            return Err(RenderError::invalid(format!("submitting slot {slot} with nothing recorded")));
        };
        if state.fence_signaled {
            return Err(RenderError::invalid(format!("submitting slot {slot} with a signaled fence")));
        }
        if !state.image_available {
            return Err(RenderError::invalid(format!(
                "submitting slot {slot} without an acquired image to wait on"
            )));
        }
        if let Some(error) = self.injected_submit.take() {
            return Err(error);
        }

        if let Some(pixels) = self.staged.take() {
            self.images[image_index as usize] = pixels;
        }

        let state = &mut self.slots[slot];
        state.image_available = false;
        state.render_finished = true;
        state.recorded = None;
        state.pending = true;

        self.stats.submissions += 1;
        self.stats.max_outstanding = self.stats.max_outstanding.max(self.outstanding());
        self.events.push(HeadlessEvent::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        if !self.slots[slot].render_finished {
            return Err(RenderError::invalid(format!(
                "presenting from slot {slot} without a render-finished signal"
            )));
        }
        self.slots[slot].render_finished = false;
        self.stats.presents += 1;

        let outcome = match self.injected_present.take() {
            Some(InjectedPresent::Outcome(outcome)) => outcome,
            Some(InjectedPresent::Fail(error)) => return Err(error),
            None if self.surface_changed() => PresentOutcome::Suboptimal,
            None => PresentOutcome::Presented,
        };
        if outcome != PresentOutcome::OutOfDate {
            self.last_presented = self.images.get(image_index as usize).cloned();
            self.events.push(HeadlessEvent::Present { slot, image_index });
        }
        Ok(outcome)
    }

    fn discard_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.ensure_alive()?;
        Self::check_slot(slot)?;

        let state = &mut self.slots[slot];
        if state.pending {
            return Err(RenderError::invalid(format!(
                "discarding slot {slot} while its submission is pending"
            )));
        }
        state.image_available = false;
        state.recorded = None;
        state.fence_signaled = true;
        self.staged = None;

        self.stats.discards += 1;
        self.events.push(HeadlessEvent::Discard(slot));
        Ok(())
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<SwapchainInfo> {
        self.ensure_alive()?;

        self.drain();
        for slot in &mut self.slots {
            // Leftover "image available" signals belong to the old chain
            slot.image_available = false;
            slot.recorded = None;
        }

        self.surface_extent = vk::Extent2D { width, height };
        self.build_swapchain(width, height);
        self.stats.recreations += 1;
        self.events
            .push(HeadlessEvent::Recreate(self.info.extent.0, self.info.extent.1));
        log::debug!(
            "Headless swapchain recreated: {:?}, {} images",
            self.info.extent,
            self.info.image_count
        );
        Ok(self.info)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.ensure_alive()?;
        self.drain();
        self.stats.idle_waits += 1;
        self.events.push(HeadlessEvent::WaitIdle);
        Ok(())
    }

    fn destroy(&mut self) -> RenderResult<()> {
        if self.destroyed {
            return Ok(());
        }
        if self.outstanding() > 0 {
            return Err(RenderError::invalid(format!(
                "destroying with {} submissions still executing",
                self.outstanding()
            )));
        }

        self.events.extend([
            HeadlessEvent::ReleasePipeline,
            HeadlessEvent::ReleaseSwapchain,
            HeadlessEvent::ReleaseSurface,
            HeadlessEvent::ReleaseSyncObjects,
        ]);
        self.images.clear();
        self.staged = None;
        self.destroyed = true;
        log::debug!("Headless backend destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_swapchain_follows_capabilities() {
        let backend = HeadlessBackend::new(800, 600).unwrap();
        let info = backend.swapchain_info();
        assert_eq!(info.extent, (800, 600));
        assert_eq!(info.image_count, 3);
        assert_eq!(info.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_extent_is_clamped() {
        let backend = HeadlessBackend::new(10_000, 0).unwrap();
        assert_eq!(backend.swapchain_info().extent, (4096, 1));
    }

    #[test]
    fn test_wait_without_work_on_unsignaled_fence_fails() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        backend.wait_for_slot(0).unwrap();
        backend.reset_slot_fence(0).unwrap();
        assert!(matches!(
            backend.wait_for_slot(0),
            Err(RenderError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_submit_requires_acquired_image() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        let pixels = PixelBuffer::new(64, 64);
        backend.reset_slot_fence(0).unwrap();
        backend.record_frame(0, 0, &pixels).unwrap();
        assert!(backend.submit_frame(0).is_err());
        assert_eq!(backend.stats().submissions, 0);
    }

    #[test]
    fn test_pending_work_completes_on_wait() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        let pixels = PixelBuffer::new(64, 64);

        backend.wait_for_slot(0).unwrap();
        let AcquireOutcome::Acquired { image_index, .. } = backend.acquire_next_image(0).unwrap() else {
            panic!("expected an image");
        };
        backend.reset_slot_fence(0).unwrap();
        backend.record_frame(0, image_index, &pixels).unwrap();
        backend.submit_frame(0).unwrap();
        assert_eq!(backend.outstanding(), 1);

        backend.wait_for_slot(0).unwrap();
        assert_eq!(backend.outstanding(), 0);
        let stats = backend.stats();
        assert_eq!(stats.blocking_waits, 1);
        assert_eq!(stats.fence_signals, 1);
    }

    #[test]
    fn test_resized_surface_reports_out_of_date() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        backend.resize_surface(32, 32);
        assert_eq!(backend.acquire_next_image(0).unwrap(), AcquireOutcome::OutOfDate);

        backend.recreate_swapchain(32, 32).unwrap();
        assert!(matches!(
            backend.acquire_next_image(0).unwrap(),
            AcquireOutcome::Acquired { suboptimal: false, .. }
        ));
    }

    #[test]
    fn test_discard_restores_slot() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        backend.wait_for_slot(0).unwrap();
        backend.acquire_next_image(0).unwrap();
        backend.reset_slot_fence(0).unwrap();

        backend.discard_slot(0).unwrap();
        assert_eq!(backend.events().last(), Some(&HeadlessEvent::Discard(0)));
        assert_eq!(backend.stats().discards, 1);

        // Fence signaled and semaphore consumed: the slot can start over
        backend.wait_for_slot(0).unwrap();
        assert!(backend.acquire_next_image(0).is_ok());
        assert_eq!(backend.stats().blocking_waits, 0);
    }

    #[test]
    fn test_clear_events_keeps_counters() {
        let mut backend = HeadlessBackend::new(64, 64).unwrap();
        backend.wait_for_slot(0).unwrap();
        backend.wait_for_slot(1).unwrap();
        assert_eq!(backend.events().len(), 2);

        backend.clear_events();
        assert!(backend.events().is_empty());
        assert_eq!(backend.stats().fence_waits, 2);

        backend.wait_idle().unwrap();
        assert_eq!(backend.events(), &[HeadlessEvent::WaitIdle]);
    }

    #[test]
    fn test_destroy_refuses_outstanding_work_and_is_idempotent() {
        let mut backend = HeadlessBackend::new(16, 16).unwrap();
        let pixels = PixelBuffer::new(16, 16);
        backend.wait_for_slot(0).unwrap();
        backend.acquire_next_image(0).unwrap();
        backend.reset_slot_fence(0).unwrap();
        backend.record_frame(0, 0, &pixels).unwrap();
        backend.submit_frame(0).unwrap();

        assert!(backend.destroy().is_err());
        backend.wait_idle().unwrap();
        backend.destroy().unwrap();
        backend.destroy().unwrap();
        assert!(backend.is_destroyed());
        assert_eq!(
            backend
                .events()
                .iter()
                .filter(|event| **event == HeadlessEvent::ReleaseSurface)
                .count(),
            1
        );
        assert!(backend.wait_for_slot(0).is_err());
    }
}
