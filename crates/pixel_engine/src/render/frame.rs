//! Frame synchronization across frames in flight
//!
//! Each frame slot walks `Idle -> Acquiring -> Recording -> Submitted ->
//! Presenting -> Idle`:
//!
//! ```text
//! 1. Wait on the slot fence (CPU waits for the previous use of this slot)
//! 2. Acquire a swapchain image (signals "image available")
//! 3. Reset the slot fence, then let the client write pixels
//! 4. Record upload + draw, submit: wait "image available",
//!    signal "render finished" and the slot fence
//! 5. Present (waits on "render finished"), advance to the next slot
//! ```
//!
//! The fence is reset only after an image was acquired. A frame abandoned
//! at acquisition leaves the fence signaled, so the next wait on that slot
//! returns immediately instead of waiting for a submission that never
//! happened. A frame that fails between acquisition and submission is
//! discarded by the backend, which signals the fence again.

use crate::render::backend::{AcquireOutcome, FrameBackend, PresentOutcome, MAX_FRAMES_IN_FLIGHT};
use crate::render::{PixelBuffer, RenderError, RenderResult};

/// Per-slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Not in use by the CPU; GPU work from an earlier frame may be pending
    Idle,
    /// Waiting on the slot fence and acquiring an image
    Acquiring,
    /// Image acquired; pixels may be written
    Recording,
    /// Command buffer submitted to the graphics queue
    Submitted,
    /// Present queued
    Presenting,
}

/// Result of starting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The slot is recording into the given image
    Ready {
        /// Acquired swapchain image
        image_index: u32,
        /// The acquire reported a suboptimal chain
        suboptimal: bool,
    },
    /// The swapchain is out of date; the frame was dropped before submission
    OutOfDate,
}

/// Drives frame slots through acquire, submit and present
#[derive(Debug)]
pub struct FrameSynchronizer {
    states: [FrameState; MAX_FRAMES_IN_FLIGHT],
    frame_index: usize,
    image_index: Option<u32>,
    /// Slot currently holding each swapchain image between acquire and present
    image_owners: Vec<Option<usize>>,
    frames_completed: u64,
}

impl FrameSynchronizer {
    /// Create a synchronizer for a swapchain with `image_count` images
    pub fn new(image_count: u32) -> Self {
        Self {
            states: [FrameState::Idle; MAX_FRAMES_IN_FLIGHT],
            frame_index: 0,
            image_index: None,
            image_owners: vec![None; image_count as usize],
            frames_completed: 0,
        }
    }

    /// Slot that the next frame will use
    pub const fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Image acquired by the frame in progress
    pub const fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    /// State of one slot
    pub fn state(&self, slot: usize) -> FrameState {
        self.states[slot]
    }

    /// Whether a frame has been begun and not yet ended
    pub fn is_recording(&self) -> bool {
        self.states[self.frame_index] == FrameState::Recording
    }

    /// Number of frames that made it through `end`
    pub const fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// Run `Idle -> Recording` for the current slot
    pub fn begin<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<BeginOutcome> {
        let slot = self.frame_index;
        if self.states[slot] != FrameState::Idle {
            return Err(RenderError::invalid(format!(
                "begin_frame called while slot {slot} is {:?}",
                self.states[slot]
            )));
        }

        self.states[slot] = FrameState::Acquiring;
        match self.acquire(backend, slot) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.states[slot] = FrameState::Idle;
                Err(err)
            }
        }
    }

    fn acquire<B: FrameBackend>(&mut self, backend: &mut B, slot: usize) -> RenderResult<BeginOutcome> {
        backend.wait_for_slot(slot)?;

        let (image_index, suboptimal) = match backend.acquire_next_image(slot)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Acquire reported out-of-date swapchain, dropping frame on slot {slot}");
                self.states[slot] = FrameState::Idle;
                return Ok(BeginOutcome::OutOfDate);
            }
        };

        let owner = self
            .image_owners
            .get_mut(image_index as usize)
            .ok_or_else(|| RenderError::invalid(format!("acquired image {image_index} is outside the swapchain")))?;
        if let Some(other) = owner.filter(|other| *other != slot) {
            return Err(RenderError::invalid(format!(
                "image {image_index} acquired by slot {slot} is still held by slot {other}"
            )));
        }
        *owner = Some(slot);

        backend.reset_slot_fence(slot)?;

        self.image_index = Some(image_index);
        self.states[slot] = FrameState::Recording;
        Ok(BeginOutcome::Ready { image_index, suboptimal })
    }

    /// Run `Recording -> Idle` for the current slot
    ///
    /// The slot advances even when presentation reports an out-of-date chain
    /// or fails, because the submission already happened and will signal the
    /// fence. A failure while recording or submitting leaves the slot index
    /// unchanged and the slot idle, with its fence signaled again.
    pub fn end<B: FrameBackend>(&mut self, backend: &mut B, pixels: &PixelBuffer) -> RenderResult<PresentOutcome> {
        let slot = self.frame_index;
        let image_index = match (self.states[slot], self.image_index) {
            (FrameState::Recording, Some(index)) => index,
            (state, _) => {
                return Err(RenderError::invalid(format!(
                    "end_frame called while slot {slot} is {state:?}"
                )))
            }
        };

        let submitted = backend
            .record_frame(slot, image_index, pixels)
            .and_then(|()| backend.submit_frame(slot));
        if let Err(err) = submitted {
            log::warn!("Frame on slot {slot} failed before submission: {err}");
            self.release_image(image_index);
            self.image_index = None;
            self.states[slot] = FrameState::Idle;
            backend.discard_slot(slot)?;
            return Err(err);
        }
        self.states[slot] = FrameState::Submitted;

        self.states[slot] = FrameState::Presenting;
        let outcome = backend.present(slot, image_index);

        self.release_image(image_index);
        self.states[slot] = FrameState::Idle;
        self.image_index = None;
        self.frame_index = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frames_completed += 1;

        outcome
    }

    /// Drop a frame that was begun but will never be ended
    ///
    /// Used on teardown only; the acquired image is never presented.
    pub fn abandon(&mut self) {
        if let Some(image_index) = self.image_index.take() {
            log::debug!("Abandoning frame on slot {} holding image {image_index}", self.frame_index);
            self.release_image(image_index);
        }
        self.states = [FrameState::Idle; MAX_FRAMES_IN_FLIGHT];
    }

    /// Forget per-image state after the swapchain was rebuilt
    pub fn on_swapchain_recreated(&mut self, image_count: u32) {
        debug_assert!(self.image_index.is_none(), "swapchain recreated mid-frame");
        self.image_owners = vec![None; image_count as usize];
    }

    fn release_image(&mut self, image_index: u32) {
        if let Some(owner) = self.image_owners.get_mut(image_index as usize) {
            *owner = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessBackend;

    fn setup() -> (HeadlessBackend, FrameSynchronizer, PixelBuffer) {
        let backend = HeadlessBackend::new(32, 32).unwrap();
        let sync = FrameSynchronizer::new(backend.swapchain_info().image_count);
        (backend, sync, PixelBuffer::new(32, 32))
    }

    #[test]
    fn test_slot_walks_back_to_idle() {
        let (mut backend, mut sync, pixels) = setup();

        let outcome = sync.begin(&mut backend).unwrap();
        assert!(matches!(outcome, BeginOutcome::Ready { image_index: 0, suboptimal: false }));
        assert_eq!(sync.state(0), FrameState::Recording);
        assert!(sync.is_recording());

        assert_eq!(sync.end(&mut backend, &pixels).unwrap(), PresentOutcome::Presented);
        assert_eq!(sync.state(0), FrameState::Idle);
        assert_eq!(sync.frame_index(), 1);
        assert_eq!(sync.image_index(), None);
        assert_eq!(sync.frames_completed(), 1);
    }

    #[test]
    fn test_end_without_begin_is_rejected() {
        let (mut backend, mut sync, pixels) = setup();
        assert!(matches!(
            sync.end(&mut backend, &pixels),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert_eq!(backend.stats().submissions, 0);
    }

    #[test]
    fn test_double_begin_is_rejected() {
        let (mut backend, mut sync, _) = setup();
        sync.begin(&mut backend).unwrap();
        assert!(sync.begin(&mut backend).is_err());
        // The first frame is still intact
        assert_eq!(sync.state(0), FrameState::Recording);
    }

    #[test]
    fn test_out_of_date_leaves_fence_signaled() {
        let (mut backend, mut sync, pixels) = setup();
        backend.inject_acquire_out_of_date();

        assert_eq!(sync.begin(&mut backend).unwrap(), BeginOutcome::OutOfDate);
        assert_eq!(sync.state(0), FrameState::Idle);
        assert_eq!(sync.frame_index(), 0);

        // Waiting on the same slot again must not hang
        assert!(matches!(sync.begin(&mut backend).unwrap(), BeginOutcome::Ready { .. }));
        sync.end(&mut backend, &pixels).unwrap();
    }

    #[test]
    fn test_acquire_error_returns_slot_to_idle() {
        let (mut backend, mut sync, _) = setup();
        backend.inject_acquire_error(RenderError::SwapchainLost);

        assert_eq!(sync.begin(&mut backend), Err(RenderError::SwapchainLost));
        assert_eq!(sync.state(0), FrameState::Idle);
    }

    #[test]
    fn test_slots_alternate() {
        let (mut backend, mut sync, pixels) = setup();
        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(sync.frame_index());
            sync.begin(&mut backend).unwrap();
            sync.end(&mut backend, &pixels).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert!(backend.stats().max_outstanding <= MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_failed_submission_returns_slot_to_idle() {
        let (mut backend, mut sync, pixels) = setup();
        backend.inject_submit_error(RenderError::Api(ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));

        sync.begin(&mut backend).unwrap();
        assert!(sync.end(&mut backend, &pixels).is_err());
        assert_eq!(sync.state(0), FrameState::Idle);
        assert_eq!(sync.frame_index(), 0);
        assert_eq!(sync.image_index(), None);
        assert_eq!(sync.frames_completed(), 0);

        assert!(matches!(sync.begin(&mut backend).unwrap(), BeginOutcome::Ready { .. }));
        sync.end(&mut backend, &pixels).unwrap();
        assert_eq!(sync.frame_index(), 1);
    }

    #[test]
    fn test_abandon_releases_image() {
        let (mut backend, mut sync, _) = setup();
        sync.begin(&mut backend).unwrap();
        sync.abandon();
        assert!(!sync.is_recording());
        assert_eq!(sync.image_index(), None);
    }
}
