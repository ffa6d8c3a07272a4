//! Frame loop tests driving a renderer over the headless backend

use ash::vk;
use pixel_engine::render::{
    color, FrameBackend, HeadlessBackend, HeadlessEvent, PresentOutcome, RenderError, Renderer,
    MAX_FRAMES_IN_FLIGHT,
};

fn renderer(width: u32, height: u32) -> Renderer<HeadlessBackend> {
    Renderer::new(HeadlessBackend::new(width, height).unwrap(), width, height)
}

fn run_frame(renderer: &mut Renderer<HeadlessBackend>) {
    assert!(renderer.begin_frame().unwrap(), "frame was skipped");
    renderer.end_frame().unwrap();
}

/// One red pixel in an 800x600 window is presented and the slot advances
#[test]
fn test_single_pixel_frame() {
    let mut renderer = renderer(800, 600);
    assert_eq!(renderer.frame_index(), 0);

    assert!(renderer.begin_frame().unwrap());
    renderer.put_pixel(10, 10, 0xFF0000);
    renderer.end_frame().unwrap();

    assert_eq!(renderer.frame_index(), 1);
    let presented = renderer.backend().last_presented().unwrap();
    assert_eq!(presented.get_pixel(10, 10), Some(0xFF0000));
    assert_eq!(presented.get_pixel(11, 10), Some(0));
}

/// Rebuilding at an unchanged size keeps the swapchain's shape
#[test]
fn test_recreate_at_same_size_is_stable() {
    let mut renderer = renderer(800, 600);
    let before = renderer.swapchain_info();

    renderer.resize(800, 600);
    run_frame(&mut renderer);
    let after = renderer.swapchain_info();

    assert_eq!(renderer.backend().stats().recreations, 1);
    assert_eq!(after.image_count, before.image_count);
    assert_eq!(after.format, before.format);
    assert_eq!(after.extent, before.extent);

    let again = renderer.backend_mut().recreate_swapchain(800, 600).unwrap();
    assert_eq!(again, after);
}

/// A slot's fence only blocks on the frame submitted two frames earlier
#[test]
fn test_fence_waits_track_frames_in_flight() {
    let mut renderer = renderer(640, 480);

    for frame in 0..10u64 {
        assert!(renderer.begin_frame().unwrap());
        let stats = renderer.backend().stats();
        assert_eq!(stats.fence_waits, frame + 1);
        assert_eq!(
            stats.blocking_waits,
            frame.saturating_sub(MAX_FRAMES_IN_FLIGHT as u64 - 1),
            "frame {frame}"
        );
        renderer.end_frame().unwrap();
        assert!(renderer.backend().outstanding() <= MAX_FRAMES_IN_FLIGHT);
    }

    let stats = renderer.backend().stats();
    assert_eq!(stats.submissions, 10);
    assert_eq!(stats.presents, 10);
    assert_eq!(stats.fence_signals, stats.blocking_waits);
    assert_eq!(stats.max_outstanding, MAX_FRAMES_IN_FLIGHT);
}

/// Resizing on every frame never overlaps more than two submissions
#[test]
fn test_resize_every_frame() {
    let mut renderer = renderer(320, 240);

    for frame in 0..100u32 {
        let width = 200 + (frame * 37) % 300;
        let height = 150 + (frame * 53) % 200;
        renderer.backend_mut().resize_surface(width, height);
        renderer.resize(width, height);

        if renderer.begin_frame().unwrap() {
            renderer.put_pixel(frame as i32, frame as i32, color::rgb(0, 255, 0));
            renderer.end_frame().unwrap();
        }
        assert!(renderer.backend().outstanding() <= MAX_FRAMES_IN_FLIGHT);
        assert_eq!(renderer.swapchain_info().extent, (width, height));
    }

    let stats = renderer.backend().stats();
    assert_eq!(stats.recreations, 100);
    assert!(stats.max_outstanding <= MAX_FRAMES_IN_FLIGHT);

    renderer.destroy().unwrap();
    assert!(renderer.backend().is_destroyed());
    assert_eq!(renderer.backend().outstanding(), 0);
}

/// Every pixel written reaches the presented image unchanged
#[test]
fn test_presented_image_matches_pixels() {
    let (width, height) = (64u8, 48u8);
    let mut renderer = renderer(u32::from(width), u32::from(height));

    for y in 0..height {
        for x in 0..width {
            renderer.put_pixel(i32::from(x), i32::from(y), color::rgba(x * 4, y * 5, x ^ y, 0xFF));
        }
    }
    run_frame(&mut renderer);
    assert_eq!(renderer.backend().last_presented(), Some(renderer.pixels()));

    // The buffer persists, so an untouched frame presents the same pattern
    run_frame(&mut renderer);
    let presented = renderer.backend().last_presented().unwrap();
    assert_eq!(presented, renderer.pixels());
    assert_eq!(presented.get_pixel(5, 7), Some(color::rgba(20, 35, 5 ^ 7, 0xFF)));
}

/// Tearing down between begin and end drains the GPU before releasing
#[test]
fn test_destroy_mid_frame() {
    let mut renderer = renderer(320, 240);
    run_frame(&mut renderer);
    assert!(renderer.begin_frame().unwrap());
    assert!(renderer.is_frame_in_progress());

    renderer.destroy().unwrap();

    let backend = renderer.backend();
    assert!(backend.is_destroyed());
    assert_eq!(backend.outstanding(), 0);
    assert!(backend.events().ends_with(&[
        HeadlessEvent::WaitIdle,
        HeadlessEvent::ReleasePipeline,
        HeadlessEvent::ReleaseSwapchain,
        HeadlessEvent::ReleaseSurface,
        HeadlessEvent::ReleaseSyncObjects,
    ]));

    let events = backend.events().len();
    renderer.destroy().unwrap();
    assert_eq!(renderer.backend().events().len(), events);
    assert!(matches!(renderer.begin_frame(), Err(RenderError::InvalidOperation { .. })));
}

/// An out-of-date acquire skips the frame and rebuilds the swapchain
#[test]
fn test_out_of_date_acquire_skips_frame() {
    let mut renderer = renderer(800, 600);
    renderer.backend_mut().inject_acquire_out_of_date();

    assert!(!renderer.begin_frame().unwrap());
    let stats = renderer.backend().stats();
    assert_eq!(stats.recreations, 1);
    assert_eq!(stats.submissions, 0);
    assert_eq!(renderer.frame_index(), 0);
    assert!(!renderer.is_frame_in_progress());

    run_frame(&mut renderer);
    assert_eq!(renderer.frame_index(), 1);
}

/// A suboptimal acquire still renders, then rebuilds after presenting
#[test]
fn test_suboptimal_acquire_rebuilds_after_present() {
    let mut renderer = renderer(800, 600);
    renderer.backend_mut().inject_acquire_suboptimal();

    assert!(renderer.begin_frame().unwrap());
    assert_eq!(renderer.backend().stats().recreations, 0);
    renderer.end_frame().unwrap();

    let stats = renderer.backend().stats();
    assert_eq!(stats.presents, 1);
    assert_eq!(stats.recreations, 1);
    assert_eq!(renderer.frame_index(), 1);
}

/// Out-of-date and suboptimal presents both rebuild; the slot still advances
#[test]
fn test_present_outcomes_trigger_recreation() {
    let mut renderer = renderer(400, 300);

    renderer.backend_mut().inject_present_outcome(PresentOutcome::OutOfDate);
    run_frame(&mut renderer);
    assert_eq!(renderer.frame_index(), 1);
    assert_eq!(renderer.backend().stats().recreations, 1);

    renderer.backend_mut().inject_present_outcome(PresentOutcome::Suboptimal);
    run_frame(&mut renderer);
    assert_eq!(renderer.frame_index(), 0);
    assert_eq!(renderer.backend().stats().recreations, 2);

    for _ in 0..4 {
        run_frame(&mut renderer);
    }
    assert_eq!(renderer.backend().stats().recreations, 2);
}

/// A zero-sized window skips frames until it has area again
#[test]
fn test_minimized_window_defers_recreation() {
    let mut renderer = renderer(640, 480);
    renderer.resize(0, 0);

    assert!(!renderer.begin_frame().unwrap());
    assert!(!renderer.begin_frame().unwrap());
    let stats = renderer.backend().stats();
    assert_eq!(stats.recreations, 0);
    assert_eq!(stats.fence_waits, 0);

    renderer.resize(1024, 768);
    run_frame(&mut renderer);
    assert_eq!(renderer.swapchain_info().extent, (1024, 768));
    assert_eq!(renderer.backend().stats().recreations, 1);
}

/// Fatal acquire errors reach the caller and leave the slot usable
#[test]
fn test_acquire_error_propagates() {
    let mut renderer = renderer(320, 240);
    renderer.backend_mut().inject_acquire_error(RenderError::DeviceLost);

    assert_eq!(renderer.begin_frame(), Err(RenderError::DeviceLost));
    assert!(!renderer.is_frame_in_progress());

    run_frame(&mut renderer);
    assert_eq!(renderer.frame_index(), 1);
}

/// Ending a frame that never began is rejected
#[test]
fn test_end_without_begin() {
    let mut renderer = renderer(320, 240);
    assert!(matches!(renderer.end_frame(), Err(RenderError::InvalidOperation { .. })));
    assert_eq!(renderer.backend().stats().submissions, 0);
}

/// A recording failure leaves the window usable for the next frame
#[test]
fn test_record_failure_allows_retry() {
    let mut renderer = renderer(320, 240);
    renderer.backend_mut().inject_record_error(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));

    assert!(renderer.begin_frame().unwrap());
    assert_eq!(
        renderer.end_frame(),
        Err(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    );
    assert!(!renderer.is_frame_in_progress());
    assert_eq!(renderer.frame_index(), 0);
    assert_eq!(renderer.image_index(), None);
    assert_eq!(renderer.backend().stats().discards, 1);

    // The discarded slot's fence is signaled again, so retrying does not hang
    for _ in 0..3 {
        run_frame(&mut renderer);
    }
    let stats = renderer.backend().stats();
    assert_eq!(stats.submissions, 3);
    assert_eq!(stats.recreations, 1);
    assert_eq!(renderer.frame_index(), 1);
}

/// A submission failure is handled like a recording failure
#[test]
fn test_submit_failure_allows_retry() {
    let mut renderer = renderer(320, 240);
    renderer.put_pixel(3, 4, color::rgb(0, 0, 255));
    renderer.backend_mut().inject_submit_error(RenderError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY));

    assert!(renderer.begin_frame().unwrap());
    assert!(renderer.end_frame().is_err());
    assert_eq!(renderer.backend().outstanding(), 0);
    assert_eq!(renderer.backend().stats().presents, 0);

    run_frame(&mut renderer);
    let presented = renderer.backend().last_presented().unwrap();
    assert_eq!(presented.get_pixel(3, 4), Some(color::rgb(0, 0, 255)));
}

/// Lost surfaces and lost devices at present reach the caller after the slot advances
#[test]
fn test_present_errors_propagate() {
    let mut renderer = renderer(400, 300);

    renderer.backend_mut().inject_present_error(RenderError::SwapchainLost);
    assert!(renderer.begin_frame().unwrap());
    assert_eq!(renderer.end_frame(), Err(RenderError::SwapchainLost));
    assert_eq!(renderer.frame_index(), 1);
    assert!(!renderer.is_frame_in_progress());
    assert_eq!(renderer.backend().outstanding(), 1);

    renderer.backend_mut().inject_present_error(RenderError::DeviceLost);
    assert!(renderer.begin_frame().unwrap());
    assert_eq!(renderer.end_frame(), Err(RenderError::DeviceLost));
    assert_eq!(renderer.frame_index(), 0);

    renderer.destroy().unwrap();
    assert_eq!(renderer.backend().outstanding(), 0);
}
