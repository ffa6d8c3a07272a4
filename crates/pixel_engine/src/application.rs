//! Application driver and window arena
//!
//! [`Application`] owns the GLFW handle, the shared device context and every
//! open window. Windows are addressed by generational [`WindowId`] keys, so a
//! destroyed window's id never aliases a later one.

use slotmap::SlotMap;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::core::config::AppConfig;
use crate::foundation::logging;
use crate::render::backends::vulkan::{DeviceContext, Surface, VulkanBackend, VulkanInstance};
use crate::render::{FrameBackend, RenderError, RenderResult, Renderer};
use crate::window::{self, Window, WindowError, WindowEvent};

slotmap::new_key_type! {
    /// Identifies a window owned by an [`Application`]
    pub struct WindowId;
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Windowing system error
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Presentation error
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The id does not name a live window
    #[error("Invalid window id {0:?}")]
    InvalidWindow(WindowId),
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;

type LoopHook = Box<dyn FnMut(&mut Application) -> i32>;

// Renderer first: its surface must go before the native window
struct WindowEntry {
    renderer: Renderer<VulkanBackend>,
    window: Window,
}

/// Owns the windows and drives the frame loop
pub struct Application {
    config: AppConfig,
    windows: SlotMap<WindowId, WindowEntry>,
    context: Option<Rc<DeviceContext>>,
    glfw: Option<glfw::Glfw>,
    hook: Option<LoopHook>,
    end_requested: bool,
}

impl Application {
    /// Create an application; no window system or GPU work happens yet
    pub fn new(config: AppConfig) -> AppResult<Self> {
        logging::init_with_level(&config.engine.log_level);
        log::debug!("Application '{}' created", config.renderer.application_name);

        Ok(Self {
            config,
            windows: SlotMap::with_key(),
            context: None,
            glfw: None,
            hook: None,
            end_requested: false,
        })
    }

    /// Open a `width` x `height` window with its own pixel buffer
    ///
    /// The first window also selects the GPU and creates the device context
    /// every later window shares.
    pub fn new_window(&mut self, width: u32, height: u32, title: &str) -> AppResult<WindowId> {
        if width == 0 || height == 0 {
            return Err(RenderError::invalid(format!("window size {width}x{height} has no area")).into());
        }
        let first_window = self.context.is_none();
        if first_window {
            self.config.validate()?;
        }

        let (window, extensions) = {
            let glfw = self.glfw()?;
            let window = Window::new(glfw, title, width, height)?;
            let extensions = if first_window {
                window::required_instance_extensions(glfw)?
            } else {
                Vec::new()
            };
            (window, extensions)
        };

        let instance = match &self.context {
            Some(context) => Rc::clone(context.instance()),
            None => Rc::new(VulkanInstance::new(&extensions, &self.config.renderer)?),
        };

        let surface = Surface::new(Rc::clone(&instance), &window)?;
        let context = match self.context.clone() {
            Some(context) => {
                surface.ensure_presentable(&context)?;
                context
            }
            None => {
                let context = Rc::new(DeviceContext::new(instance, &surface)?);
                self.context = Some(Rc::clone(&context));
                context
            }
        };

        let backend = VulkanBackend::new(context, surface, width, height, &self.config.renderer)?;
        let renderer = Renderer::new(backend, width, height);
        let id = self.windows.insert(WindowEntry { renderer, window });

        log::info!("Opened window '{title}' ({width}x{height}) as {id:?}");
        Ok(id)
    }

    /// Write one pixel of a window's buffer
    ///
    /// Coordinates outside the buffer are ignored. The pixel shows from the
    /// next presented frame on and stays until overwritten.
    pub fn pixel_put(&mut self, win: WindowId, x: i32, y: i32, color: u32) -> AppResult<()> {
        self.entry_mut(win)?.renderer.put_pixel(x, y, color);
        Ok(())
    }

    /// Cursor position relative to the window's top-left corner
    ///
    /// `None` for an unknown or destroyed window.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_mouse_pos(&self, win: WindowId) -> Option<(i32, i32)> {
        let (x, y) = self.windows.get(win)?.window.cursor_pos();
        Some((x.floor() as i32, y.floor() as i32))
    }

    /// Status-code form of [`get_mouse_pos`](Self::get_mouse_pos)
    ///
    /// Writes the position and returns 0, or returns -1 and leaves `x` and
    /// `y` untouched.
    pub fn mouse_pos_status(&self, win: WindowId, x: &mut i32, y: &mut i32) -> i32 {
        match self.get_mouse_pos(win) {
            Some((px, py)) => {
                *x = px;
                *y = py;
                0
            }
            None => -1,
        }
    }

    /// Close a window and release its GPU resources
    ///
    /// Waits for the device to go idle first. The id is dead afterwards even
    /// if teardown reports an error.
    pub fn destroy_window(&mut self, win: WindowId) -> AppResult<()> {
        let mut entry = self.windows.remove(win).ok_or(AppError::InvalidWindow(win))?;
        entry.renderer.destroy()?;
        log::info!("Destroyed window {win:?}");
        Ok(())
    }

    /// Install the per-frame callback
    ///
    /// Runs once per loop iteration, after events are handled and before the
    /// windows are presented. The returned status is logged and otherwise
    /// ignored.
    pub fn loop_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Self) -> i32 + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    /// Ask [`run`](Self::run) to return after the current iteration
    pub fn loop_end(&mut self) {
        self.end_requested = true;
    }

    /// Drive the frame loop
    ///
    /// Returns when [`loop_end`](Self::loop_end) is called, when the last
    /// window closes, or on an error that is not confined to one window. A
    /// window whose frame fails on its own, for example because its surface
    /// was lost, is destroyed and the others keep running.
    pub fn run(&mut self) -> AppResult<()> {
        self.end_requested = false;
        let budget = self.config.engine.frame_budget();
        log::info!("Entering main loop with {} window(s)", self.windows.len());

        while !self.end_requested {
            if self.windows.is_empty() {
                log::info!("All windows closed");
                break;
            }

            let frame_start = Instant::now();
            self.step()?;

            if let Some(remaining) = budget.and_then(|b| b.checked_sub(frame_start.elapsed())) {
                std::thread::sleep(remaining);
            }
        }

        log::info!("Main loop finished");
        Ok(())
    }

    /// Destroy every window, then the device context
    ///
    /// Also runs on drop. Later calls only clean up windows opened since.
    pub fn shutdown(&mut self) {
        for (id, mut entry) in self.windows.drain() {
            if let Err(e) = entry.renderer.destroy() {
                log::error!("Failed to destroy window {id:?}: {e}");
            }
        }

        if let Some(context) = self.context.take() {
            context.destroy();
        }
    }

    /// Whether `win` names a live window
    pub fn contains_window(&self, win: WindowId) -> bool {
        self.windows.contains_key(win)
    }

    /// Number of open windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Renderer of a live window
    pub fn renderer(&self, win: WindowId) -> Option<&Renderer<VulkanBackend>> {
        self.windows.get(win).map(|entry| &entry.renderer)
    }

    /// Configuration the application was created with
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    fn glfw(&mut self) -> AppResult<&mut glfw::Glfw> {
        if self.glfw.is_none() {
            self.glfw = Some(window::init_glfw()?);
            log::debug!("GLFW initialized");
        }
        self.glfw
            .as_mut()
            .ok_or_else(|| AppError::from(WindowError::InitializationFailed("GLFW handle missing".to_string())))
    }

    fn entry_mut(&mut self, win: WindowId) -> AppResult<&mut WindowEntry> {
        self.windows.get_mut(win).ok_or(AppError::InvalidWindow(win))
    }

    /// One loop iteration: events, hook, then a frame per window
    fn step(&mut self) -> AppResult<()> {
        if let Some(glfw) = self.glfw.as_mut() {
            glfw.poll_events();
        }

        let close_on_escape = self.config.engine.close_on_escape;
        let mut closed = Vec::new();
        for (id, entry) in &mut self.windows {
            for event in entry.window.drain_events() {
                match event {
                    WindowEvent::FramebufferResized(width, height) => entry.renderer.resize(width, height),
                    WindowEvent::EscapePressed if close_on_escape => entry.window.set_should_close(true),
                    WindowEvent::EscapePressed | WindowEvent::CloseRequested => {}
                }
            }
            if entry.window.should_close() {
                closed.push(id);
            }
        }
        for id in closed {
            self.destroy_window(id)?;
        }

        if let Some(mut hook) = self.hook.take() {
            let status = hook(self);
            if status != 0 {
                log::trace!("Loop hook returned {status}");
            }
            // The hook may have installed a replacement
            if self.hook.is_none() {
                self.hook = Some(hook);
            }
        }
        if self.end_requested {
            return Ok(());
        }

        let mut lost = Vec::new();
        for (id, entry) in &mut self.windows {
            if present_window(&mut entry.renderer)? == WindowStatus::Lost {
                lost.push(id);
            }
        }
        for id in lost {
            log::warn!("Closing window {id:?} after a presentation failure");
            if let Err(e) = self.destroy_window(id) {
                log::error!("Failed to destroy window {id:?}: {e}");
            }
        }
        Ok(())
    }
}

/// Whether a window survived its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowStatus {
    Open,
    Lost,
}

/// Run one frame for a window
///
/// Errors that only concern the window mark it lost; device loss is
/// returned since every window shares the device.
fn present_window<B: FrameBackend>(renderer: &mut Renderer<B>) -> RenderResult<WindowStatus> {
    let frame = renderer
        .begin_frame()
        .and_then(|ready| if ready { renderer.end_frame() } else { Ok(()) });
    match frame {
        Ok(()) => Ok(WindowStatus::Open),
        Err(err) if err.is_device_fatal() => Err(err),
        Err(err) => {
            log::error!("Frame failed: {err}");
            Ok(WindowStatus::Lost)
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessBackend;

    fn app() -> Application {
        Application::new(AppConfig::new("application tests")).unwrap()
    }

    #[test]
    fn test_unknown_window_is_rejected() {
        let mut app = app();
        let win = WindowId::default();

        assert!(matches!(app.pixel_put(win, 1, 1, 0xFF0000), Err(AppError::InvalidWindow(id)) if id == win));
        assert!(matches!(app.destroy_window(win), Err(AppError::InvalidWindow(_))));
        assert!(!app.contains_window(win));
        assert!(app.renderer(win).is_none());
    }

    #[test]
    fn test_mouse_query_on_unknown_window() {
        let app = app();
        let win = WindowId::default();
        let (mut x, mut y) = (7, 9);

        assert_eq!(app.get_mouse_pos(win), None);
        assert_eq!(app.mouse_pos_status(win, &mut x, &mut y), -1);
        assert_eq!((x, y), (7, 9));
    }

    #[test]
    fn test_run_without_windows_returns_immediately() {
        let mut app = app();
        app.loop_hook(|app| {
            app.loop_end();
            1
        });

        app.run().unwrap();
        assert_eq!(app.window_count(), 0);
    }

    #[test]
    fn test_zero_sized_window_is_rejected_before_touching_glfw() {
        let mut app = app();
        assert!(matches!(app.new_window(0, 600, "empty"), Err(AppError::Render(RenderError::InvalidOperation { .. }))));
        assert!(app.glfw.is_none());
    }

    #[test]
    fn test_invalid_config_is_reported_on_first_window() {
        let mut config = AppConfig::new("bad");
        config.renderer.application_name.clear();
        let mut app = Application::new(config).unwrap();

        assert!(matches!(app.new_window(800, 600, "bad"), Err(AppError::Config(_))));
        assert!(app.glfw.is_none());
    }

    #[test]
    fn test_lost_surface_closes_only_that_window() {
        let mut renderer = Renderer::new(HeadlessBackend::new(64, 48).unwrap(), 64, 48);
        assert_eq!(present_window(&mut renderer), Ok(WindowStatus::Open));

        renderer.backend_mut().inject_acquire_error(RenderError::SwapchainLost);
        assert_eq!(present_window(&mut renderer), Ok(WindowStatus::Lost));

        renderer.backend_mut().inject_present_error(RenderError::SwapchainLost);
        assert_eq!(present_window(&mut renderer), Ok(WindowStatus::Lost));
    }

    #[test]
    fn test_device_loss_stops_the_loop() {
        let mut renderer = Renderer::new(HeadlessBackend::new(64, 48).unwrap(), 64, 48);
        renderer.backend_mut().inject_present_error(RenderError::DeviceLost);
        assert_eq!(present_window(&mut renderer), Err(RenderError::DeviceLost));
    }

    #[test]
    fn test_shutdown_is_repeatable() {
        let mut app = app();
        app.shutdown();
        app.shutdown();
        assert!(app.context.is_none());
    }
}
