//! Window management using GLFW
//!
//! Windows are created without a client API so Vulkan can present to them.
//! The GLFW library handle is shared by the application; each [`Window`]
//! owns its native window and event receiver.

use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The native window could not be created
    #[error("Window creation failed: {title}")]
    CreationFailed {
        /// Title of the window that failed
        title: String,
    },

    /// GLFW reports no Vulkan support on this system
    #[error("Vulkan is not supported by the windowing system")]
    VulkanUnsupported,

    /// The windowing system refused to create a surface
    #[error("Failed to create Vulkan surface: {0:?}")]
    SurfaceCreation(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Initialize GLFW for Vulkan rendering
pub fn init_glfw() -> WindowResult<glfw::Glfw> {
    let mut glfw = glfw::init(|error, description| {
        log::error!("GLFW error {error:?}: {description}");
    })
    .map_err(|e| WindowError::InitializationFailed(format!("{e:?}")))?;

    if !glfw.vulkan_supported() {
        return Err(WindowError::VulkanUnsupported);
    }

    // Configure for Vulkan (no OpenGL context)
    glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
    glfw.window_hint(glfw::WindowHint::Resizable(true));
    Ok(glfw)
}

/// Vulkan instance extensions GLFW needs to create surfaces
pub fn required_instance_extensions(glfw: &glfw::Glfw) -> WindowResult<Vec<String>> {
    glfw.get_required_instance_extensions()
        .ok_or(WindowError::VulkanUnsupported)
}

/// Window input and lifecycle events the application reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Framebuffer size changed, in pixels
    FramebufferResized(u32, u32),
    /// The user asked to close the window
    CloseRequested,
    /// The escape key was pressed
    EscapePressed,
}

/// GLFW window wrapper
pub struct Window {
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window with the given title and size
    pub fn new(glfw: &mut glfw::Glfw, title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or_else(|| WindowError::CreationFailed {
                title: title.to_string(),
            })?;

        // Set up event polling
        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::debug!("Created window '{title}' ({width}x{height})");
        Ok(Self { window, events })
    }

    /// Whether the window has been asked to close
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Set or clear the close flag
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (clamp_dimension(width), clamp_dimension(height))
    }

    /// Cursor position relative to the window's top-left corner
    pub fn cursor_pos(&self) -> (f64, f64) {
        self.window.get_cursor_pos()
    }

    /// Drain events received since the last poll
    ///
    /// Call after `Glfw::poll_events`. Events the application does not use
    /// are dropped.
    pub fn drain_events(&self) -> Vec<WindowEvent> {
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| match event {
                glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowEvent::FramebufferResized(
                    clamp_dimension(width),
                    clamp_dimension(height),
                )),
                glfw::WindowEvent::Close => Some(WindowEvent::CloseRequested),
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    Some(WindowEvent::EscapePressed)
                }
                _ => None,
            })
            .collect()
    }

    /// Create a Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }
}

fn clamp_dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_dimensions_clamp_to_zero() {
        assert_eq!(clamp_dimension(-5), 0);
        assert_eq!(clamp_dimension(0), 0);
        assert_eq!(clamp_dimension(640), 640);
    }
}
