//! Rendering error taxonomy
//!
//! Swapchain out-of-date and suboptimal conditions are recoverable and are
//! absorbed by the [`Renderer`](crate::render::Renderer); everything else
//! propagates to the caller.

use ash::vk;
use thiserror::Error;

/// Rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// No physical device offers graphics, presentation and the swapchain extension
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// The window handle cannot be turned into a presentable surface
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The swapchain no longer matches the surface and must be recreated
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// The swapchain still works but no longer matches the surface exactly
    #[error("Swapchain is suboptimal")]
    Suboptimal,

    /// The surface itself is gone; the window must be torn down
    #[error("Surface lost")]
    SwapchainLost,

    /// The logical device was lost; nothing on it can be recovered
    #[error("Device lost")]
    DeviceLost,

    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Backend initialization failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Shader loading or pipeline creation failed
    #[error("Shader error: {0}")]
    Shader(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Whether the renderer handles this error by recreating the swapchain
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate | Self::Suboptimal)
    }

    /// Whether the error invalidates the whole device rather than one window
    pub const fn is_device_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            vk::Result::SUBOPTIMAL_KHR => Self::Suboptimal,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SwapchainLost,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Api(other),
        }
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_mapping() {
        assert_eq!(RenderError::from(vk::Result::ERROR_OUT_OF_DATE_KHR), RenderError::SwapchainOutOfDate);
        assert_eq!(RenderError::from(vk::Result::SUBOPTIMAL_KHR), RenderError::Suboptimal);
        assert_eq!(RenderError::from(vk::Result::ERROR_SURFACE_LOST_KHR), RenderError::SwapchainLost);
        assert_eq!(RenderError::from(vk::Result::ERROR_DEVICE_LOST), RenderError::DeviceLost);
        assert_eq!(
            RenderError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            RenderError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(RenderError::SwapchainOutOfDate.is_recoverable());
        assert!(RenderError::Suboptimal.is_recoverable());
        assert!(!RenderError::SwapchainLost.is_recoverable());
        assert!(!RenderError::DeviceLost.is_recoverable());
        assert!(RenderError::DeviceLost.is_device_fatal());
        assert!(!RenderError::SwapchainLost.is_device_fatal());
    }
}
