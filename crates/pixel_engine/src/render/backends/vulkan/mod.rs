//! Vulkan backend
//!
//! RAII wrappers over the Vulkan objects needed to present a pixel buffer,
//! and [`VulkanBackend`], which implements the frame backend on top of them.

pub mod backend;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use backend::VulkanBackend;
pub use context::{DeviceContext, PhysicalDeviceInfo, VulkanInstance};
pub use surface::Surface;
pub use swapchain::Swapchain;
