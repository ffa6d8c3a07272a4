//! Vulkan surface management
//!
//! Binds a GLFW window to a `VkSurfaceKHR` and queries what the selected
//! device supports on it.

use ash::vk;
use std::rc::Rc;

use crate::render::backends::vulkan::{DeviceContext, VulkanInstance};
use crate::render::{RenderError, RenderResult};
use crate::window::Window;

/// Vulkan surface wrapper for presentation
pub struct Surface {
    instance: Rc<VulkanInstance>,
    surface: vk::SurfaceKHR,
    destroyed: bool,
}

impl Surface {
    /// Create a surface for `window`
    pub fn new(instance: Rc<VulkanInstance>, window: &Window) -> RenderResult<Self> {
        let surface = window
            .create_vulkan_surface(instance.instance().handle())
            .map_err(|e| RenderError::SurfaceCreation(e.to_string()))?;

        Ok(Self {
            instance,
            surface,
            destroyed: false,
        })
    }

    /// Fail unless the context's present queue can present to this surface
    ///
    /// The device is picked for the first window; later windows have to be
    /// presentable from the same queue family.
    pub fn ensure_presentable(&self, context: &DeviceContext) -> RenderResult<()> {
        let physical = context.physical_device().device;
        let supported = self
            .supports_present(physical, context.present_family())
            .map_err(|e| RenderError::SurfaceCreation(format!("Failed to query present support: {e}")))?;
        if supported {
            Ok(())
        } else {
            Err(RenderError::SurfaceCreation(format!(
                "queue family {} cannot present to this window",
                context.present_family()
            )))
        }
    }

    /// Get the underlying surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get surface capabilities for a physical device
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(RenderError::from)
    }

    /// Get surface formats for a physical device
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(RenderError::from)
    }

    /// Get surface present modes for a physical device
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> RenderResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(RenderError::from)
    }

    /// Check if a queue family supports presentation to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> RenderResult<bool> {
        unsafe {
            self.instance.surface_loader().get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.surface,
            )
        }
        .map_err(RenderError::from)
    }

    /// Destroy the surface; the swapchain built on it must be gone
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        unsafe {
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
        self.destroyed = true;
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.destroy();
    }
}
