//! Vulkan swapchain management
//!
//! Handles swapchain creation and recreation. The selection of format,
//! present mode, extent and image count is done by free functions so it can
//! be checked without a device.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::backend::{AcquireOutcome, PresentOutcome};
use crate::render::backends::vulkan::{DeviceContext, Surface};
use crate::render::{RenderError, RenderResult};

/// Prefer `B8G8R8A8_SRGB` with a non-linear sRGB color space, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| RenderError::SurfaceCreation("surface reports no formats".to_string()))
}

/// Prefer `MAILBOX`, else `FIFO` (always available)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's current extent when it dictates one, else clamp the window size
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped at the maximum when the surface has one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Swapchain wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    destroyed: bool,
}

impl Swapchain {
    /// Build a swapchain for a `width` x `height` window
    ///
    /// `old_swapchain` may be null; when set the driver can hand its
    /// resources over to the new chain.
    pub fn new(
        context: &DeviceContext,
        surface: &Surface,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let physical = context.physical_device().device;
        let caps = surface.capabilities(physical)?;
        let format = choose_surface_format(&surface.formats(physical)?)?;
        let present_mode = choose_present_mode(&surface.present_modes(physical)?);
        let extent = choose_extent(&caps, width, height);
        let image_count = choose_image_count(&caps);

        let queue_families = [context.graphics_family(), context.present_family()];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        create_info = if queue_families[0] == queue_families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        };

        let loader = context.swapchain_loader().clone();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.map_err(RenderError::from)?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        let mut chain = Self {
            device: context.device().clone(),
            loader,
            swapchain,
            images,
            image_views: Vec::new(),
            format,
            extent,
            destroyed: false,
        };
        chain.create_image_views()?;

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            chain.images.len(),
            format.format,
            present_mode
        );
        Ok(chain)
    }

    /// Wait for the device to go idle and build a replacement chain
    ///
    /// The returned chain takes over from `self`, which the caller drops
    /// afterwards.
    pub fn recreate(&self, context: &DeviceContext, surface: &Surface, width: u32, height: u32) -> RenderResult<Self> {
        context.wait_idle()?;
        Self::new(context, surface, width, height, self.swapchain)
    }

    fn create_image_views(&mut self) -> RenderResult<()> {
        // On failure the views created so far are released by `destroy`
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.create_image_view(&create_info, None) }.map_err(RenderError::from)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Acquire the next image, signaling `image_available` when it is ready
    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, image_available, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation once `render_finished` signals
    pub fn present(&self, queue: vk::Queue, render_finished: vk::Semaphore, image_index: u32) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Get swapchain extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub const fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of presentable images
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Get swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Destroy image views and the swapchain
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.image_views.clear();
        self.destroyed = true;
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 1024,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_uses_current_extent_when_fixed() {
        let extent = choose_extent(&caps(2, 3, (1280, 720)), 800, 600);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_extent_clamps_window_size() {
        let free = caps(2, 3, (u32::MAX, u32::MAX));
        let extent = choose_extent(&free, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));

        let extent = choose_extent(&free, 4000, 4);
        assert_eq!((extent.width, extent.height), (2048, 16));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(2, 3, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(3, 3, (1, 1))), 3);
        // Zero maximum means unlimited
        assert_eq!(choose_image_count(&caps(2, 0, (1, 1))), 3);
    }

    #[test]
    fn test_surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap().format, srgb.format);
        assert_eq!(choose_surface_format(&[unorm]).unwrap().format, unorm.format);
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::SurfaceCreation(_))
        ));
    }

    #[test]
    fn test_present_mode_preference() {
        use vk::PresentModeKHR as Mode;
        assert_eq!(choose_present_mode(&[Mode::FIFO, Mode::MAILBOX]), Mode::MAILBOX);
        assert_eq!(choose_present_mode(&[Mode::IMMEDIATE, Mode::FIFO]), Mode::FIFO);
        assert_eq!(choose_present_mode(&[]), Mode::FIFO);
    }
}
