//! Pixel upload resources
//!
//! Each frame slot owns a staging buffer and a sampled image the size of the
//! window's pixel buffer. Recording a frame copies the CPU pixels into the
//! staging buffer and records the buffer-to-image copy, so a slot never
//! overwrites an image the GPU may still be sampling for the other slot.

use ash::{vk, Device};

use crate::render::backends::vulkan::buffer::{allocate_memory, Buffer};
use crate::render::backends::vulkan::commands::CommandRecorder;
use crate::render::{PixelBuffer, RenderError, RenderResult};

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Nearest-neighbour sampler clamped to the edge, so pixels stay crisp
    pub fn new_nearest(device: Device) -> RenderResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.create_sampler(&create_info, None) }.map_err(RenderError::from)?;
        Ok(Self { device, sampler })
    }

    /// Get the sampler handle
    pub const fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Texel format matching the packed `0xAARRGGBB` pixels
///
/// Uses the sRGB variant when the swapchain does, so colors written by the
/// application reach the screen unchanged.
pub fn texture_format(swapchain_format: vk::Format) -> vk::Format {
    match swapchain_format {
        vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
        _ => vk::Format::B8G8R8A8_UNORM,
    }
}

/// Staging buffer and sampled image for one frame slot
pub struct PixelUpload {
    device: Device,
    staging: Buffer,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    descriptor_set: vk::DescriptorSet,
}

impl PixelUpload {
    /// Create resources for a `width` x `height` pixel buffer
    ///
    /// An empty buffer still gets a 1x1 image so the descriptor stays valid.
    pub fn new(
        device: Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        width: u32,
        height: u32,
        format: vk::Format,
        descriptor_set: vk::DescriptorSet,
    ) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: width.max(1),
            height: height.max(1),
        };
        let byte_len = u64::from(extent.width) * u64::from(extent.height) * 4;

        let staging = Buffer::new(
            device.clone(),
            memory_properties,
            byte_len,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes(&vec![0; byte_len as usize])?;

        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_create_info, None) }.map_err(RenderError::from)?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate_memory(
            &device,
            memory_properties,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut upload = Self {
            device,
            staging,
            image,
            memory,
            view: vk::ImageView::null(),
            extent,
            descriptor_set,
        };

        unsafe { upload.device.bind_image_memory(image, memory, 0) }.map_err(RenderError::from)?;

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        upload.view = unsafe { upload.device.create_image_view(&view_create_info, None) }.map_err(RenderError::from)?;

        Ok(upload)
    }

    /// Image view sampled by the fragment shader
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Descriptor set binding this slot's image
    pub const fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Copy `pixels` to staging and record the transfer into the image
    ///
    /// The slot's previous submission must have completed.
    pub fn record(&self, recorder: &mut CommandRecorder, pixels: &PixelBuffer) -> RenderResult<()> {
        if (pixels.width(), pixels.height()) != (self.extent.width, self.extent.height) && pixels.byte_len() > 0 {
            return Err(RenderError::invalid(format!(
                "pixel buffer is {}x{} but the upload image is {}x{}",
                pixels.width(),
                pixels.height(),
                self.extent.width,
                self.extent.height
            )));
        }
        self.staging.write_bytes(pixels.as_bytes())?;

        // Previous contents are fully overwritten
        recorder.image_barrier(
            self.image,
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
        );
        recorder.copy_buffer_to_image(self.staging.handle(), self.image, self.extent);
        recorder.image_barrier(
            self.image,
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
            (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        );
        Ok(())
    }
}

impl Drop for PixelUpload {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_format_follows_swapchain_encoding() {
        assert_eq!(texture_format(vk::Format::B8G8R8A8_SRGB), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(texture_format(vk::Format::R8G8B8A8_SRGB), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(texture_format(vk::Format::B8G8R8A8_UNORM), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(texture_format(vk::Format::A2B10G10R10_UNORM_PACK32), vk::Format::B8G8R8A8_UNORM);
    }
}
