//! Vulkan implementation of the frame backend
//!
//! One [`VulkanBackend`] exists per window. It owns the window's surface,
//! swapchain, framebuffers, pipeline, per-slot upload resources and
//! synchronization objects, and shares the device through
//! `Rc<DeviceContext>`.

use ash::vk;
use std::rc::Rc;

use crate::core::config::RendererConfig;
use crate::render::backend::{AcquireOutcome, FrameBackend, PresentOutcome, SwapchainInfo, MAX_FRAMES_IN_FLIGHT};
use crate::render::backends::vulkan::buffer::Buffer;
use crate::render::backends::vulkan::commands::{CommandPool, CommandRecorder};
use crate::render::backends::vulkan::descriptor::{write_image_sampler, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::render::backends::vulkan::pipeline::GraphicsPipeline;
use crate::render::backends::vulkan::render_pass::{Framebuffer, RenderPass};
use crate::render::backends::vulkan::sync::FrameSync;
use crate::render::backends::vulkan::texture::{texture_format, PixelUpload, Sampler};
use crate::render::backends::vulkan::{DeviceContext, Surface, Swapchain};
use crate::render::vertex::{QUAD_INDICES, QUAD_VERTICES};
use crate::render::{PixelBuffer, RenderError, RenderResult};

/// Pipeline state and the resources the draw reads from
///
/// Field order is drop order: uploads reference descriptor sets from the
/// pool, the pipeline references the render pass and set layout. Fields with
/// a leading underscore are only held for their drop.
struct PipelineResources {
    uploads: Vec<PixelUpload>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    pipeline: GraphicsPipeline,
    _descriptor_pool: DescriptorPool,
    _descriptor_layout: DescriptorSetLayout,
    _sampler: Sampler,
    render_pass: RenderPass,
}

/// Per-slot synchronization objects and command buffers
struct SyncResources {
    frames: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: CommandPool,
}

/// Presents one window through a Vulkan swapchain
pub struct VulkanBackend {
    context: Rc<DeviceContext>,
    clear_value: vk::ClearValue,
    pipeline: Option<PipelineResources>,
    framebuffers: Vec<Framebuffer>,
    swapchain: Option<Swapchain>,
    surface: Option<Surface>,
    sync: Option<SyncResources>,
    info: SwapchainInfo,
}

impl VulkanBackend {
    /// Build every per-window resource for a `width` x `height` window
    ///
    /// The pixel upload images keep this size for the backend's lifetime.
    pub fn new(
        context: Rc<DeviceContext>,
        surface: Surface,
        width: u32,
        height: u32,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let device = context.device().clone();
        let memory_properties = context.physical_device().memory_properties;

        let swapchain = Swapchain::new(&context, &surface, width, height, vk::SwapchainKHR::null())?;
        let swapchain_format = swapchain.format().format;

        let render_pass = RenderPass::new_presentation_pass(device.clone(), swapchain_format)?;
        let descriptor_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            descriptor_layout.handle(),
            &config.shaders,
        )?;
        let sampler = Sampler::new_nearest(device.clone())?;

        let descriptor_pool = DescriptorPool::new(device.clone(), MAX_FRAMES_IN_FLIGHT as u32)?;
        let descriptor_sets = descriptor_pool.allocate(&[descriptor_layout.handle(); MAX_FRAMES_IN_FLIGHT])?;
        let uploads = descriptor_sets
            .into_iter()
            .map(|set| {
                let upload = PixelUpload::new(
                    device.clone(),
                    &memory_properties,
                    width,
                    height,
                    texture_format(swapchain_format),
                    set,
                )?;
                write_image_sampler(&device, set, upload.view(), sampler.handle());
                Ok(upload)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let vertex_buffer = Buffer::with_data(
            device.clone(),
            &memory_properties,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &QUAD_VERTICES,
        )?;
        let index_buffer = Buffer::with_data(
            device.clone(),
            &memory_properties,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &QUAD_INDICES,
        )?;

        let framebuffers =
            Framebuffer::for_swapchain(&device, render_pass.handle(), swapchain.image_views(), swapchain.extent())?;

        let command_pool = CommandPool::new(device.clone(), context.graphics_family())?;
        let command_buffers = command_pool.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?;
        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(&device))
            .collect::<RenderResult<Vec<_>>>()?;

        let info = Self::info_of(&swapchain);
        let [r, g, b, a] = config.clear_color;

        Ok(Self {
            context,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: [r, g, b, a] },
            },
            pipeline: Some(PipelineResources {
                uploads,
                vertex_buffer,
                index_buffer,
                pipeline,
                _descriptor_pool: descriptor_pool,
                _descriptor_layout: descriptor_layout,
                _sampler: sampler,
                render_pass,
            }),
            framebuffers,
            swapchain: Some(swapchain),
            surface: Some(surface),
            sync: Some(SyncResources {
                frames,
                command_buffers,
                _command_pool: command_pool,
            }),
            info,
        })
    }

    fn info_of(swapchain: &Swapchain) -> SwapchainInfo {
        let extent = swapchain.extent();
        SwapchainInfo {
            extent: (extent.width, extent.height),
            image_count: swapchain.image_count(),
            format: swapchain.format().format,
        }
    }

    /// Device context shared with other windows
    pub const fn context(&self) -> &Rc<DeviceContext> {
        &self.context
    }

    fn released() -> RenderError {
        RenderError::invalid("window resources already released")
    }

    fn frame(&self, slot: usize) -> RenderResult<&FrameSync> {
        self.sync
            .as_ref()
            .ok_or_else(Self::released)?
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::invalid(format!("frame slot {slot} out of range")))
    }

    fn swapchain(&self) -> RenderResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(Self::released)
    }
}

impl FrameBackend for VulkanBackend {
    fn swapchain_info(&self) -> SwapchainInfo {
        self.info
    }

    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.frame(slot)?.in_flight.wait(u64::MAX)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RenderResult<()> {
        self.frame(slot)?.in_flight.reset()
    }

    fn acquire_next_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let semaphore = self.frame(slot)?.image_available.handle();
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn record_frame(&mut self, slot: usize, image_index: u32, pixels: &PixelBuffer) -> RenderResult<()> {
        let resources = self.pipeline.as_ref().ok_or_else(Self::released)?;
        let sync = self.sync.as_ref().ok_or_else(Self::released)?;
        let extent = self.swapchain()?.extent();
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| RenderError::invalid(format!("no framebuffer for image {image_index}")))?;
        let upload = &resources.uploads[slot];

        let mut recorder = CommandRecorder::new(sync.command_buffers[slot], self.context.device().clone());
        recorder.begin()?;
        upload.record(&mut recorder, pixels)?;
        {
            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let mut pass = recorder.begin_render_pass(
                resources.render_pass.handle(),
                framebuffer.handle(),
                render_area,
                &[self.clear_value],
            )?;
            pass.set_full_viewport(extent);
            pass.bind_pipeline(resources.pipeline.handle());
            pass.bind_descriptor_set(resources.pipeline.layout(), upload.descriptor_set());
            pass.bind_vertex_buffer(resources.vertex_buffer.handle());
            pass.bind_index_buffer(resources.index_buffer.handle(), vk::IndexType::UINT16);
            pass.draw_indexed(QUAD_INDICES.len() as u32);
        }
        recorder.end()?;
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize) -> RenderResult<()> {
        let sync = self.sync.as_ref().ok_or_else(Self::released)?;
        let frame = &sync.frames[slot];

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [sync.command_buffers[slot]];
        let signal_semaphores = [frame.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context
                .device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], frame.in_flight.handle())
        }
        .map_err(RenderError::from)
    }

    fn discard_slot(&mut self, slot: usize) -> RenderResult<()> {
        // A binary semaphore cannot be unsignaled from the host, so the slot
        // gets fresh objects once nothing can still reference the old ones
        self.context.wait_idle()?;
        let device = self.context.device().clone();
        let sync = self.sync.as_mut().ok_or_else(Self::released)?;
        let frame = sync
            .frames
            .get_mut(slot)
            .ok_or_else(|| RenderError::invalid(format!("frame slot {slot} out of range")))?;
        *frame = FrameSync::new(&device)?;
        log::debug!("Replaced synchronization objects of slot {slot}");
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let render_finished = self.frame(slot)?.render_finished.handle();
        self.swapchain()?
            .present(self.context.present_queue(), render_finished, image_index)
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<SwapchainInfo> {
        let surface = self.surface.as_ref().ok_or_else(Self::released)?;
        let render_pass = self
            .pipeline
            .as_ref()
            .ok_or_else(Self::released)?
            .render_pass
            .handle();
        let old = self.swapchain.as_ref().ok_or_else(Self::released)?;

        // Waits for the device before building the new chain
        let new = old.recreate(&self.context, surface, width, height)?;
        if new.format().format != self.info.format {
            return Err(RenderError::Initialization(format!(
                "surface format changed from {:?} to {:?}",
                self.info.format,
                new.format().format
            )));
        }

        self.framebuffers.clear();
        self.swapchain = Some(new);
        let swapchain = self.swapchain()?;
        let framebuffers = Framebuffer::for_swapchain(
            self.context.device(),
            render_pass,
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let info = Self::info_of(swapchain);

        self.framebuffers = framebuffers;
        self.info = info;
        log::debug!(
            "Swapchain recreated: {}x{}, {} images",
            info.extent.0,
            info.extent.1,
            info.image_count
        );
        Ok(info)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.context.wait_idle()
    }

    fn destroy(&mut self) -> RenderResult<()> {
        if self.sync.is_none() {
            return Ok(());
        }

        drop(self.pipeline.take());
        self.framebuffers.clear();
        drop(self.swapchain.take());
        drop(self.surface.take());
        drop(self.sync.take());
        log::debug!("Window resources released");
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.sync.is_none() {
            return;
        }
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Device wait before window teardown failed: {e}");
        }
        if let Err(e) = self.destroy() {
            log::error!("Window teardown failed: {e}");
        }
    }
}
