//! Vulkan instance and device context
//!
//! One [`VulkanInstance`] and one [`DeviceContext`] exist per process. They
//! are created when the first window opens and shared through `Rc` by the
//! application and every window backend.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::cell::Cell;
use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use std::rc::Rc;

use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::Surface;
use crate::render::{RenderError, RenderResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"pixel_engine";

/// Vulkan instance wrapper
///
/// Owns the loader entry, the instance, the surface extension loader and,
/// when validation is enabled, a debug messenger forwarding to `log`.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: SurfaceLoader,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    destroyed: Cell<bool>,
}

impl VulkanInstance {
    /// Create an instance enabling the given window-system extensions
    pub fn new(required_extensions: &[String], config: &RendererConfig) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Initialization(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| RenderError::Initialization(format!("Invalid application name: {e}")))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RenderError::Initialization(format!("Invalid extension name: {e}")))?;
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let validation = config.validation_enabled() && Self::validation_layer_available(&entry);
        if config.validation_enabled() && !validation {
            log::warn!("Validation requested but {VALIDATION_LAYER:?} is not installed");
        }

        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(RenderError::from)?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = SurfaceLoader::new(&entry, &instance);
        log::info!(
            "Vulkan instance created (validation {})",
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug,
            destroyed: Cell::new(false),
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(RenderError::from)
    }

    /// Vulkan entry
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Vulkan instance
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Surface extension loader
    pub const fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    /// Whether validation messages are being forwarded to the log
    pub const fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    /// Destroy the debug messenger and the instance
    ///
    /// Every surface and device created from this instance must be gone.
    /// Later calls do nothing.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Validation layer callback routing messages to `log` by severity
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Physical device selection and capabilities
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device that can render and present to `surface`
    pub fn select_suitable_device(instance: &VulkanInstance, surface: &Surface) -> RenderResult<Self> {
        let devices = unsafe { instance.instance().enumerate_physical_devices() }.map_err(RenderError::from)?;
        if devices.is_empty() {
            return Err(RenderError::NoSuitableDevice("no Vulkan devices present".to_string()));
        }

        let mut rejections = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(reason) => rejections.push(reason),
            }
        }

        Err(RenderError::NoSuitableDevice(rejections.join("; ")))
    }

    fn evaluate_device(instance: &VulkanInstance, device: vk::PhysicalDevice, surface: &Surface) -> Result<Self, String> {
        let raw = instance.instance();
        let properties = unsafe { raw.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let queue_families = unsafe { raw.get_physical_device_queue_family_properties(device) };

        // Find graphics and present queue families
        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0u32..).zip(queue_families.iter()) {
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }
            let present_support = surface
                .supports_present(device, index)
                .map_err(|e| format!("{name}: {e}"))?;
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family.ok_or_else(|| format!("{name}: no graphics queue family"))?;
        let present_family = present_family.ok_or_else(|| format!("{name}: cannot present to the surface"))?;

        // Check device extensions support
        let extensions = unsafe { raw.enumerate_device_extension_properties(device) }
            .map_err(|e| format!("{name}: {e:?}"))?;
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(format!("{name}: swapchain extension not supported"));
        }

        Ok(Self {
            device,
            properties,
            memory_properties: unsafe { raw.get_physical_device_memory_properties(device) },
            graphics_family,
            present_family,
        })
    }

    /// Device name reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Process-wide device context
///
/// Holds the logical device, its graphics and present queues and the
/// swapchain loader. Shared by `Rc` between the application and every
/// window backend.
pub struct DeviceContext {
    instance: Rc<VulkanInstance>,
    physical_device: PhysicalDeviceInfo,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: SwapchainLoader,
    destroyed: Cell<bool>,
}

impl DeviceContext {
    /// Select a device able to present to `surface` and create the logical device
    pub fn new(instance: Rc<VulkanInstance>, surface: &Surface) -> RenderResult<Self> {
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance, surface)?;

        let unique_families: HashSet<u32> = [physical_device.graphics_family, physical_device.present_family]
            .into_iter()
            .collect();
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .instance()
                .create_device(physical_device.device, &create_info, None)
        }
        .map_err(RenderError::from)?;

        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance.instance(), &device);

        log::info!(
            "Device context created (graphics family {}, present family {})",
            physical_device.graphics_family,
            physical_device.present_family
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
            destroyed: Cell::new(false),
        })
    }

    /// Instance the device was created from
    pub const fn instance(&self) -> &Rc<VulkanInstance> {
        &self.instance
    }

    /// Selected physical device
    pub const fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Logical device
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Swapchain extension loader
    pub const fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Graphics queue
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue
    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Graphics queue family index
    pub const fn graphics_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Present queue family index
    pub const fn present_family(&self) -> u32 {
        self.physical_device.present_family
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::from)
    }

    /// Whether `destroy` has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Destroy the logical device, then the debug messenger and instance
    ///
    /// Every window must have been destroyed first. Later calls do nothing.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Device wait before teardown failed: {e:?}");
            }
            self.device.destroy_device(None);
        }
        self.instance.destroy();
        log::info!("Device context destroyed");
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
