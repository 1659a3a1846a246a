use super::surface::PlatformSurface;
use crate::error::EngineError;
use ash::vk;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance, device and queues shared by everything the viewport creates.
pub struct GpuContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl GpuContext {
    /// Creates the instance, a surface for `platform`, and a device whose queues can render to and
    /// present on that surface. The surface is returned to the caller, who owns it.
    pub fn new(platform: &dyn PlatformSurface, validation: bool) -> Result<(Self, vk::SurfaceKHR), EngineError> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| EngineError::FatalGpu(format!("failed to load the Vulkan library: {e}")))?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Aetherion Viewport")
                .application_version(vk::make_api_version(0, 0, 4, 0))
                .engine_name(c"Aetherion")
                .engine_version(vk::make_api_version(0, 0, 4, 0))
                .api_version(vk::API_VERSION_1_1);

            let mut extension_names = platform.required_extensions()?;
            let validation = validation && layer_available(&entry, VALIDATION_LAYER);
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            let layer_names = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);
            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| EngineError::from_vk("create instance", e))?;

            let debug = if validation { create_debug_messenger(&entry, &instance) } else { None };
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let surface = match platform.create_surface(&entry, &instance) {
                Ok(surface) => surface,
                Err(err) => {
                    destroy_instance(&instance, debug);
                    return Err(err);
                }
            };

            let selected = select_device(&instance, &surface_loader, surface);
            let (physical_device, graphics_family, present_family) = match selected {
                Ok(selected) => selected,
                Err(err) => {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug);
                    return Err(err);
                }
            };

            let priorities = [1.0];
            let mut queue_infos = vec![vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family)
                .queue_priorities(&priorities)];
            if present_family != graphics_family {
                queue_infos.push(
                    vk::DeviceQueueCreateInfo::default().queue_family_index(present_family).queue_priorities(&priorities),
                );
            }
            let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&device_extensions);
            let device = match instance.create_device(physical_device, &device_info, None) {
                Ok(device) => device,
                Err(err) => {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug);
                    return Err(EngineError::from_vk("create device", err));
                }
            };

            let properties = instance.get_physical_device_properties(physical_device);
            let name = CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy();
            log::info!(
                target: "viewport",
                "using {name} (graphics family {graphics_family}, present family {present_family}, validation {})",
                if validation { "on" } else { "off" }
            );

            let context = Self {
                swapchain_loader: ash::khr::swapchain::Device::new(&instance, &device),
                graphics_queue: device.get_device_queue(graphics_family, 0),
                present_queue: device.get_device_queue(present_family, 0),
                memory_properties: instance.get_physical_device_memory_properties(physical_device),
                entry,
                instance,
                surface_loader,
                physical_device,
                device,
                graphics_family,
                present_family,
                debug,
            };
            Ok((context, surface))
        }
    }

    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
            })
            .map(|(index, _)| index as u32)
    }

    pub fn wait_idle(&self) {
        if let Err(err) = unsafe { self.device.device_wait_idle() } {
            log::warn!(target: "viewport", "device_wait_idle failed: {err:?}");
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();
            self.device.destroy_device(None);
            destroy_instance(&self.instance, self.debug.take());
        }
    }
}

unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((loader, messenger)) = debug {
        loader.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

unsafe fn layer_available(entry: &ash::Entry, layer: &CStr) -> bool {
    let available = entry.enumerate_instance_layer_properties().unwrap_or_default();
    let found = available.iter().any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == layer);
    if !found {
        log::warn!(target: "viewport", "validation requested but {} is not installed", layer.to_string_lossy());
    }
    found
}

/// First device with a graphics queue, a queue that presents to `surface`, and swapchain support.
/// Discrete GPUs are preferred.
unsafe fn select_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32, u32), EngineError> {
    let devices =
        instance.enumerate_physical_devices().map_err(|e| EngineError::from_vk("enumerate physical devices", e))?;
    let mut candidates = Vec::new();
    for device in devices {
        let families = instance.get_physical_device_queue_family_properties(device);
        let Some(graphics) = families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32)
        else {
            continue;
        };
        let supports_present = |index: u32| {
            surface_loader.get_physical_device_surface_support(device, index, surface).unwrap_or(false)
        };
        let present = if supports_present(graphics) {
            Some(graphics)
        } else {
            (0..families.len() as u32).find(|index| supports_present(*index))
        };
        let Some(present) = present else {
            continue;
        };
        let has_swapchain = instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
            .iter()
            .any(|ext| CStr::from_ptr(ext.extension_name.as_ptr()) == ash::khr::swapchain::NAME);
        if !has_swapchain {
            continue;
        }
        let discrete =
            instance.get_physical_device_properties(device).device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        candidates.push((discrete, device, graphics, present));
    }
    candidates.sort_by_key(|(discrete, ..)| !*discrete);
    candidates
        .first()
        .map(|(_, device, graphics, present)| (*device, *graphics, *present))
        .ok_or_else(|| EngineError::NotFound("no Vulkan device can present to this surface".to_string()))
}

unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    match loader.create_debug_utils_messenger(&info, None) {
        Ok(messenger) => Some((loader, messenger)),
        Err(err) => {
            log::warn!(target: "viewport", "debug messenger unavailable: {err:?}");
            None
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!(target: "vulkan", "{message}");
    } else {
        log::debug!(target: "vulkan", "{message}");
    }
    vk::FALSE
}
