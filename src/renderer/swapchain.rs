use super::context::GpuContext;
use crate::error::EngineError;
use ash::vk;

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Driver extent unless it reports the "decided by the swapchain" sentinel, in which case the requested
/// size is clamped to the supported range.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count.max(2);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Swapchain images, their views, and the per-image render-finished semaphores.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_finished: Vec<vk::Semaphore>,
}

impl Swapchain {
    /// Builds a swapchain for `surface`. `Ok(None)` when the chosen extent is zero.
    pub fn create(
        ctx: &GpuContext,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
        old: vk::SwapchainKHR,
    ) -> Result<Option<Self>, EngineError> {
        let (capabilities, formats, modes) = unsafe {
            let capabilities = ctx
                .surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, surface)
                .map_err(|e| EngineError::from_vk("surface capabilities", e))?;
            let formats = ctx
                .surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, surface)
                .map_err(|e| EngineError::from_vk("surface formats", e))?;
            let modes = ctx
                .surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, surface)
                .map_err(|e| EngineError::from_vk("present modes", e))?;
            (capabilities, formats, modes)
        };

        let extent = choose_extent(&capabilities, requested);
        if is_zero(extent) {
            return Ok(None);
        }
        let format = choose_surface_format(&formats)
            .ok_or_else(|| EngineError::FatalGpu("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes);
        let families = [ctx.graphics_family, ctx.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(choose_pre_transform(&capabilities))
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        create_info = if ctx.graphics_family != ctx.present_family {
            create_info.image_sharing_mode(vk::SharingMode::CONCURRENT).queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            format,
            present_mode,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            render_finished: Vec::new(),
        };
        unsafe {
            swapchain.handle = ctx
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| EngineError::from_vk("create swapchain", e))?;
            if let Err(err) = swapchain.create_image_resources(ctx) {
                swapchain.destroy(ctx);
                return Err(err);
            }
        }
        log::debug!(
            target: "viewport",
            "swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            swapchain.images.len(),
            format.format,
            present_mode
        );
        Ok(Some(swapchain))
    }

    unsafe fn create_image_resources(&mut self, ctx: &GpuContext) -> Result<(), EngineError> {
        self.images = ctx
            .swapchain_loader
            .get_swapchain_images(self.handle)
            .map_err(|e| EngineError::from_vk("swapchain images", e))?;
        for image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = ctx
                .device
                .create_image_view(&view_info, None)
                .map_err(|e| EngineError::from_vk("swapchain image view", e))?;
            self.image_views.push(view);
            let semaphore = ctx
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| EngineError::from_vk("render-finished semaphore", e))?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// # Safety
    /// The device must be idle with respect to every object owned here.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        for semaphore in self.render_finished.drain(..) {
            ctx.device.destroy_semaphore(semaphore, None);
        }
        for view in self.image_views.drain(..) {
            ctx.device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_SRGB, color_space: PREFERRED_COLOR_SPACE },
            vk::SurfaceFormatKHR { format: PREFERRED_FORMAT, color_space: PREFERRED_COLOR_SPACE },
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
        assert_eq!(choose_surface_format(&formats[..1]), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_when_offered() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn sentinel_extent_clamps_requested_size() {
        let caps = capabilities(vk::Extent2D { width: u32::MAX, height: u32::MAX });
        let extent = choose_extent(&caps, vk::Extent2D { width: 8, height: 9000 });
        assert_eq!(extent, vk::Extent2D { width: 16, height: 4096 });

        let fixed = capabilities(vk::Extent2D { width: 0, height: 0 });
        assert!(is_zero(choose_extent(&fixed, vk::Extent2D { width: 800, height: 600 })));
    }

    #[test]
    fn image_count_is_at_least_two_and_bounded() {
        let mut caps = capabilities(vk::Extent2D { width: 1, height: 1 });
        assert_eq!(choose_image_count(&caps), 2);
        caps.min_image_count = 3;
        caps.max_image_count = 3;
        assert_eq!(choose_image_count(&caps), 3);
    }
}
