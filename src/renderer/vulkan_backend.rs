use super::context::GpuContext;
use super::frame::{FrameBackend, FrameInput};
use super::gpu_mesh::{GpuBuffer, GpuMeshCache};
use super::shaders::{self, ShaderBinaries};
use super::surface::PlatformSurface;
use super::swapchain::{self, Swapchain};
use super::uniforms::{DrawPushConstants, FrameUniform};
use crate::assets::{AssetChange, AssetId, AssetRegistry};
use crate::config::ViewportConfig;
use crate::error::EngineError;
use crate::mesh::MeshVertex;
use ash::vk;

/// Device-lifetime objects that survive swapchain recreation.
struct DeviceObjects {
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    meshes: GpuMeshCache,
}

/// Per-slot objects: `image_available[i]`, `fences[i]`, `command_buffers[i]`, `uniforms[i]`,
/// `descriptor_sets[i]`.
struct SwapchainObjects {
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: Vec<vk::Semaphore>,
    fences: Vec<vk::Fence>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<GpuBuffer>,
}

impl SwapchainObjects {
    fn empty() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            image_available: Vec::new(),
            fences: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    /// Destroys in reverse creation order. Null handles are skipped, so a partially built set is fine.
    unsafe fn destroy(&mut self, ctx: &GpuContext) {
        let device = &ctx.device;
        for buffer in self.uniforms.drain(..) {
            buffer.destroy(ctx);
        }
        self.descriptor_sets.clear();
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        for fence in self.fences.drain(..) {
            device.destroy_fence(fence, None);
        }
        for semaphore in self.image_available.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        self.command_buffers.clear();
        if self.command_pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.command_pool, None);
        }
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass, None);
        }
        *self = Self::empty();
    }
}

/// [`FrameBackend`] over a real Vulkan device and window surface.
pub struct VulkanBackend {
    platform: Box<dyn PlatformSurface>,
    ctx: Option<GpuContext>,
    surface: vk::SurfaceKHR,
    device_objects: Option<DeviceObjects>,
    swapchain: Option<Swapchain>,
    objects: Option<SwapchainObjects>,
    requested: vk::Extent2D,
    frames_in_flight: usize,
    validation: bool,
    clear_color: [f32; 4],
    shaders: ShaderBinaries,
}

impl VulkanBackend {
    /// Creates the device and device-lifetime objects. The swapchain is built by the first
    /// [`FrameBackend::recreate_swapchain`].
    pub fn new(
        platform: Box<dyn PlatformSurface>,
        width: u32,
        height: u32,
        config: &ViewportConfig,
    ) -> Result<Self, EngineError> {
        let shaders = shaders::load_viewport_shaders(&config.shader_dirs)?;
        let requested = platform.sync_extent(width, height);
        let mut backend = Self {
            platform,
            ctx: None,
            surface: vk::SurfaceKHR::null(),
            device_objects: None,
            swapchain: None,
            objects: None,
            requested,
            frames_in_flight: config.frame_count(),
            validation: config.validation,
            clear_color: config.clear_color,
            shaders,
        };
        backend.create_device()?;
        Ok(backend)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.requested = self.platform.sync_extent(width, height);
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Uploads the meshes a view references so recording never blocks on the registry.
    pub fn prepare_meshes<'a>(&mut self, registry: &AssetRegistry, ids: impl IntoIterator<Item = &'a AssetId>) {
        if let (Some(ctx), Some(objects)) = (self.ctx.as_ref(), self.device_objects.as_mut()) {
            objects.meshes.prepare(ctx, registry, ids);
        }
    }

    pub fn apply_asset_changes(&mut self, changes: &[AssetChange]) -> usize {
        self.device_objects.as_mut().map_or(0, |objects| objects.meshes.apply_changes(changes))
    }

    pub fn invalidate_meshes(&mut self) {
        if let Some(objects) = self.device_objects.as_mut() {
            objects.meshes.invalidate_all();
        }
    }

    fn create_device(&mut self) -> Result<(), EngineError> {
        let (ctx, surface) = GpuContext::new(self.platform.as_ref(), self.validation)?;
        let device_objects = match unsafe { create_device_objects(&ctx, &self.shaders, self.frames_in_flight) } {
            Ok(objects) => objects,
            Err(err) => {
                unsafe { ctx.surface_loader.destroy_surface(surface, None) };
                return Err(err);
            }
        };
        self.surface = surface;
        self.device_objects = Some(device_objects);
        self.ctx = Some(ctx);
        Ok(())
    }

    /// Tears everything down in reverse dependency order, ending with the device and instance.
    fn destroy_all(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        ctx.wait_idle();
        unsafe {
            if let Some(mut objects) = self.objects.take() {
                objects.destroy(&ctx);
            }
            if let Some(mut swapchain) = self.swapchain.take() {
                swapchain.destroy(&ctx);
            }
            if let Some(mut device_objects) = self.device_objects.take() {
                device_objects.meshes.destroy(&ctx);
                ctx.device.destroy_shader_module(device_objects.fragment_module, None);
                ctx.device.destroy_shader_module(device_objects.vertex_module, None);
                ctx.device.destroy_pipeline_layout(device_objects.pipeline_layout, None);
                ctx.device.destroy_descriptor_set_layout(device_objects.descriptor_set_layout, None);
            }
            if self.surface != vk::SurfaceKHR::null() {
                ctx.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
        }
        drop(ctx);
    }

    pub fn shutdown(&mut self) {
        self.destroy_all();
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

impl FrameBackend for VulkanBackend {
    fn surface_extent(&self) -> vk::Extent2D {
        self.requested
    }

    fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    fn recreate_swapchain(&mut self) -> Result<bool, EngineError> {
        let ctx = self.ctx.as_ref().ok_or_else(|| EngineError::FatalGpu("device not initialized".to_string()))?;
        let device_objects =
            self.device_objects.as_ref().ok_or_else(|| EngineError::FatalGpu("device not initialized".to_string()))?;
        if swapchain::is_zero(self.requested) {
            return Ok(false);
        }
        ctx.wait_idle();
        unsafe {
            if let Some(mut objects) = self.objects.take() {
                objects.destroy(ctx);
            }
            let old = self.swapchain.take();
            let created = Swapchain::create(
                ctx,
                self.surface,
                self.requested,
                old.as_ref().map_or(vk::SwapchainKHR::null(), |old| old.handle),
            );
            if let Some(mut old) = old {
                old.destroy(ctx);
            }
            let Some(new_swapchain) = created? else {
                return Ok(false);
            };
            let mut objects = SwapchainObjects::empty();
            if let Err(err) =
                build_swapchain_objects(ctx, device_objects, &new_swapchain, self.frames_in_flight, &mut objects)
            {
                objects.destroy(ctx);
                let mut new_swapchain = new_swapchain;
                new_swapchain.destroy(ctx);
                return Err(err);
            }
            self.requested = new_swapchain.extent;
            self.swapchain = Some(new_swapchain);
            self.objects = Some(objects);
        }
        Ok(true)
    }

    fn wait_frame_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<bool, vk::Result> {
        let (Some(ctx), Some(objects)) = (self.ctx.as_ref(), self.objects.as_ref()) else {
            return Ok(true);
        };
        let Some(fence) = objects.fences.get(slot) else {
            return Ok(true);
        };
        match unsafe { ctx.device.wait_for_fences(std::slice::from_ref(fence), true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn retire_frame(&mut self, _slot: usize) {
        if let (Some(ctx), Some(device_objects)) = (self.ctx.as_ref(), self.device_objects.as_mut()) {
            device_objects.meshes.retire_frame(ctx);
        }
    }

    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> Result<(u32, bool), vk::Result> {
        let (Some(ctx), Some(swapchain), Some(objects)) =
            (self.ctx.as_ref(), self.swapchain.as_ref(), self.objects.as_ref())
        else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        unsafe {
            ctx.swapchain_loader.acquire_next_image(
                swapchain.handle,
                timeout_ns,
                objects.image_available[slot],
                vk::Fence::null(),
            )
        }
    }

    fn reset_frame_fence(&mut self, slot: usize) -> Result<(), vk::Result> {
        let (Some(ctx), Some(objects)) = (self.ctx.as_ref(), self.objects.as_ref()) else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        unsafe { ctx.device.reset_fences(&objects.fences[slot..=slot]) }
    }

    fn record_frame(&mut self, input: &FrameInput<'_>) -> Result<(), vk::Result> {
        let (Some(ctx), Some(device_objects), Some(swapchain), Some(objects)) =
            (self.ctx.as_ref(), self.device_objects.as_ref(), self.swapchain.as_ref(), self.objects.as_ref())
        else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        let slot = input.slot;
        let extent = swapchain.extent;
        let uniform = FrameUniform::new(&input.view.camera, extent, input.time);
        objects.uniforms[slot].write(bytemuck::bytes_of(&uniform));

        let device = &ctx.device;
        let cmd = objects.command_buffers[slot];
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
            let clear = [vk::ClearValue { color: vk::ClearColorValue { float32: self.clear_color } }];
            let pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(objects.render_pass)
                .framebuffer(objects.framebuffers[input.image as usize])
                .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
                .clear_values(&clear);
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, objects.pipeline);
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[vk::Rect2D { offset: vk::Offset2D::default(), extent }]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                device_objects.pipeline_layout,
                0,
                &objects.descriptor_sets[slot..=slot],
                &[],
            );
            for draw in input.draws {
                let Some(mesh) = device_objects.meshes.get(draw.mesh_id) else {
                    continue;
                };
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.indices.buffer, 0, vk::IndexType::UINT32);
                let push = DrawPushConstants::from(draw);
                device.cmd_push_constants(
                    cmd,
                    device_objects.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::bytes_of(&push),
                );
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize, image: u32) -> Result<(), vk::Result> {
        let (Some(ctx), Some(swapchain), Some(objects)) =
            (self.ctx.as_ref(), self.swapchain.as_ref(), self.objects.as_ref())
        else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        let wait = [objects.image_available[slot]];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let commands = [objects.command_buffers[slot]];
        let signal = [swapchain.render_finished[image as usize]];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal);
        unsafe { ctx.device.queue_submit(ctx.graphics_queue, &[submit], objects.fences[slot]) }
    }

    fn present_image(&mut self, image: u32) -> Result<bool, vk::Result> {
        let (Some(ctx), Some(swapchain)) = (self.ctx.as_ref(), self.swapchain.as_ref()) else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        let wait = [swapchain.render_finished[image as usize]];
        let swapchains = [swapchain.handle];
        let indices = [image];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { ctx.swapchain_loader.queue_present(ctx.present_queue, &present) }
    }

    fn recover(&mut self) -> Result<(), EngineError> {
        log::warn!(target: "viewport", "rebuilding device and surface");
        self.destroy_all();
        self.create_device()?;
        if !self.recreate_swapchain()? {
            log::info!(target: "viewport", "device rebuilt; swapchain waits for a valid extent");
        }
        Ok(())
    }
}

unsafe fn create_device_objects(
    ctx: &GpuContext,
    shaders: &ShaderBinaries,
    frames_in_flight: usize,
) -> Result<DeviceObjects, EngineError> {
    let device = &ctx.device;
    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
    let descriptor_set_layout = device
        .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), None)
        .map_err(|e| EngineError::from_vk("descriptor set layout", e))?;

    let push_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: DrawPushConstants::SIZE,
    }];
    let set_layouts = [descriptor_set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts).push_constant_ranges(&push_ranges);
    let pipeline_layout = match device.create_pipeline_layout(&layout_info, None) {
        Ok(layout) => layout,
        Err(err) => {
            device.destroy_descriptor_set_layout(descriptor_set_layout, None);
            return Err(EngineError::from_vk("pipeline layout", err));
        }
    };

    let modules = create_module(ctx, &shaders.vertex).and_then(|vertex| match create_module(ctx, &shaders.fragment) {
        Ok(fragment) => Ok((vertex, fragment)),
        Err(err) => {
            device.destroy_shader_module(vertex, None);
            Err(err)
        }
    });
    let (vertex_module, fragment_module) = match modules {
        Ok(modules) => modules,
        Err(err) => {
            device.destroy_pipeline_layout(pipeline_layout, None);
            device.destroy_descriptor_set_layout(descriptor_set_layout, None);
            return Err(err);
        }
    };

    match GpuMeshCache::new(ctx, frames_in_flight) {
        Ok(meshes) => Ok(DeviceObjects { descriptor_set_layout, pipeline_layout, vertex_module, fragment_module, meshes }),
        Err(err) => {
            device.destroy_shader_module(fragment_module, None);
            device.destroy_shader_module(vertex_module, None);
            device.destroy_pipeline_layout(pipeline_layout, None);
            device.destroy_descriptor_set_layout(descriptor_set_layout, None);
            Err(err)
        }
    }
}

unsafe fn create_module(ctx: &GpuContext, code: &[u32]) -> Result<vk::ShaderModule, EngineError> {
    ctx.device
        .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(code), None)
        .map_err(|e| EngineError::from_vk("shader module", e))
}

/// Fills `out` step by step so a failure part-way leaves only valid handles to destroy.
unsafe fn build_swapchain_objects(
    ctx: &GpuContext,
    device_objects: &DeviceObjects,
    swapchain: &Swapchain,
    frames_in_flight: usize,
    out: &mut SwapchainObjects,
) -> Result<(), EngineError> {
    let device = &ctx.device;
    let vk_err = |context: &'static str| move |e: vk::Result| EngineError::from_vk(context, e);

    let attachments = [vk::AttachmentDescription::default()
        .format(swapchain.format.format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];
    let color_refs =
        [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];
    let pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    out.render_pass = device.create_render_pass(&pass_info, None).map_err(vk_err("render pass"))?;
    out.pipeline = create_pipeline(ctx, device_objects, out.render_pass)?;

    for view in &swapchain.image_views {
        let views = [*view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(out.render_pass)
            .attachments(&views)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);
        out.framebuffers.push(device.create_framebuffer(&info, None).map_err(vk_err("framebuffer"))?);
    }

    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(ctx.graphics_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    out.command_pool = device.create_command_pool(&pool_info, None).map_err(vk_err("command pool"))?;
    let alloc = vk::CommandBufferAllocateInfo::default()
        .command_pool(out.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(frames_in_flight as u32);
    out.command_buffers = device.allocate_command_buffers(&alloc).map_err(vk_err("command buffers"))?;

    let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
    for _ in 0..frames_in_flight {
        out.image_available
            .push(device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None).map_err(vk_err("semaphore"))?);
        out.fences.push(device.create_fence(&fence_info, None).map_err(vk_err("fence"))?);
    }

    let pool_sizes = [vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: frames_in_flight as u32 }];
    let descriptor_pool_info =
        vk::DescriptorPoolCreateInfo::default().max_sets(frames_in_flight as u32).pool_sizes(&pool_sizes);
    out.descriptor_pool =
        device.create_descriptor_pool(&descriptor_pool_info, None).map_err(vk_err("descriptor pool"))?;
    let layouts = vec![device_objects.descriptor_set_layout; frames_in_flight];
    let set_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(out.descriptor_pool).set_layouts(&layouts);
    out.descriptor_sets = device.allocate_descriptor_sets(&set_info).map_err(vk_err("descriptor sets"))?;

    for set in &out.descriptor_sets {
        let buffer = GpuBuffer::new(ctx, FrameUniform::SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let buffer_info = [vk::DescriptorBufferInfo { buffer: buffer.buffer, offset: 0, range: FrameUniform::SIZE }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(*set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        device.update_descriptor_sets(&[write], &[]);
        out.uniforms.push(buffer);
    }
    Ok(())
}

unsafe fn create_pipeline(
    ctx: &GpuContext,
    device_objects: &DeviceObjects,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline, EngineError> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(device_objects.vertex_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(device_objects.fragment_module)
            .name(c"main"),
    ];
    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: MeshVertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = [
        vertex_attribute(0, vk::Format::R32G32B32_SFLOAT, MeshVertex::POSITION_OFFSET),
        vertex_attribute(1, vk::Format::R32G32B32_SFLOAT, MeshVertex::NORMAL_OFFSET),
        vertex_attribute(2, vk::Format::R32G32B32A32_SFLOAT, MeshVertex::COLOR_OFFSET),
        vertex_attribute(3, vk::Format::R32G32_SFLOAT, MeshVertex::UV_OFFSET),
        vertex_attribute(4, vk::Format::R32G32B32A32_SFLOAT, MeshVertex::TANGENT_OFFSET),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
    // The projection flips Y, which turns counter-clockwise world winding clockwise on screen and back.
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample =
        vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments =
        [vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(device_objects.pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);
    let pipelines = ctx
        .device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        .map_err(|(_, e)| EngineError::from_vk("graphics pipeline", e))?;
    pipelines.into_iter().next().ok_or_else(|| EngineError::FatalGpu("driver returned no pipeline".to_string()))
}

fn vertex_attribute(location: u32, format: vk::Format, offset: u32) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription { location, binding: 0, format, offset }
}
