//! Vulkan implementation of [`GpuBackend`] on top of `ash`.
//!
//! The backend takes over a logical device created by the platform bootstrap. The instance
//! and surface stay owned by the bootstrap and must outlive the backend.

use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;
use lumen_core::collections::SmallVec;
use lumen_core::log;
use parking_lot::Mutex;

use super::*;
use crate::queue::Queue;
use crate::utility::find_memory_type;
use crate::MAX_COLOR_ATTACHMENTS;

/// Swapchain preferences.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub preferred_format: vk::Format,
    pub preferred_color_space: vk::ColorSpaceKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub num_back_buffers: u32,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_format: vk::Format::B8G8R8A8_SRGB,
            preferred_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            num_back_buffers: 3,
        }
    }
}

/// A presentation surface handed over by the platform layer.
pub struct SurfaceDesc {
    pub loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    /// Window size, used when the surface leaves the extent up to the swapchain.
    pub extent: vk::Extent2D,
    pub config: SwapchainConfig,
}

/// Everything the bootstrap created.
pub struct VulkanBackendDesc {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    /// Indexed by [`QueueType::index`]. Queue types may share a native queue.
    pub queues: [Queue; QueueType::COUNT],
    pub surface: Option<SurfaceDesc>,
}

struct NativeQueue {
    queue: Queue,
    /// Shared between queue types that alias the same native queue.
    lock: Arc<Mutex<()>>,
}

struct VulkanSwapchain {
    loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    window_extent: vk::Extent2D,
    num_back_buffers: u32,
    images: Vec<vk::Image>,
}

pub struct VulkanBackend {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queues: [NativeQueue; QueueType::COUNT],
    swapchain: Mutex<Option<VulkanSwapchain>>,
}

impl VulkanBackend {
    #[profiling::function]
    pub fn new(desc: VulkanBackendDesc) -> VkResult<Self> {
        let VulkanBackendDesc { instance, physical_device, device, queues, surface } = desc;

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let mut locks: Vec<(vk::Queue, Arc<Mutex<()>>)> = Vec::with_capacity(QueueType::COUNT);
        let queues = queues.map(|queue| {
            let lock = match locks.iter().find(|(handle, _)| *handle == queue.handle()) {
                Some((_, lock)) => lock.clone(),
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.push((queue.handle(), lock.clone()));
                    lock
                }
            };
            NativeQueue { queue, lock }
        });

        let swapchain = match surface {
            Some(surface) => Some(VulkanSwapchain::new(&instance, physical_device, &device, surface)?),
            None => None,
        };

        log::info!(
            "Vulkan backend ready: graphics family {}, compute family {}, transfer family {}",
            queues[0].queue.family_index(),
            queues[1].queue.family_index(),
            queues[2].queue.family_index()
        );

        Ok(Self {
            instance,
            physical_device,
            memory_properties,
            device,
            queues,
            swapchain: Mutex::new(swapchain),
        })
    }

    #[inline]
    pub fn device(&self) -> &ash::Device { &self.device }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice { self.physical_device }

    /// Window size the next swapchain recreation should use.
    pub fn resize(&self, extent: vk::Extent2D) {
        if let Some(swapchain) = self.swapchain.lock().as_mut() {
            swapchain.window_extent = extent;
        }
    }

    fn native_queue(&self, queue: QueueType) -> &NativeQueue {
        &self.queues[queue.index()]
    }

    fn allocate(&self, requirements: vk::MemoryRequirements, flags: vk::MemoryPropertyFlags) -> VkResult<vk::DeviceMemory> {
        let memory_type = find_memory_type(&self.memory_properties, requirements.memory_type_bits, flags)
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe { self.device.allocate_memory(&info, None) }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed while destroying the device: {:?}", err);
            }
            if let Some(swapchain) = self.swapchain.get_mut().take() {
                swapchain.loader.destroy_swapchain(swapchain.swapchain, None);
            }
            self.device.destroy_device(None);
        }
    }
}

impl VulkanSwapchain {
    fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        surface: SurfaceDesc,
    ) -> VkResult<Self> {
        let SurfaceDesc { loader: surface_loader, surface, extent, config } = surface;

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };
        let format = choose_surface_format(&formats, &config);
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface)? };
        let present_mode = choose_present_mode(&present_modes, &config);

        let mut swapchain = Self {
            loader: ash::khr::swapchain::Device::new(instance, device),
            surface_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            format,
            present_mode,
            extent,
            window_extent: extent,
            num_back_buffers: config.num_back_buffers,
            images: Vec::new(),
        };
        swapchain.create_or_recreate(physical_device)?;
        Ok(swapchain)
    }

    #[profiling::function]
    fn create_or_recreate(&mut self, physical_device: vk::PhysicalDevice) -> VkResult<()> {
        let capabilities = unsafe {
            self.surface_loader.get_physical_device_surface_capabilities(physical_device, self.surface)?
        };
        let extent = get_swapchain_extent(&capabilities, self.window_extent);

        let mut image_count = self.num_back_buffers.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        log::info!(
            "Creating swapchain: {:?} {:?}, {}x{}, {} images, {:?}",
            self.format.format,
            self.format.color_space,
            extent.width,
            extent.height,
            image_count,
            self.present_mode
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        self.swapchain = swapchain;
        self.extent = extent;
        Ok(())
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR], config: &SwapchainConfig) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == config.preferred_format && f.color_space == config.preferred_color_space)
        .or_else(|| formats.first())
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: config.preferred_format,
            color_space: config.preferred_color_space,
        })
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], config: &SwapchainConfig) -> vk::PresentModeKHR {
    if modes.contains(&config.preferred_present_mode) {
        config.preferred_present_mode
    } else {
        // FIFO is always supported.
        vk::PresentModeKHR::FIFO
    }
}

fn get_swapchain_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: window_extent
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn queue_family_index(&self, queue: QueueType) -> u32 {
        self.native_queue(queue).queue.family_index()
    }

    fn queue_submit(&self, queue: QueueType, batch: &SubmitBatch<'_>) -> VkResult<()> {
        let waits: SmallVec<[vk::SemaphoreSubmitInfo; 4]> = batch
            .wait
            .iter()
            .map(|&(semaphore, stage)| vk::SemaphoreSubmitInfo::default().semaphore(semaphore).stage_mask(stage))
            .collect();
        let signals: SmallVec<[vk::SemaphoreSubmitInfo; 4]> = batch
            .signal
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let command_buffers: SmallVec<[vk::CommandBufferSubmitInfo; 4]> = batch
            .command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
            .collect();

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        let native = self.native_queue(queue);
        let _guard = native.lock.lock();
        unsafe { self.device.queue_submit2(native.queue.handle(), &[submit], batch.fence) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn is_format_supported(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool {
        let properties = unsafe { self.instance.get_physical_device_format_properties(self.physical_device, format) };
        properties.optimal_tiling_features.contains(features)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_fences(&self, fences: &[vk::Fence], timeout: Duration) -> VkResult<bool> {
        if fences.is_empty() {
            return Ok(true);
        }
        let timeout = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(fences, true, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        unsafe { self.device.reset_fences(fences) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> VkResult<NativeBuffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(info.size)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let flags = if info.host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let memory = match self.allocate(requirements, flags) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let bound = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }.and_then(|_| {
            if info.host_visible {
                let ptr = unsafe {
                    self.device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
                };
                Ok(MappedPtr::new(ptr.cast()))
            } else {
                Ok(None)
            }
        });

        match bound {
            Ok(mapped) => Ok(NativeBuffer { buffer, memory, mapped }),
            Err(err) => {
                unsafe {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                }
                Err(err)
            }
        }
    }

    fn destroy_buffer(&self, buffer: &NativeBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            // Freeing implicitly unmaps.
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_image(&self, info: &ImageCreateInfo) -> VkResult<NativeImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(info.image_type)
            .flags(info.flags)
            .format(info.format)
            .extent(info.extent)
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(info.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&create_info, None)? };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let bound = self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL).and_then(|memory| {
            match unsafe { self.device.bind_image_memory(image, memory, 0) } {
                Ok(()) => Ok(memory),
                Err(err) => {
                    unsafe { self.device.free_memory(memory, None) };
                    Err(err)
                }
            }
        });

        match bound {
            Ok(memory) => Ok(NativeImage { image, memory }),
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(err)
            }
        }
    }

    fn destroy_image(&self, image: &NativeImage) {
        unsafe {
            self.device.destroy_image(image.image, None);
            if image.memory != vk::DeviceMemory::null() {
                self.device.free_memory(image.memory, None);
            }
        }
    }

    fn create_image_view(&self, info: &ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(info.image)
            .view_type(info.view_type)
            .format(info.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: info.aspect,
                base_mip_level: info.base_mip_level,
                level_count: info.level_count,
                base_array_layer: info.base_array_layer,
                layer_count: info.layer_count,
            });
        unsafe { self.device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VkResult<vk::Sampler> {
        unsafe { self.device.create_sampler(&desc.to_vk(), None) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        unsafe { self.device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(code), None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> VkResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        unsafe { self.device.create_descriptor_set_layout(&info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(sizes);
        unsafe { self.device.create_descriptor_pool(&info, None) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
    }

    fn create_update_template(
        &self,
        layout: vk::DescriptorSetLayout,
        entries: &[vk::DescriptorUpdateTemplateEntry],
    ) -> VkResult<vk::DescriptorUpdateTemplate> {
        let info = vk::DescriptorUpdateTemplateCreateInfo::default()
            .descriptor_update_entries(entries)
            .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
            .descriptor_set_layout(layout)
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
        unsafe { self.device.create_descriptor_update_template(&info, None) }
    }

    fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate) {
        unsafe { self.device.destroy_descriptor_update_template(template, None) }
    }

    fn update_descriptor_set_with_template(
        &self,
        set: vk::DescriptorSet,
        template: vk::DescriptorUpdateTemplate,
        bindings: &[ResourceBinding],
    ) {
        // Template entries address the slot table by byte offset and stride.
        unsafe {
            self.device
                .update_descriptor_set_with_template(set, template, bindings.as_ptr().cast::<c_void>())
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant: Option<vk::PushConstantRange>,
    ) -> VkResult<vk::PipelineLayout> {
        let ranges: SmallVec<[vk::PushConstantRange; 1]> = push_constant.into_iter().collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(&ranges);
        unsafe { self.device.create_pipeline_layout(&info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> VkResult<vk::PipelineCache> {
        let info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        match unsafe { self.device.create_pipeline_cache(&info, None) } {
            Err(err) if !initial_data.is_empty() => {
                log::warn!("Pipeline cache seed rejected ({:?}), starting empty", err);
                unsafe { self.device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None) }
            }
            result => result,
        }
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> VkResult<Vec<u8>> {
        unsafe { self.device.get_pipeline_cache_data(cache) }
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) }
    }

    #[profiling::function]
    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(info.vertex_module)
                .name(info.vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(info.fragment_module)
                .name(info.fragment_entry),
        ];

        let bindings: SmallVec<[vk::VertexInputBindingDescription; 8]> = info
            .vertex_input
            .bindings()
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate,
            })
            .collect();
        let attributes: SmallVec<[vk::VertexInputAttributeDescription; 8]> = info
            .vertex_input
            .attributes()
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(info.raster.topology)
            .primitive_restart_enable(false);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(info.raster.polygon_mode)
            .cull_mode(info.raster.cull_mode)
            .front_face(info.raster.front_face)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(info.render_pass.samples);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(info.depth_stencil.depth_test)
            .depth_write_enable(info.depth_stencil.depth_write)
            .depth_compare_op(info.depth_stencil.compare_op)
            .max_depth_bounds(1.0);

        let blend_attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; MAX_COLOR_ATTACHMENTS]> =
            info.blend.iter().map(BlendState::to_vk).collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        // Viewport and scissor are set per render pass.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&info.render_pass.color_formats)
            .depth_attachment_format(info.render_pass.depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(info.layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe { self.device.create_graphics_pipelines(cache, &[pipeline_info], None) }
            .map_err(|(_, err)| err)?;
        pipelines.first().copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.queue_family_index(queue));
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        unsafe { self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers.first().copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RenderingInfo<'_>) {
        let colors: SmallVec<[vk::RenderingAttachmentInfo; MAX_COLOR_ATTACHMENTS]> = info
            .color
            .iter()
            .map(|c| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(c.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(c.load_op)
                    .store_op(c.store_op)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: c.clear_color },
                    })
            })
            .collect();
        let depth = info.depth.map(|d| {
            vk::RenderingAttachmentInfo::default()
                .image_view(d.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(d.load_op)
                .store_op(d.store_op)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: d.clear_depth, stencil: 0 },
                })
        });

        let mut rendering = vk::RenderingInfo::default()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: info.extent })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering = rendering.depth_attachment(depth);
        }

        unsafe { self.device.cmd_begin_rendering(cmd, &rendering) }
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline) }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                dynamic_offsets,
            )
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets) }
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, offset, index_type) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, std::slice::from_ref(viewport)) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, std::slice::from_ref(scissor)) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance) }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, instance_count, first_index, vertex_offset, first_instance)
        }
    }

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, buffers: &[BufferBarrier], images: &[ImageBarrier]) {
        let buffer_barriers: SmallVec<[vk::BufferMemoryBarrier2; 4]> = buffers.iter().map(BufferBarrier::to_vk).collect();
        let image_barriers: SmallVec<[vk::ImageMemoryBarrier2; 4]> = images.iter().map(ImageBarrier::to_vk).collect();
        let dependency = vk::DependencyInfo::default()
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, regions)
        }
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, region: &vk::ImageBlit, filter: vk::Filter) {
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                filter,
            )
        }
    }

    fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.swapchain.lock().as_ref().map(|swapchain| SwapchainInfo {
            format: swapchain.format.format,
            extent: swapchain.extent,
            image_count: swapchain.images.len() as u32,
        })
    }

    fn swapchain_image(&self, index: u32) -> vk::Image {
        self.swapchain
            .lock()
            .as_ref()
            .and_then(|swapchain| swapchain.images.get(index as usize).copied())
            .unwrap_or_else(|| rhi_fatal!("swapchain image {} does not exist", index))
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        let guard = self.swapchain.lock();
        let swapchain = guard.as_ref().ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        unsafe {
            swapchain
                .loader
                .acquire_next_image(swapchain.swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let guard = self.swapchain.lock();
        let swapchain = guard.as_ref().ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;

        let swapchains = [swapchain.swapchain];
        let image_indices = [index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let native = self.native_queue(QueueType::Graphics);
        let _queue = native.lock.lock();
        match unsafe { swapchain.loader.queue_present(native.queue.handle(), &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(err),
        }
    }

    fn recreate_swapchain(&self) -> VkResult<()> {
        let mut guard = self.swapchain.lock();
        let swapchain = guard.as_mut().ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        unsafe { self.device.device_wait_idle()? };
        swapchain.create_or_recreate(self.physical_device)
    }
}
