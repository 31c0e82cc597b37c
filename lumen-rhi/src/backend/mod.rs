//! The native driver seam.
//!
//! Everything above this module talks to the GPU through [`GpuBackend`]. Handles are plain
//! `ash::vk` handles so the Vulkan implementation is a thin forwarding layer, while
//! [`null::NullBackend`] fabricates them and records what it was asked to do.

use std::ffi::CStr;
use std::ptr::NonNull;
use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;

use crate::barrier::{BufferBarrier, ImageBarrier};
use crate::binding::ResourceBinding;
use crate::pipeline::{BlendState, DepthStencilState, RasterState, RenderPassInfo, VertexInputLayout};
use crate::queue::QueueType;
use crate::sampler::SamplerDesc;

pub mod null;
pub mod vulkan;

/// Host address of a persistently mapped allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// The mapping lives as long as the allocation; access is synchronized by the owning object.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    pub fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// Host-visible, coherent and persistently mapped.
    pub host_visible: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct NativeBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub mapped: Option<MappedPtr>,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageCreateInfo {
    pub image_type: vk::ImageType,
    pub flags: vk::ImageCreateFlags,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct NativeImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageViewCreateInfo {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// Everything a graphics pipeline is compiled from.
pub struct GraphicsPipelineCreateInfo<'a> {
    pub layout: vk::PipelineLayout,
    pub vertex_module: vk::ShaderModule,
    pub vertex_entry: &'a CStr,
    pub fragment_module: vk::ShaderModule,
    pub fragment_entry: &'a CStr,
    pub render_pass: &'a RenderPassInfo,
    pub vertex_input: &'a VertexInputLayout,
    pub depth_stencil: DepthStencilState,
    pub blend: &'a [BlendState],
    pub raster: RasterState,
}

#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
}

/// Dynamic rendering scope.
#[derive(Clone, Copy, Debug)]
pub struct RenderingInfo<'a> {
    pub extent: vk::Extent2D,
    pub color: &'a [ColorAttachment],
    pub depth: Option<DepthAttachment>,
}

/// One queue submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitBatch<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait: &'a [(vk::Semaphore, vk::PipelineStageFlags2)],
    pub signal: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// Native device operations the RHI is built on.
///
/// Creation calls return `VkResult`; the callers decide what is fatal. Recording calls
/// cannot fail.
pub trait GpuBackend: Send + Sync {
    fn name(&self) -> &str;

    fn queue_family_index(&self, queue: QueueType) -> u32;
    fn queue_submit(&self, queue: QueueType, batch: &SubmitBatch<'_>) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;
    fn is_format_supported(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool;

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `Ok(false)` when the timeout elapsed first.
    fn wait_fences(&self, fences: &[vk::Fence], timeout: Duration) -> VkResult<bool>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_buffer(&self, info: &BufferCreateInfo) -> VkResult<NativeBuffer>;
    fn destroy_buffer(&self, buffer: &NativeBuffer);
    fn create_image(&self, info: &ImageCreateInfo) -> VkResult<NativeImage>;
    fn destroy_image(&self, image: &NativeImage);
    fn create_image_view(&self, info: &ImageViewCreateInfo) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    fn create_update_template(
        &self,
        layout: vk::DescriptorSetLayout,
        entries: &[vk::DescriptorUpdateTemplateEntry],
    ) -> VkResult<vk::DescriptorUpdateTemplate>;
    fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate);
    /// Write a whole set from a binding slot table laid out as the template describes.
    fn update_descriptor_set_with_template(
        &self,
        set: vk::DescriptorSet,
        template: vk::DescriptorUpdateTemplate,
        bindings: &[ResourceBinding],
    );

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant: Option<vk::PushConstantRange>,
    ) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_pipeline_cache(&self, initial_data: &[u8]) -> VkResult<vk::PipelineCache>;
    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> VkResult<Vec<u8>>;
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool>;
    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RenderingInfo<'_>);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, buffers: &[BufferBarrier], images: &[ImageBarrier]);
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, region: &vk::ImageBlit, filter: vk::Filter);

    fn swapchain_info(&self) -> Option<SwapchainInfo>;
    fn swapchain_image(&self, index: u32) -> vk::Image;
    /// Returns the image index and whether the swapchain is suboptimal. `signal` is
    /// signaled in both cases. `Err(ERROR_OUT_OF_DATE_KHR)` means the swapchain has to be
    /// recreated and nothing was signaled.
    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)>;
    /// Returns `true` when the swapchain is suboptimal.
    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool>;
    fn recreate_swapchain(&self) -> VkResult<()>;
}
