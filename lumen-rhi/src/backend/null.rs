//! A backend without a GPU.
//!
//! Handles are fabricated from a counter, host-visible buffers are backed by host memory,
//! fences signal as soon as they are submitted, and every recorded command is logged per
//! command buffer. Binary semaphores are tracked so a signal without a matching wait is
//! caught at the next signal. Used by tests and the headless sandbox.

use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use lumen_core::collections::{hashmap::HashMap, hashset::HashSet};
use lumen_core::log;
use parking_lot::Mutex;

use super::*;

/// A command as the null backend saw it recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRendering { color_count: usize, has_depth: bool },
    EndRendering,
    BindPipeline(vk::Pipeline),
    BindDescriptorSet { set_index: u32, set: vk::DescriptorSet, dynamic_offsets: Vec<u32> },
    PushConstants { offset: u32, size: u32 },
    BindVertexBuffers { first_binding: u32, buffers: Vec<vk::Buffer>, offsets: Vec<vk::DeviceSize> },
    BindIndexBuffer { buffer: vk::Buffer, offset: vk::DeviceSize },
    SetViewport,
    SetScissor,
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Barrier { buffers: usize, images: usize },
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, regions: usize },
    CopyBufferToImage { dst: vk::Image, regions: usize },
    BlitImage { src_mip: u32, dst_mip: u32, dst_extent: [i32; 2] },
}

/// A recorded queue submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub queue: QueueType,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait: Vec<vk::Semaphore>,
    pub signal: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullStats {
    /// Native objects created, of every kind.
    pub created: u64,
    pub destroyed: u64,
    pub buffers: u64,
    pub images: u64,
    pub samplers: u64,
    pub shader_modules: u64,
    pub descriptor_set_layouts: u64,
    pub descriptor_pools: u64,
    pub descriptor_sets: u64,
    pub update_templates: u64,
    pub pipeline_layouts: u64,
    pub pipelines: u64,
    pub descriptor_writes: u64,
    pub submits: u64,
    pub presents: u64,
    pub swapchain_recreations: u64,
}

struct NullSwapchain {
    info: SwapchainInfo,
    images: Vec<vk::Image>,
    next_image: u32,
    out_of_date: bool,
    suboptimal: bool,
}

#[derive(Default)]
struct NullState {
    next_handle: u64,
    alive: HashSet<u64>,
    fences: HashMap<u64, bool>,
    /// Binary semaphores with a pending signal.
    signaled: HashSet<u64>,
    /// Image each live view was created from.
    view_images: HashMap<u64, u64>,
    host_memory: HashMap<u64, Box<[u8]>>,
    commands: HashMap<u64, Vec<RecordedCommand>>,
    submissions: Vec<Submission>,
    swapchain: Option<NullSwapchain>,
    stats: NullStats,
}

impl NullState {
    fn create<H: Handle + Copy>(&mut self) -> H {
        self.next_handle += 1;
        self.alive.insert(self.next_handle);
        self.stats.created += 1;
        H::from_raw(self.next_handle)
    }

    fn destroy<H: Handle + Copy>(&mut self, handle: H) {
        if handle.as_raw() == 0 {
            return;
        }
        if !self.alive.remove(&handle.as_raw()) {
            rhi_fatal!("null backend: {:?} {:#x} destroyed twice or never created", H::TYPE, handle.as_raw());
        }
        self.stats.destroyed += 1;
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: RecordedCommand) {
        self.commands.entry(cmd.as_raw()).or_default().push(command);
    }

    fn signal(&mut self, semaphore: vk::Semaphore) {
        if !self.signaled.insert(semaphore.as_raw()) {
            rhi_fatal!("null backend: semaphore {:#x} signaled again before it was waited on", semaphore.as_raw());
        }
    }

    fn wait(&mut self, semaphore: vk::Semaphore) {
        if !self.signaled.remove(&semaphore.as_raw()) {
            rhi_fatal!("null backend: semaphore {:#x} waited on without a pending signal", semaphore.as_raw());
        }
    }
}

pub struct NullBackend {
    state: Mutex<NullState>,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(NullState::default()) }
    }

    /// A null backend that also presents to a fake swapchain.
    pub fn with_swapchain(format: vk::Format, extent: vk::Extent2D, image_count: u32) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            let images = (0..image_count).map(|_| state.create::<vk::Image>()).collect();
            state.swapchain = Some(NullSwapchain {
                info: SwapchainInfo { format, extent, image_count },
                images,
                next_image: 0,
                out_of_date: false,
                suboptimal: false,
            });
        }
        backend
    }

    pub fn stats(&self) -> NullStats {
        self.state.lock().stats
    }

    /// Whether a fabricated handle has been created and not destroyed yet.
    pub fn is_alive<H: Handle + Copy>(&self, handle: H) -> bool {
        self.state.lock().alive.contains(&handle.as_raw())
    }

    pub fn live_object_count(&self) -> usize {
        self.state.lock().alive.len()
    }

    /// Commands recorded into `cmd` since it was last begun.
    pub fn commands(&self, cmd: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state.lock().commands.get(&cmd.as_raw()).cloned().unwrap_or_default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// The next acquire reports an out-of-date swapchain.
    pub fn invalidate_swapchain(&self) {
        if let Some(swapchain) = self.state.lock().swapchain.as_mut() {
            swapchain.out_of_date = true;
        }
    }

    /// Acquires keep succeeding but report a suboptimal swapchain until it is recreated.
    pub fn degrade_swapchain(&self) {
        if let Some(swapchain) = self.state.lock().swapchain.as_mut() {
            swapchain.suboptimal = true;
        }
    }

    /// Whether `semaphore` has been signaled and not waited on since.
    pub fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.lock().signaled.contains(&semaphore.as_raw())
    }
}

impl GpuBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn queue_family_index(&self, queue: QueueType) -> u32 {
        queue.index() as u32
    }

    fn queue_submit(&self, queue: QueueType, batch: &SubmitBatch<'_>) -> VkResult<()> {
        let mut state = self.state.lock();
        if batch.fence != vk::Fence::null() {
            match state.fences.get_mut(&batch.fence.as_raw()) {
                Some(signaled) => *signaled = true,
                None => rhi_fatal!("null backend: submit with unknown fence {:?}", batch.fence),
            }
        }
        for (semaphore, _) in batch.wait {
            state.wait(*semaphore);
        }
        for semaphore in batch.signal {
            state.signal(*semaphore);
        }
        state.stats.submits += 1;
        state.submissions.push(Submission {
            queue,
            command_buffers: batch.command_buffers.to_vec(),
            wait: batch.wait.iter().map(|(s, _)| *s).collect(),
            signal: batch.signal.to_vec(),
            fence: batch.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        Ok(())
    }

    fn is_format_supported(&self, format: vk::Format, _features: vk::FormatFeatureFlags) -> bool {
        format != vk::Format::UNDEFINED
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence: vk::Fence = state.create();
        state.fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence.as_raw());
        state.destroy(fence);
    }

    fn wait_fences(&self, fences: &[vk::Fence], _timeout: Duration) -> VkResult<bool> {
        let state = self.state.lock();
        Ok(fences
            .iter()
            .all(|f| state.fences.get(&f.as_raw()).copied().unwrap_or(false)))
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            if let Some(signaled) = state.fences.get_mut(&fence.as_raw()) {
                *signaled = false;
            }
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.state.lock().create())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.signaled.remove(&semaphore.as_raw());
        state.destroy(semaphore);
    }

    fn create_buffer(&self, info: &BufferCreateInfo) -> VkResult<NativeBuffer> {
        let mut state = self.state.lock();
        let buffer: vk::Buffer = state.create();
        let memory: vk::DeviceMemory = state.create();
        state.stats.buffers += 1;

        let mapped = if info.host_visible {
            let mut bytes = vec![0u8; info.size as usize].into_boxed_slice();
            let ptr = MappedPtr::new(bytes.as_mut_ptr());
            state.host_memory.insert(buffer.as_raw(), bytes);
            ptr
        } else {
            None
        };
        log::trace!("null: buffer {:?} ({} bytes, {:?})", buffer, info.size, info.usage);

        Ok(NativeBuffer { buffer, memory, mapped })
    }

    fn destroy_buffer(&self, buffer: &NativeBuffer) {
        let mut state = self.state.lock();
        state.host_memory.remove(&buffer.buffer.as_raw());
        state.destroy(buffer.buffer);
        state.destroy(buffer.memory);
    }

    fn create_image(&self, _info: &ImageCreateInfo) -> VkResult<NativeImage> {
        let mut state = self.state.lock();
        state.stats.images += 1;
        Ok(NativeImage { image: state.create(), memory: state.create() })
    }

    fn destroy_image(&self, image: &NativeImage) {
        let mut state = self.state.lock();
        state.destroy(image.image);
        state.destroy(image.memory);
    }

    fn create_image_view(&self, info: &ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        let view: vk::ImageView = state.create();
        state.view_images.insert(view.as_raw(), info.image.as_raw());
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        state.view_images.remove(&view.as_raw());
        state.destroy(view);
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> VkResult<vk::Sampler> {
        let mut state = self.state.lock();
        state.stats.samplers += 1;
        Ok(state.create())
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.lock().destroy(sampler);
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        let mut state = self.state.lock();
        state.stats.shader_modules += 1;
        Ok(state.create())
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().destroy(module);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        state.stats.descriptor_set_layouts += 1;
        Ok(state.create())
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().destroy(layout);
    }

    fn create_descriptor_pool(&self, _max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        state.stats.descriptor_pools += 1;
        Ok(state.create())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().destroy(pool);
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        state.stats.descriptor_sets += count as u64;
        // Sets are freed with their pool, so they are not tracked as live objects.
        Ok((0..count)
            .map(|_| {
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(state.next_handle)
            })
            .collect())
    }

    fn create_update_template(
        &self,
        _layout: vk::DescriptorSetLayout,
        _entries: &[vk::DescriptorUpdateTemplateEntry],
    ) -> VkResult<vk::DescriptorUpdateTemplate> {
        let mut state = self.state.lock();
        state.stats.update_templates += 1;
        Ok(state.create())
    }

    fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate) {
        self.state.lock().destroy(template);
    }

    fn update_descriptor_set_with_template(
        &self,
        _set: vk::DescriptorSet,
        _template: vk::DescriptorUpdateTemplate,
        _bindings: &[ResourceBinding],
    ) {
        self.state.lock().stats.descriptor_writes += 1;
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant: Option<vk::PushConstantRange>,
    ) -> VkResult<vk::PipelineLayout> {
        let mut state = self.state.lock();
        state.stats.pipeline_layouts += 1;
        Ok(state.create())
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().destroy(layout);
    }

    fn create_pipeline_cache(&self, _initial_data: &[u8]) -> VkResult<vk::PipelineCache> {
        Ok(self.state.lock().create())
    }

    fn pipeline_cache_data(&self, _cache: vk::PipelineCache) -> VkResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.state.lock().destroy(cache);
    }

    fn create_graphics_pipeline(
        &self,
        _cache: vk::PipelineCache,
        _info: &GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.state.lock();
        state.stats.pipelines += 1;
        Ok(state.create())
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().destroy(pipeline);
    }

    fn create_command_pool(&self, _queue: QueueType) -> VkResult<vk::CommandPool> {
        Ok(self.state.lock().create())
    }

    fn reset_command_pool(&self, _pool: vk::CommandPool) -> VkResult<()> {
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state.lock().destroy(pool);
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        state.next_handle += 1;
        Ok(vk::CommandBuffer::from_raw(state.next_handle))
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.state.lock().commands.insert(cmd.as_raw(), Vec::new());
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &RenderingInfo<'_>) {
        self.state.lock().record(cmd, RecordedCommand::BeginRendering {
            color_count: info.color.len(),
            has_depth: info.depth.is_some(),
        });
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, RecordedCommand::EndRendering);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state.lock().record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.state.lock().record(cmd, RecordedCommand::BindDescriptorSet {
            set_index,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state.lock().record(cmd, RecordedCommand::PushConstants { offset, size: data.len() as u32 });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.state.lock().record(cmd, RecordedCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize, _index_type: vk::IndexType) {
        self.state.lock().record(cmd, RecordedCommand::BindIndexBuffer { buffer, offset });
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewport: &vk::Viewport) {
        self.state.lock().record(cmd, RecordedCommand::SetViewport);
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _scissor: &vk::Rect2D) {
        self.state.lock().record(cmd, RecordedCommand::SetScissor);
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.state.lock().record(cmd, RecordedCommand::Draw { vertex_count, instance_count });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state.lock().record(cmd, RecordedCommand::DrawIndexed { index_count, instance_count });
    }

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, buffers: &[BufferBarrier], images: &[ImageBarrier]) {
        self.state.lock().record(cmd, RecordedCommand::Barrier { buffers: buffers.len(), images: images.len() });
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        let mut state = self.state.lock();
        // Host-visible on both ends: perform the copy so readbacks observe it.
        for region in regions {
            let Some(bytes) = state
                .host_memory
                .get(&src.as_raw())
                .and_then(|m| m.get(region.src_offset as usize..(region.src_offset + region.size) as usize))
                .map(|s| s.to_vec())
            else {
                continue;
            };
            if let Some(dst_mem) = state.host_memory.get_mut(&dst.as_raw()) {
                let start = region.dst_offset as usize;
                if let Some(target) = dst_mem.get_mut(start..start + bytes.len()) {
                    target.copy_from_slice(&bytes);
                }
            }
        }
        state.record(cmd, RecordedCommand::CopyBuffer { src, dst, regions: regions.len() });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(cmd, RecordedCommand::CopyBufferToImage { dst, regions: regions.len() });
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, _src: vk::Image, _dst: vk::Image, region: &vk::ImageBlit, _filter: vk::Filter) {
        self.state.lock().record(cmd, RecordedCommand::BlitImage {
            src_mip: region.src_subresource.mip_level,
            dst_mip: region.dst_subresource.mip_level,
            dst_extent: [region.dst_offsets[1].x, region.dst_offsets[1].y],
        });
    }

    fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.state.lock().swapchain.as_ref().map(|s| s.info)
    }

    fn swapchain_image(&self, index: u32) -> vk::Image {
        let state = self.state.lock();
        match state.swapchain.as_ref().and_then(|s| s.images.get(index as usize)) {
            Some(image) => *image,
            None => rhi_fatal!("null backend: no swapchain image {}", index),
        }
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        let Some(swapchain) = state.swapchain.as_mut() else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        if swapchain.out_of_date {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let index = swapchain.next_image;
        let suboptimal = swapchain.suboptimal;
        swapchain.next_image = (index + 1) % swapchain.info.image_count.max(1);
        state.signal(signal);
        Ok((index, suboptimal))
    }

    fn present(&self, _index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.wait(wait);
        state.stats.presents += 1;
        Ok(state.swapchain.as_ref().is_some_and(|s| s.suboptimal))
    }

    fn recreate_swapchain(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        let Some(old_images) = state.swapchain.as_ref().map(|s| s.images.clone()) else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };

        for image in &old_images {
            if state.view_images.values().any(|owner| *owner == image.as_raw()) {
                rhi_fatal!("null backend: swapchain image {:#x} still has live views", image.as_raw());
            }
            state.destroy(*image);
        }
        let images: Vec<vk::Image> = (0..old_images.len()).map(|_| state.create::<vk::Image>()).collect();

        state.stats.swapchain_recreations += 1;
        if let Some(swapchain) = state.swapchain.as_mut() {
            swapchain.images = images;
            swapchain.out_of_date = false;
            swapchain.suboptimal = false;
            swapchain.next_image = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_signal_on_submit() {
        let backend = NullBackend::new();
        let fence = backend.create_fence(false).unwrap();
        assert!(!backend.wait_fences(&[fence], Duration::from_millis(1)).unwrap());

        backend
            .queue_submit(QueueType::Graphics, &SubmitBatch { fence, ..Default::default() })
            .unwrap();
        assert!(backend.wait_fences(&[fence], Duration::from_millis(1)).unwrap());

        backend.reset_fences(&[fence]).unwrap();
        assert!(!backend.wait_fences(&[fence], Duration::from_millis(1)).unwrap());
        backend.destroy_fence(fence);
        assert!(!backend.is_alive(fence));
    }

    #[test]
    fn host_visible_buffers_are_mapped() {
        let backend = NullBackend::new();
        let buffer = backend
            .create_buffer(&BufferCreateInfo { size: 16, usage: vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible: true })
            .unwrap();
        assert!(buffer.mapped.is_some());
        assert!(backend.is_alive(buffer.buffer));

        backend.destroy_buffer(&buffer);
        assert!(!backend.is_alive(buffer.buffer));
        assert_eq!(backend.stats().created, backend.stats().destroyed);
    }

    #[test]
    #[should_panic]
    fn double_destroy_aborts() {
        let backend = NullBackend::new();
        let view = backend.create_image_view(&ImageViewCreateInfo {
            image: vk::Image::null(),
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }).unwrap();
        backend.destroy_image_view(view);
        backend.destroy_image_view(view);
    }

    #[test]
    fn semaphore_signals_pair_with_waits() {
        let backend = NullBackend::with_swapchain(vk::Format::B8G8R8A8_UNORM, vk::Extent2D { width: 8, height: 8 }, 2);
        let acquire = backend.create_semaphore().unwrap();
        assert_eq!(backend.acquire_next_image(acquire).unwrap(), (0, false));
        assert!(backend.is_signaled(acquire));

        let wait = [(acquire, vk::PipelineStageFlags2::ALL_COMMANDS)];
        backend
            .queue_submit(QueueType::Graphics, &SubmitBatch { wait: &wait, ..Default::default() })
            .unwrap();
        assert!(!backend.is_signaled(acquire));

        backend.degrade_swapchain();
        assert_eq!(backend.acquire_next_image(acquire).unwrap(), (1, true));
    }

    #[test]
    #[should_panic(expected = "signaled again before it was waited on")]
    fn unwaited_acquire_semaphore_aborts() {
        let backend = NullBackend::with_swapchain(vk::Format::B8G8R8A8_UNORM, vk::Extent2D { width: 8, height: 8 }, 2);
        let acquire = backend.create_semaphore().unwrap();
        backend.acquire_next_image(acquire).unwrap();
        backend.acquire_next_image(acquire).unwrap();
    }
}
