//! Command pools and the command list binding state machine.
//!
//! A [`CommandList`] keeps a logical table of what is bound and only turns it into native
//! descriptor-set writes and binds when a draw needs it. Dirty masks track what changed:
//!
//! * `dirty_sets`: set contents changed, the set has to be looked up (and maybe written) again.
//! * `dirty_sets_rebind`: only a dynamic uniform offset changed, the bound set is re-bound as is.
//! * `dirty_vertex_buffers`: vertex buffer slots, bound in contiguous runs.

use std::sync::Arc;

use ash::vk;
use lumen_core::collections::SmallVec;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;

use crate::backend::{ColorAttachment, DepthAttachment, RenderingInfo};
use crate::barrier::{BufferBarrier, ImageBarrier};
use crate::binding::{BindingChange, BindingTable};
use crate::bitmask::{for_each_bit, for_each_bit_range};
use crate::buffer::{Buffer, BufferRange};
use crate::device::DeviceShared;
use crate::error::BindingError;
use crate::pipeline::{GraphicPipeline, RenderPassInfo};
use crate::pipeline_layout::PipelineLayout;
use crate::queue::QueueType;
use crate::sampler::Sampler;
use crate::texture::Image;
use crate::{MAX_COLOR_ATTACHMENTS, MAX_DESCRIPTOR_SETS, MAX_PUSH_CONSTANT_SIZE, MAX_VERTEX_BUFFERS};

/// A native command pool with the one primary command buffer allocated from it.
///
/// Every command list records into its own pool, so lists can be recorded on different
/// threads. Pools are recycled by the device once the frame that used them has retired.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandPool {
    pub queue: QueueType,
    pub pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl CommandPool {
    pub fn new(device: &DeviceShared, queue: QueueType) -> Self {
        let backend = device.backend();
        let pool = vk_check!(backend.create_command_pool(queue), "vkCreateCommandPool");
        let cmd = vk_check!(backend.allocate_command_buffer(pool), "vkAllocateCommandBuffers");
        log::trace!("Command pool created for {:?}", queue);
        Self { queue, pool, cmd }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    ReadyForRecording,
    InRecording,
    InRenderPass,
    ReadyForSubmit,
}

/// What a command list issued to the native command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandListStats {
    /// Descriptor sets written through an update template.
    pub descriptor_writes: u32,
    /// `vkCmdBindDescriptorSets` calls, fresh sets and offset-only rebinds alike.
    pub set_binds: u32,
    /// Of `set_binds`, how many only re-bound an existing set with new dynamic offsets.
    pub set_rebinds: u32,
    pub pipeline_binds: u32,
    pub push_constant_updates: u32,
    pub vertex_buffer_binds: u32,
    pub draws: u32,
}

/// A color attachment of a render pass.
#[derive(Clone, Copy)]
pub struct ColorTarget<'a> {
    pub image: &'a Image,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_color: [f32; 4],
}

impl<'a> ColorTarget<'a> {
    pub fn clear(image: &'a Image, clear_color: [f32; 4]) -> Self {
        Self {
            image,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_color,
        }
    }

    pub fn load(image: &'a Image) -> Self {
        Self {
            image,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_color: [0.0; 4],
        }
    }
}

#[derive(Clone, Copy)]
pub struct DepthTarget<'a> {
    pub image: &'a Image,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
}

impl<'a> DepthTarget<'a> {
    pub fn clear(image: &'a Image, clear_depth: f32) -> Self {
        Self {
            image,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            clear_depth,
        }
    }
}

/// The attachments a render pass draws into.
#[derive(Clone, Default)]
pub struct RenderTargets<'a> {
    pub colors: SmallVec<[ColorTarget<'a>; MAX_COLOR_ATTACHMENTS]>,
    pub depth: Option<DepthTarget<'a>>,
}

impl<'a> RenderTargets<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, target: ColorTarget<'a>) -> Self {
        self.colors.push(target);
        self
    }

    pub fn with_depth(mut self, target: DepthTarget<'a>) -> Self {
        self.depth = Some(target);
        self
    }

    /// Formats and sample count, as pipelines are compiled against them.
    pub fn render_pass_info(&self) -> RenderPassInfo {
        let formats: SmallVec<[vk::Format; MAX_COLOR_ATTACHMENTS]> =
            self.colors.iter().map(|c| c.image.format()).collect();
        let samples = self
            .colors
            .first()
            .map(|c| c.image.desc().samples)
            .or_else(|| self.depth.map(|d| d.image.desc().samples))
            .unwrap_or(vk::SampleCountFlags::TYPE_1);
        RenderPassInfo::new(&formats, self.depth.map(|d| d.image.format())).with_samples(samples)
    }

    fn extent(&self) -> vk::Extent2D {
        let first = self
            .colors
            .first()
            .map(|c| c.image)
            .or_else(|| self.depth.map(|d| d.image));
        let Some(first) = first else {
            rhi_fatal!("render pass without attachments");
        };
        let extent = first.extent();
        let all = self.colors.iter().map(|c| c.image).chain(self.depth.map(|d| d.image));
        for image in all {
            let other = image.extent();
            rhi_assert!(
                other.width == extent.width && other.height == extent.height,
                "attachment '{}' is {}x{}, render pass is {}x{}",
                image.name(),
                other.width,
                other.height,
                extent.width,
                extent.height
            );
        }
        vk::Extent2D { width: extent.width, height: extent.height }
    }
}

/// Records commands for one queue. Obtained from `RenderDevice::begin_command_list` and
/// handed back through `RenderDevice::submit_command_list`.
#[DeviceObject]
pub struct CommandList {
    pool: CommandPool,
    state: CommandListState,

    bindings: BindingTable,
    dirty_sets: u32,
    dirty_sets_rebind: u32,
    current_sets: [vk::DescriptorSet; MAX_DESCRIPTOR_SETS],

    push_constants: [u8; MAX_PUSH_CONSTANT_SIZE],
    push_constants_dirty: bool,

    vertex_buffers: [vk::Buffer; MAX_VERTEX_BUFFERS],
    vertex_offsets: [vk::DeviceSize; MAX_VERTEX_BUFFERS],
    dirty_vertex_buffers: u32,

    pipeline: Option<Arc<GraphicPipeline>>,
    layout: Option<Arc<PipelineLayout>>,
    render_pass: Option<RenderPassInfo>,

    stats: CommandListStats,
    submitted: bool,
}

impl CommandList {
    pub(crate) fn new(device: &Arc<DeviceShared>, pool: CommandPool) -> Self {
        let mut list = Self {
            pool,
            state: CommandListState::ReadyForRecording,
            bindings: BindingTable::default(),
            dirty_sets: 0,
            dirty_sets_rebind: 0,
            current_sets: [vk::DescriptorSet::null(); MAX_DESCRIPTOR_SETS],
            push_constants: [0; MAX_PUSH_CONSTANT_SIZE],
            push_constants_dirty: false,
            vertex_buffers: [vk::Buffer::null(); MAX_VERTEX_BUFFERS],
            vertex_offsets: [0; MAX_VERTEX_BUFFERS],
            dirty_vertex_buffers: 0,
            pipeline: None,
            layout: None,
            render_pass: None,
            stats: CommandListStats::default(),
            submitted: false,
            device: device.clone(),
        };
        list.reset_and_begin();
        list
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer { self.pool.cmd }

    #[inline]
    pub fn queue(&self) -> QueueType { self.pool.queue }

    #[inline]
    pub fn state(&self) -> CommandListState { self.state }

    #[inline]
    pub fn stats(&self) -> CommandListStats { self.stats }

    /// Currently bound pipeline, if any.
    pub fn pipeline(&self) -> Option<&Arc<GraphicPipeline>> {
        self.pipeline.as_ref()
    }

    /// Discard everything recorded so far and start over.
    pub fn reset_and_begin(&mut self) {
        rhi_assert!(!self.submitted, "command list reset after submission");
        let backend = self.device.backend();
        vk_check!(backend.reset_command_pool(self.pool.pool), "vkResetCommandPool");
        vk_check!(backend.begin_command_buffer(self.pool.cmd), "vkBeginCommandBuffer");

        self.reset_binding_state();
        self.render_pass = None;
        self.stats = CommandListStats::default();
        self.state = CommandListState::InRecording;
    }

    fn reset_binding_state(&mut self) {
        self.bindings.reset();
        self.dirty_sets = 0;
        self.dirty_sets_rebind = 0;
        self.current_sets = [vk::DescriptorSet::null(); MAX_DESCRIPTOR_SETS];
        self.push_constants = [0; MAX_PUSH_CONSTANT_SIZE];
        self.push_constants_dirty = false;
        self.vertex_buffers = [vk::Buffer::null(); MAX_VERTEX_BUFFERS];
        self.vertex_offsets = [0; MAX_VERTEX_BUFFERS];
        self.dirty_vertex_buffers = 0;
        self.pipeline = None;
        self.layout = None;
    }

    fn expect_state(&self, expected: CommandListState, what: &str) {
        if self.state != expected {
            rhi_fatal!("{} requires a command list {:?}, it is {:?}", what, expected, self.state);
        }
    }

    /// Begin dynamic rendering into `targets`. Binding state does not survive a render
    /// pass boundary. Viewport and scissor are set to the full render area.
    pub fn begin_render_pass(&mut self, targets: &RenderTargets<'_>) {
        self.expect_state(CommandListState::InRecording, "begin_render_pass");
        rhi_assert!(self.queue() == QueueType::Graphics, "render pass recorded on {:?} queue", self.queue());
        rhi_assert!(
            targets.colors.len() <= MAX_COLOR_ATTACHMENTS,
            "{} color attachments, at most {} are supported",
            targets.colors.len(),
            MAX_COLOR_ATTACHMENTS
        );

        let extent = targets.extent();
        let colors: SmallVec<[ColorAttachment; MAX_COLOR_ATTACHMENTS]> = targets
            .colors
            .iter()
            .map(|c| {
                rhi_assert!(
                    c.image.has_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT),
                    "image '{}' is not a color attachment",
                    c.image.name()
                );
                ColorAttachment {
                    view: c.image.view(),
                    load_op: c.load_op,
                    store_op: c.store_op,
                    clear_color: c.clear_color,
                }
            })
            .collect();
        let depth = targets.depth.map(|d| {
            rhi_assert!(
                d.image.has_usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
                "image '{}' is not a depth attachment",
                d.image.name()
            );
            DepthAttachment {
                view: d.image.view(),
                load_op: d.load_op,
                store_op: d.store_op,
                clear_depth: d.clear_depth,
            }
        });

        self.reset_binding_state();

        let backend = self.device.backend();
        backend.cmd_begin_rendering(self.pool.cmd, &RenderingInfo { extent, color: &colors, depth });
        backend.cmd_set_viewport(self.pool.cmd, &vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        backend.cmd_set_scissor(self.pool.cmd, &vk::Rect2D { offset: vk::Offset2D::default(), extent });

        self.render_pass = Some(targets.render_pass_info());
        self.state = CommandListState::InRenderPass;
    }

    pub fn end_render_pass(&mut self) {
        self.expect_state(CommandListState::InRenderPass, "end_render_pass");
        self.device.backend().cmd_end_rendering(self.pool.cmd);
        self.render_pass = None;
        self.state = CommandListState::InRecording;
    }

    /// Bind a graphics pipeline. Binding the pipeline that is already bound does nothing.
    ///
    /// Slot contents survive a pipeline switch. When the pipeline layout changes every set
    /// the new layout uses, and the push constant block, is flushed again before the next
    /// draw, so slots left over from the previous pipeline are re-bound under the new layout.
    pub fn bind_pipeline(&mut self, pipeline: &Arc<GraphicPipeline>) {
        self.expect_state(CommandListState::InRenderPass, "bind_pipeline");
        if self.pipeline.as_ref().is_some_and(|current| Arc::ptr_eq(current, pipeline)) {
            return;
        }

        if let Some(render_pass) = &self.render_pass {
            if render_pass != pipeline.render_pass() {
                rhi_fatal!(
                    "{}",
                    BindingError::RenderPassMismatch { pipeline: pipeline.name().to_owned() }
                );
            }
        }

        self.device.backend().cmd_bind_pipeline(self.pool.cmd, pipeline.handle());
        self.stats.pipeline_binds += 1;

        let layout_changed = self
            .layout
            .as_ref()
            .map_or(true, |current| !Arc::ptr_eq(current, pipeline.layout()));
        if layout_changed {
            self.dirty_sets |= pipeline.layout().set_mask();
            self.dirty_sets_rebind = 0;
            self.current_sets = [vk::DescriptorSet::null(); MAX_DESCRIPTOR_SETS];
            self.push_constants_dirty = true;
            self.layout = Some(pipeline.layout().clone());
        }
        self.pipeline = Some(pipeline.clone());
    }

    fn mark_set(&mut self, set: u32, change: BindingChange) {
        match change {
            BindingChange::Unchanged => {}
            BindingChange::DynamicOffset => self.dirty_sets_rebind |= 1 << set,
            BindingChange::Content => self.dirty_sets |= 1 << set,
        }
    }

    fn require_buffer_usage(buffer: &Buffer, set: u32, binding: u32, required: vk::BufferUsageFlags) {
        if cfg!(any(feature = "validation", debug_assertions)) && !buffer.has_usage(required) {
            rhi_fatal!(
                "buffer '{}': {}",
                buffer.name(),
                BindingError::MissingUsage { set, binding, required, actual: buffer.usage() }
            );
        }
    }

    fn require_image_usage(image: &Image, set: u32, binding: u32, required: vk::ImageUsageFlags) {
        if cfg!(any(feature = "validation", debug_assertions)) && !image.usage().intersects(required) {
            rhi_fatal!(
                "image '{}': {}",
                image.name(),
                BindingError::MissingImageUsage { set, binding, required, actual: image.usage() }
            );
        }
    }

    /// Bind a uniform buffer range. Uniform buffers are always dynamic: moving the range
    /// within the same buffer only changes the dynamic offset.
    pub fn bind_uniform_buffer(&mut self, set: u32, binding: u32, range: BufferRange<'_>) {
        Self::require_buffer_usage(range.buffer(), set, binding, vk::BufferUsageFlags::UNIFORM_BUFFER);
        let change = self.bindings.bind_uniform_buffer(set, binding, range.buffer().handle(), range.offset(), range.size());
        self.mark_set(set, change);
    }

    pub fn bind_storage_buffer(&mut self, set: u32, binding: u32, range: BufferRange<'_>) {
        Self::require_buffer_usage(range.buffer(), set, binding, vk::BufferUsageFlags::STORAGE_BUFFER);
        let change = self.bindings.bind_storage_buffer(set, binding, range.buffer().handle(), range.offset(), range.size());
        self.mark_set(set, change);
    }

    /// Bind a sampled, storage or input attachment image in `layout`.
    pub fn bind_image(&mut self, set: u32, binding: u32, image: &Image, layout: vk::ImageLayout) {
        Self::require_image_usage(
            image,
            set,
            binding,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::INPUT_ATTACHMENT,
        );
        let change = self.bindings.bind_image(set, binding, image.view(), layout);
        self.mark_set(set, change);
    }

    /// Bind a combined image sampler, read in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn bind_texture(&mut self, set: u32, binding: u32, image: &Image, sampler: &Sampler) {
        Self::require_image_usage(image, set, binding, vk::ImageUsageFlags::SAMPLED);
        let change = self.bindings.bind_texture(
            set,
            binding,
            image.view(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            sampler.handle(),
        );
        self.mark_set(set, change);
    }

    pub fn bind_sampler(&mut self, set: u32, binding: u32, sampler: &Sampler) {
        let change = self.bindings.bind_sampler(set, binding, sampler.handle());
        self.mark_set(set, change);
    }

    pub fn bind_vertex_buffer(&mut self, binding: u32, range: BufferRange<'_>) {
        rhi_assert!(
            (binding as usize) < MAX_VERTEX_BUFFERS,
            "vertex buffer binding {} out of range",
            binding
        );
        rhi_assert!(
            range.buffer().has_usage(vk::BufferUsageFlags::VERTEX_BUFFER),
            "buffer '{}' bound as vertex buffer without VERTEX_BUFFER usage",
            range.buffer().name()
        );

        let slot = binding as usize;
        let buffer = range.buffer().handle();
        if self.vertex_buffers[slot] == buffer && self.vertex_offsets[slot] == range.offset() {
            return;
        }
        self.vertex_buffers[slot] = buffer;
        self.vertex_offsets[slot] = range.offset();
        self.dirty_vertex_buffers |= 1 << binding;
    }

    /// Recorded immediately.
    pub fn bind_index_buffer(&mut self, range: BufferRange<'_>, index_type: vk::IndexType) {
        rhi_assert!(
            range.buffer().has_usage(vk::BufferUsageFlags::INDEX_BUFFER),
            "buffer '{}' bound as index buffer without INDEX_BUFFER usage",
            range.buffer().name()
        );
        self.device
            .backend()
            .cmd_bind_index_buffer(self.pool.cmd, range.buffer().handle(), range.offset(), index_type);
    }

    /// Write `data` into the push constant block at `offset`. Uploaded at the next draw.
    pub fn push_constants(&mut self, offset: u32, data: &[u8]) {
        let end = offset as usize + data.len();
        rhi_assert!(
            end <= MAX_PUSH_CONSTANT_SIZE,
            "push constant write {}..{} exceeds {} bytes",
            offset,
            end,
            MAX_PUSH_CONSTANT_SIZE
        );
        self.push_constants[offset as usize..end].copy_from_slice(data);
        self.push_constants_dirty = true;
    }

    /// Push a plain-old-data value.
    pub fn push_constant<T: Copy>(&mut self, offset: u32, value: &T) {
        // SAFETY: `T: Copy` has no drop glue and the slice covers exactly `value`.
        let bytes = unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) };
        self.push_constants(offset, bytes);
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.device.backend().cmd_set_viewport(self.pool.cmd, &viewport);
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.device.backend().cmd_set_scissor(self.pool.cmd, &scissor);
    }

    /// Turn pending binding state into native commands.
    ///
    /// Runs before every draw. Calling it again without binding anything in between
    /// records nothing.
    #[profiling::function]
    pub fn flush(&mut self) {
        let Some(layout) = self.layout.clone() else {
            rhi_fatal!("flush without a bound pipeline");
        };
        let backend = self.device.backend();
        let cmd = self.pool.cmd;
        let active = layout.set_mask();

        // Sets whose contents changed: look the contents up, write on a miss, bind.
        let rebuilt = self.dirty_sets & active;
        for set in for_each_bit(rebuilt) {
            let allocator = layout.allocator(set);
            let set_layout = allocator.set_layout();

            if cfg!(any(feature = "validation", debug_assertions)) {
                if let Err(err) = self.bindings.validate(set, set_layout) {
                    let name = self.pipeline.as_ref().map_or("<none>", |p| p.name());
                    rhi_fatal!("drawing with pipeline '{}': {}", name, err);
                }
            }

            let (descriptor_set, hit) = allocator.request_set(self.bindings.content_hash(set, set_layout));
            if !hit {
                backend.update_descriptor_set_with_template(
                    descriptor_set,
                    layout.update_template(set),
                    self.bindings.slots(set),
                );
                self.stats.descriptor_writes += 1;
            }

            let offsets = self.bindings.dynamic_offsets(set, set_layout);
            backend.cmd_bind_descriptor_set(cmd, layout.handle(), set, descriptor_set, &offsets);
            self.current_sets[set as usize] = descriptor_set;
            self.stats.set_binds += 1;
        }
        self.dirty_sets &= !rebuilt;
        self.dirty_sets_rebind &= !rebuilt;

        // Only dynamic offsets moved: re-bind the set that is already bound.
        let rebound = self.dirty_sets_rebind & active;
        for set in for_each_bit(rebound) {
            let descriptor_set = self.current_sets[set as usize];
            rhi_assert!(
                descriptor_set != vk::DescriptorSet::null(),
                "dynamic offset rebind of set {} before it was ever bound",
                set
            );
            let offsets = self.bindings.dynamic_offsets(set, layout.allocator(set).set_layout());
            backend.cmd_bind_descriptor_set(cmd, layout.handle(), set, descriptor_set, &offsets);
            self.stats.set_binds += 1;
            self.stats.set_rebinds += 1;
        }
        self.dirty_sets_rebind &= !rebound;

        let range = layout.resource_layout().push_constant;
        if self.push_constants_dirty && !range.is_empty() {
            backend.cmd_push_constants(
                cmd,
                layout.handle(),
                range.stage_flags,
                range.offset,
                &self.push_constants[range.offset as usize..range.end() as usize],
            );
            self.stats.push_constant_updates += 1;
            self.push_constants_dirty = false;
        }

        for (first, count) in for_each_bit_range(self.dirty_vertex_buffers) {
            let slots = first as usize..(first + count) as usize;
            backend.cmd_bind_vertex_buffers(cmd, first, &self.vertex_buffers[slots.clone()], &self.vertex_offsets[slots]);
            self.stats.vertex_buffer_binds += 1;
        }
        self.dirty_vertex_buffers = 0;
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.expect_state(CommandListState::InRenderPass, "draw");
        self.flush();
        self.device
            .backend()
            .cmd_draw(self.pool.cmd, vertex_count, instance_count, first_vertex, first_instance);
        self.stats.draws += 1;
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.expect_state(CommandListState::InRenderPass, "draw_indexed");
        self.flush();
        self.device.backend().cmd_draw_indexed(
            self.pool.cmd,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        self.stats.draws += 1;
    }

    /// Buffer and image barriers. Not allowed inside a render pass.
    pub fn pipeline_barrier(&mut self, buffers: &[BufferBarrier], images: &[ImageBarrier]) {
        self.expect_state(CommandListState::InRecording, "pipeline_barrier");
        if buffers.is_empty() && images.is_empty() {
            return;
        }
        self.device.backend().cmd_pipeline_barrier(self.pool.cmd, buffers, images);
    }

    pub fn copy_buffer(&mut self, src: BufferRange<'_>, dst: BufferRange<'_>) {
        self.expect_state(CommandListState::InRecording, "copy_buffer");
        rhi_assert!(
            src.size() <= dst.size(),
            "copy of {} bytes into a {} byte range of '{}'",
            src.size(),
            dst.size(),
            dst.buffer().name()
        );
        let region = vk::BufferCopy {
            src_offset: src.offset(),
            dst_offset: dst.offset(),
            size: src.size(),
        };
        self.device
            .backend()
            .cmd_copy_buffer(self.pool.cmd, src.buffer().handle(), dst.buffer().handle(), &[region]);
    }

    /// Close recording. Called by the device on submission.
    pub(crate) fn finish(&mut self) -> CommandPool {
        self.expect_state(CommandListState::InRecording, "submit");
        vk_check!(self.device.backend().end_command_buffer(self.pool.cmd), "vkEndCommandBuffer");
        self.state = CommandListState::ReadyForSubmit;
        self.submitted = true;
        self.pipeline = None;
        self.layout = None;
        self.pool
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        // Submitted pools are recycled by the device.
        if !self.submitted {
            log::debug!("Command list on {:?} dropped without submission", self.pool.queue);
            self.device.defer_release(self.pool.pool);
        }
    }
}
