use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferState {
    Undefined,
    HostWrite,
    TransferSrc,
    TransferDst,
    Uniform,
    Storage,
    Vertex,
    Index,
    Indirect,
}

impl BufferState {
    pub fn into_pipeline_stage(self, shader_used_stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
        match self {
            BufferState::Undefined => vk::PipelineStageFlags2::NONE,
            BufferState::HostWrite => vk::PipelineStageFlags2::HOST,
            BufferState::TransferSrc |
            BufferState::TransferDst => vk::PipelineStageFlags2::TRANSFER,
            BufferState::Uniform => shader_used_stage,
            BufferState::Storage => shader_used_stage,
            BufferState::Vertex => vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            BufferState::Index => vk::PipelineStageFlags2::INDEX_INPUT,
            BufferState::Indirect => vk::PipelineStageFlags2::DRAW_INDIRECT,
        }
    }

    pub fn into_access_flag(self, is_readonly: bool) -> vk::AccessFlags2 {
        match self {
            BufferState::Undefined => vk::AccessFlags2::NONE,
            BufferState::HostWrite => vk::AccessFlags2::HOST_WRITE,
            BufferState::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            BufferState::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            BufferState::Uniform => vk::AccessFlags2::UNIFORM_READ,
            BufferState::Storage => if is_readonly { vk::AccessFlags2::SHADER_STORAGE_READ } else { vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE },
            BufferState::Vertex => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            BufferState::Index => vk::AccessFlags2::INDEX_READ,
            BufferState::Indirect => vk::AccessFlags2::INDIRECT_COMMAND_READ,
        }
    }

    /// The state a buffer with these usage bits settles in after an upload.
    pub fn from_usage(usage: vk::BufferUsageFlags) -> Self {
        if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            BufferState::Vertex
        } else if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            BufferState::Index
        } else if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
            BufferState::Indirect
        } else if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            BufferState::Storage
        } else if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            BufferState::Uniform
        } else {
            BufferState::TransferSrc
        }
    }
}

/// A buffer range transition, optionally handing ownership between queue families.
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_state: BufferState,
    pub dst_state: BufferState,
    pub shader_stages: vk::PipelineStageFlags2,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub readonly: bool,
}

impl BufferBarrier {
    pub fn new(buffer: vk::Buffer, src_state: BufferState, dst_state: BufferState) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_state,
            dst_state,
            shader_stages: vk::PipelineStageFlags2::ALL_GRAPHICS,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            readonly: true,
        }
    }

    pub fn with_range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    /// Transfer ownership between two queue families. Equal families collapse to a plain barrier.
    pub fn with_queue_transfer(mut self, src_family: u32, dst_family: u32) -> Self {
        if src_family != dst_family {
            self.src_queue_family = src_family;
            self.dst_queue_family = dst_family;
        }
        self
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(self.src_state.into_pipeline_stage(self.shader_stages))
            .src_access_mask(self.src_state.into_access_flag(self.readonly))
            .dst_stage_mask(self.dst_state.into_pipeline_stage(self.shader_stages))
            .dst_access_mask(self.dst_state.into_access_flag(self.readonly))
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    Undefined,
    TransferSrc,
    TransferDst,
    Sampled,
    Storage,
    General,
    Color,
    DepthStencil,
    Present,
}

impl ImageState {
    pub fn into_pipeline_stage(self, shader_used_stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
        match self {
            ImageState::Undefined => vk::PipelineStageFlags2::NONE,
            ImageState::TransferSrc |
            ImageState::TransferDst => vk::PipelineStageFlags2::TRANSFER,
            ImageState::Sampled => shader_used_stage,
            ImageState::Storage => shader_used_stage,
            ImageState::General => shader_used_stage,
            ImageState::Color => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ImageState::DepthStencil => vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            ImageState::Present => vk::PipelineStageFlags2::NONE,
        }
    }

    pub fn into_access_flag(self, is_readonly: bool) -> vk::AccessFlags2 {
        match self {
            ImageState::Undefined => vk::AccessFlags2::NONE,
            ImageState::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            ImageState::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            ImageState::Sampled => vk::AccessFlags2::SHADER_SAMPLED_READ,
            ImageState::Storage => if is_readonly { vk::AccessFlags2::SHADER_STORAGE_READ } else { vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE },
            ImageState::General => if is_readonly { vk::AccessFlags2::MEMORY_READ } else { vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE },
            ImageState::Color => if is_readonly { vk::AccessFlags2::COLOR_ATTACHMENT_READ } else { vk::AccessFlags2::COLOR_ATTACHMENT_WRITE },
            ImageState::DepthStencil => if is_readonly { vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ } else { vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE },
            ImageState::Present => vk::AccessFlags2::NONE,
        }
    }

    pub fn into_image_layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::Sampled => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::Storage => vk::ImageLayout::GENERAL,
            ImageState::General => vk::ImageLayout::GENERAL,
            ImageState::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ImageState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Inverse of [`ImageState::into_image_layout`] for the layouts images are created in.
    pub fn from_image_layout(layout: vk::ImageLayout) -> Self {
        match layout {
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => ImageState::TransferSrc,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => ImageState::TransferDst,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => ImageState::Sampled,
            vk::ImageLayout::GENERAL => ImageState::General,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => ImageState::Color,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => ImageState::DepthStencil,
            vk::ImageLayout::PRESENT_SRC_KHR => ImageState::Present,
            _ => ImageState::Undefined,
        }
    }
}

/// An image subresource transition, optionally handing ownership between queue families.
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub src_state: ImageState,
    pub dst_state: ImageState,
    pub shader_stages: vk::PipelineStageFlags2,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub readonly: bool,
    pub discard: bool,
}

impl ImageBarrier {
    pub fn new(image: vk::Image, aspect: vk::ImageAspectFlags, src_state: ImageState, dst_state: ImageState) -> Self {
        Self {
            image,
            aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
            src_state,
            dst_state,
            shader_stages: vk::PipelineStageFlags2::ALL_GRAPHICS,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            readonly: false,
            discard: false,
        }
    }

    pub fn with_mips(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.base_mip_level = base_mip_level;
        self.level_count = level_count;
        self
    }

    pub fn with_queue_transfer(mut self, src_family: u32, dst_family: u32) -> Self {
        if src_family != dst_family {
            self.src_queue_family = src_family;
            self.dst_queue_family = dst_family;
        }
        self
    }

    /// Contents before the barrier may be thrown away.
    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        let old_layout = if self.discard {
            vk::ImageLayout::UNDEFINED
        } else {
            self.src_state.into_image_layout()
        };

        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_state.into_pipeline_stage(self.shader_stages))
            .src_access_mask(self.src_state.into_access_flag(self.readonly))
            .dst_stage_mask(self.dst_state.into_pipeline_stage(self.shader_stages))
            .dst_access_mask(self.dst_state.into_access_flag(self.readonly))
            .src_queue_family_index(self.src_queue_family)
            .dst_queue_family_index(self.dst_queue_family)
            .old_layout(old_layout)
            .new_layout(self.dst_state.into_image_layout())
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: self.base_mip_level,
                level_count: self.level_count,
                base_array_layer: self.base_array_layer,
                layer_count: self.layer_count,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_family_transfer_is_ignored() {
        let barrier = BufferBarrier::new(vk::Buffer::null(), BufferState::TransferDst, BufferState::Vertex)
            .with_queue_transfer(2, 2);
        assert_eq!(barrier.src_queue_family, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family, vk::QUEUE_FAMILY_IGNORED);

        let barrier = barrier.with_queue_transfer(1, 0);
        let raw = barrier.to_vk();
        assert_eq!(raw.src_queue_family_index, 1);
        assert_eq!(raw.dst_queue_family_index, 0);
        assert_eq!(raw.dst_stage_mask, vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT);
    }

    #[test]
    fn discard_drops_old_layout() {
        let barrier = ImageBarrier::new(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            ImageState::Sampled,
            ImageState::TransferDst,
        )
        .with_mips(2, 1)
        .discard();
        let raw = barrier.to_vk();
        assert_eq!(raw.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(raw.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(raw.subresource_range.base_mip_level, 2);
        assert_eq!(raw.subresource_range.level_count, 1);
    }

    #[test]
    fn buffer_state_follows_usage() {
        assert_eq!(BufferState::from_usage(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST), BufferState::Vertex);
        assert_eq!(BufferState::from_usage(vk::BufferUsageFlags::UNIFORM_BUFFER), BufferState::Uniform);
    }
}
