//! Lumen RHI (Render Hardware Interface).
//!
//! Resource creation, shader reflection, cached pipeline layouts and pipelines, descriptor
//! set allocation and a lazily binding command list over a pluggable native backend.

#[macro_use]
mod error;

pub mod backend;
pub mod bitmask;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod layout;
pub mod pipeline;
pub mod pipeline_cache;
pub mod pipeline_layout;
pub mod queue;
pub mod sampler;
pub mod shader;
pub mod texture;
mod barrier;
mod binding;
mod defer_release;
mod upload;
mod utility;

pub(crate) use paste::paste;

/// Descriptor sets a pipeline layout can address.
pub const MAX_DESCRIPTOR_SETS: usize = 4;
/// Binding slots per descriptor set.
pub const MAX_BINDINGS_PER_SET: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 8;
/// Bytes of push constant storage every stage shares.
pub const MAX_PUSH_CONSTANT_SIZE: usize = 128;
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

pub use ash::vk;

pub use backend::null::{NullBackend, NullStats, RecordedCommand, Submission};
pub use backend::vulkan::{SurfaceDesc, SwapchainConfig, VulkanBackend, VulkanBackendDesc};
pub use backend::GpuBackend;
pub use barrier::{BufferBarrier, BufferState, ImageBarrier, ImageState};
pub use binding::ResourceBinding;
pub use buffer::{Buffer, BufferDesc, BufferRange, MemoryDomain};
pub use command::{ColorTarget, CommandList, CommandListState, CommandListStats, DepthTarget, RenderTargets};
pub use defer_release::LastFreedStats;
pub use descriptor::{DescriptorAllocatorStats, DescriptorSetAllocator, TemporaryHashmap};
pub use device::{RenderDevice, RhiConfig, RhiConfigBuilder, RhiConfigBuilderError, SubmitSignal, SwapchainImage};
pub use error::{BindingError, LayoutError, ShaderError};
pub use layout::{CombinedResourceLayout, DescriptorClass, LayoutBinding, PushConstantRange, SetLayout};
pub use pipeline::{
    AlphaMode, BlendState, DepthStencilState, GraphicPipeline, GraphicPipelineDesc, GraphicPipelineDescBuilder,
    MeshAttribute, MeshAttributes, RasterState, RenderPassInfo, VertexAttribute, VertexBinding, VertexInputLayout,
};
pub use pipeline_cache::{PipelineCache, PipelineCacheStats};
pub use pipeline_layout::{PipelineLayout, PipelineLayoutCache, PipelineLayoutCacheStats};
pub use queue::{Queue, QueueType};
pub use sampler::{AddressMode, BorderColor, CompareOp, Filter, MipmapMode, Sampler, SamplerDesc};
pub use shader::{reflect_spirv, Shader, ShaderProgram, ShaderResourceLayout, ShaderStage, ShaderVariant};
pub use texture::{mip_chain, Image, ImageDesc, ImageType, MipInfo};
