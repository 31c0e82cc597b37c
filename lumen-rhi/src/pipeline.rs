//! Graphics pipeline state, vertex input layouts and the pipeline object itself.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use derive_builder::Builder;
use enumflags2::{bitflags, BitFlags};
use lumen_core::collections::{hashmap::HashMap, smallvec, SmallVec, StableHasher};
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use parking_lot::RwLock;

use crate::backend::GraphicsPipelineCreateInfo;
use crate::device::DeviceShared;
use crate::pipeline_layout::PipelineLayout;
use crate::shader::ShaderVariant;
use crate::{MAX_COLOR_ATTACHMENTS, MAX_VERTEX_BUFFERS};

/// Vertex streams a mesh may provide.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MeshAttribute {
    Position = 1 << 0,
    Normal = 1 << 1,
    Tangent = 1 << 2,
    Uv = 1 << 3,
    Color = 1 << 4,
}

pub type MeshAttributes = BitFlags<MeshAttribute>;

impl MeshAttribute {
    /// Shader input location of the attribute.
    pub fn location(self) -> u32 {
        match self {
            MeshAttribute::Position => 0,
            MeshAttribute::Normal => 1,
            MeshAttribute::Tangent => 2,
            MeshAttribute::Uv => 3,
            MeshAttribute::Color => 4,
        }
    }

    pub fn format(self) -> vk::Format {
        match self {
            MeshAttribute::Position | MeshAttribute::Normal => vk::Format::R32G32B32_SFLOAT,
            MeshAttribute::Tangent | MeshAttribute::Color => vk::Format::R32G32B32A32_SFLOAT,
            MeshAttribute::Uv => vk::Format::R32G32_SFLOAT,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            MeshAttribute::Position | MeshAttribute::Normal => 12,
            MeshAttribute::Tangent | MeshAttribute::Color => 16,
            MeshAttribute::Uv => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Vertex buffer bindings and the attributes read from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexInputLayout {
    bindings: SmallVec<[VertexBinding; MAX_VERTEX_BUFFERS]>,
    attributes: SmallVec<[VertexAttribute; 8]>,
}

impl VertexInputLayout {
    pub fn new(bindings: &[VertexBinding], attributes: &[VertexAttribute]) -> Self {
        for binding in bindings {
            rhi_assert!(
                (binding.binding as usize) < MAX_VERTEX_BUFFERS,
                "vertex binding {} exceeds the {} vertex buffer slots",
                binding.binding,
                MAX_VERTEX_BUFFERS
            );
        }
        for attribute in attributes {
            rhi_assert!(
                bindings.iter().any(|b| b.binding == attribute.binding),
                "vertex attribute at location {} reads undeclared binding {}",
                attribute.location,
                attribute.binding
            );
        }

        Self {
            bindings: bindings.iter().copied().collect(),
            attributes: attributes.iter().copied().collect(),
        }
    }

    /// Derive the deterministic stream layout of a mesh.
    ///
    /// Position always occupies binding 0. Normal and tangent share the next binding, uv and
    /// color the one after; binding numbers stay compact when a group is absent.
    pub fn from_mesh_attributes(attributes: MeshAttributes) -> Self {
        const GROUPS: [&[MeshAttribute]; 3] = [
            &[MeshAttribute::Position],
            &[MeshAttribute::Normal, MeshAttribute::Tangent],
            &[MeshAttribute::Uv, MeshAttribute::Color],
        ];

        let mut layout = Self::default();
        for group in GROUPS {
            let binding = layout.bindings.len() as u32;
            let mut stride = 0;
            for &attribute in group.iter().filter(|a| attributes.contains(**a)) {
                layout.attributes.push(VertexAttribute {
                    location: attribute.location(),
                    binding,
                    format: attribute.format(),
                    offset: stride,
                });
                stride += attribute.size();
            }
            if stride > 0 {
                layout.bindings.push(VertexBinding {
                    binding,
                    stride,
                    input_rate: vk::VertexInputRate::VERTEX,
                });
            }
        }
        layout
    }

    #[inline]
    pub fn bindings(&self) -> &[VertexBinding] { &self.bindings }

    #[inline]
    pub fn attributes(&self) -> &[VertexAttribute] { &self.attributes }

    /// Shader input locations this layout feeds.
    pub fn location_mask(&self) -> u32 {
        self.attributes.iter().fold(0, |mask, a| mask | (1 << a.location))
    }

    pub fn hash_key(&self) -> u64 {
        StableHasher::hash_one(self)
    }
}

/// Vertex layouts keyed by mesh attribute mask.
#[derive(Default)]
pub struct VertexLayoutCache {
    layouts: RwLock<HashMap<MeshAttributes, Arc<VertexInputLayout>>>,
}

impl VertexLayoutCache {
    pub fn request(&self, attributes: MeshAttributes) -> Arc<VertexInputLayout> {
        if let Some(layout) = self.layouts.read().get(&attributes) {
            return layout.clone();
        }

        self.layouts
            .write()
            .entry(attributes)
            .or_insert_with(|| Arc::new(VertexInputLayout::from_mesh_attributes(attributes)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.layouts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.read().is_empty()
    }
}

/// Attachment formats a pipeline renders into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassInfo {
    pub color_formats: SmallVec<[vk::Format; MAX_COLOR_ATTACHMENTS]>,
    /// `UNDEFINED` when there is no depth attachment.
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

impl Default for RenderPassInfo {
    fn default() -> Self {
        Self {
            color_formats: SmallVec::new(),
            depth_format: vk::Format::UNDEFINED,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

impl RenderPassInfo {
    pub fn new(color_formats: &[vk::Format], depth_format: Option<vk::Format>) -> Self {
        rhi_assert!(
            color_formats.len() <= MAX_COLOR_ATTACHMENTS,
            "{} color attachments exceed the limit of {}",
            color_formats.len(),
            MAX_COLOR_ATTACHMENTS
        );
        Self {
            color_formats: color_formats.iter().copied().collect(),
            depth_format: depth_format.unwrap_or(vk::Format::UNDEFINED),
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn color_count(&self) -> usize {
        self.color_formats.len()
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.depth_format != vk::Format::UNDEFINED
    }

    pub fn hash_key(&self) -> u64 {
        StableHasher::hash_one(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare_op: vk::CompareOp::ALWAYS,
        }
    }

    pub fn read_only() -> Self {
        Self {
            depth_test: true,
            depth_write: false,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }

    pub fn read_write() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for BlendState {
    fn default() -> Self {
        Self::opaque()
    }
}

impl BlendState {
    pub fn opaque() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    /// Straight alpha blending.
    pub fn alpha() -> Self {
        Self {
            enable: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.enable)
            .src_color_blend_factor(self.src_color)
            .dst_color_blend_factor(self.dst_color)
            .color_blend_op(self.color_op)
            .src_alpha_blend_factor(self.src_alpha)
            .dst_alpha_blend_factor(self.dst_alpha)
            .alpha_blend_op(self.alpha_op)
            .color_write_mask(self.write_mask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// Material transparency, which picks the fixed depth and blend presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    pub fn depth_stencil(self, enable_depth: bool) -> DepthStencilState {
        match (enable_depth, self) {
            (false, _) => DepthStencilState::disabled(),
            (true, AlphaMode::Opaque) => DepthStencilState::read_write(),
            (true, _) => DepthStencilState::read_only(),
        }
    }

    pub fn blend(self) -> BlendState {
        match self {
            AlphaMode::Opaque => BlendState::opaque(),
            _ => BlendState::alpha(),
        }
    }
}

/// Everything a graphics pipeline is built from.
#[derive(Clone, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct GraphicPipelineDesc {
    #[builder(setter(into), default)]
    pub name: String,
    pub variant: Arc<ShaderVariant>,
    pub render_pass: RenderPassInfo,
    #[builder(default = "Arc::new(VertexInputLayout::default())")]
    pub vertex_input: Arc<VertexInputLayout>,
    #[builder(default)]
    pub depth_stencil: DepthStencilState,
    /// Blend state per color attachment. Missing entries are opaque, extra entries ignored.
    #[builder(default)]
    pub blend: SmallVec<[BlendState; MAX_COLOR_ATTACHMENTS]>,
    #[builder(default)]
    pub raster: RasterState,
}

impl GraphicPipelineDescBuilder {
    fn validate(&self) -> Result<(), String> {
        if let (Some(render_pass), Some(depth)) = (&self.render_pass, &self.depth_stencil) {
            if depth.depth_test && !render_pass.has_depth() {
                return Err("depth testing requires a depth attachment".to_owned());
            }
        }
        Ok(())
    }
}

impl GraphicPipelineDesc {
    pub fn builder() -> GraphicPipelineDescBuilder {
        GraphicPipelineDescBuilder::default()
    }

    /// Blend state of every color attachment the render pass has.
    pub fn attachment_blends(&self) -> SmallVec<[BlendState; MAX_COLOR_ATTACHMENTS]> {
        (0..self.render_pass.color_count())
            .map(|i| self.blend.get(i).copied().unwrap_or_default())
            .collect()
    }

    /// Cache key. The debug name does not take part.
    pub fn hash_key(&self) -> u64 {
        let mut hasher = StableHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Hash for GraphicPipelineDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant.hash().hash(state);
        self.render_pass.hash(state);
        self.depth_stencil.hash(state);
        self.attachment_blends().hash(state);
        self.raster.hash(state);
        self.vertex_input.hash(state);
    }
}

impl PartialEq for GraphicPipelineDesc {
    fn eq(&self, other: &Self) -> bool {
        self.variant.hash() == other.variant.hash()
            && self.render_pass == other.render_pass
            && self.depth_stencil == other.depth_stencil
            && self.attachment_blends() == other.attachment_blends()
            && self.raster == other.raster
            && self.vertex_input == other.vertex_input
    }
}

impl Eq for GraphicPipelineDesc {}

impl std::fmt::Debug for GraphicPipelineDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicPipelineDesc")
            .field("name", &self.name)
            .field("variant", &format_args!("{:#x}", self.variant.hash()))
            .field("render_pass", &self.render_pass)
            .field("depth_stencil", &self.depth_stencil)
            .field("raster", &self.raster)
            .finish_non_exhaustive()
    }
}

/// Compiled graphics pipeline (PSO).
#[DeviceObject]
pub struct GraphicPipeline {
    name: String,
    hash: u64,
    desc: GraphicPipelineDesc,
    layout: Arc<PipelineLayout>,
    pipeline: vk::Pipeline,
}

impl GraphicPipeline {
    #[profiling::function]
    pub(crate) fn new(
        device: &Arc<DeviceShared>,
        desc: &GraphicPipelineDesc,
        layout: Arc<PipelineLayout>,
        cache: vk::PipelineCache,
    ) -> Self {
        let vertex = desc.variant.vertex();
        let fragment = desc.variant.fragment();

        let provided = desc.vertex_input.location_mask();
        let consumed = vertex.resource_layout().input_mask;
        rhi_assert!(
            consumed & !provided == 0,
            "pipeline '{}': vertex shader reads locations {:#b} the vertex layout does not provide",
            desc.name,
            consumed & !provided
        );
        rhi_assert!(
            fragment.resource_layout().output_mask >> desc.render_pass.color_count() == 0,
            "pipeline '{}': fragment shader writes more targets than the {} color attachments",
            desc.name,
            desc.render_pass.color_count()
        );

        let blend = desc.attachment_blends();
        let info = GraphicsPipelineCreateInfo {
            layout: layout.handle(),
            vertex_module: vertex.handle(),
            vertex_entry: vertex.entry_point(),
            fragment_module: fragment.handle(),
            fragment_entry: fragment.entry_point(),
            render_pass: &desc.render_pass,
            vertex_input: &desc.vertex_input,
            depth_stencil: desc.depth_stencil,
            blend: &blend,
            raster: desc.raster,
        };
        let pipeline = vk_check!(
            device.backend().create_graphics_pipeline(cache, &info),
            "vkCreateGraphicsPipelines"
        );

        let hash = desc.hash_key();
        log::debug!("Graphic pipeline '{}' ({:#x}) created", desc.name, hash);

        Self {
            name: desc.name.clone(),
            hash,
            desc: desc.clone(),
            layout,
            pipeline,
            device: device.clone(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    /// Get the raw Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline { self.pipeline }

    #[inline]
    pub fn layout(&self) -> &Arc<PipelineLayout> { &self.layout }

    #[inline]
    pub fn desc(&self) -> &GraphicPipelineDesc { &self.desc }

    #[inline]
    pub fn render_pass(&self) -> &RenderPassInfo { &self.desc.render_pass }

    #[inline]
    pub fn hash(&self) -> u64 { self.hash }
}

impl Drop for GraphicPipeline {
    fn drop(&mut self) {
        self.device.defer_release(self.pipeline);
    }
}

/// Blend states for `count` attachments all set to `blend`.
pub fn uniform_blends(blend: BlendState, count: usize) -> SmallVec<[BlendState; MAX_COLOR_ATTACHMENTS]> {
    smallvec![blend; count]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_only_layout() {
        let layout = VertexInputLayout::from_mesh_attributes(MeshAttribute::Position.into());
        assert_eq!(layout.bindings().len(), 1);
        assert_eq!(layout.bindings()[0].stride, 12);
        assert_eq!(layout.location_mask(), 0b1);
    }

    #[test]
    fn full_mesh_layout_groups_streams() {
        let layout = VertexInputLayout::from_mesh_attributes(MeshAttributes::all());
        assert_eq!(layout.bindings().len(), 3);
        assert_eq!(layout.bindings()[1].stride, 12 + 16);
        assert_eq!(layout.bindings()[2].stride, 8 + 16);

        let tangent = layout.attributes().iter().find(|a| a.location == 2).unwrap();
        assert_eq!((tangent.binding, tangent.offset), (1, 12));
        let color = layout.attributes().iter().find(|a| a.location == 4).unwrap();
        assert_eq!((color.binding, color.offset), (2, 8));
    }

    #[test]
    fn missing_group_keeps_bindings_compact() {
        let layout = VertexInputLayout::from_mesh_attributes(MeshAttribute::Position | MeshAttribute::Uv);
        assert_eq!(layout.bindings().len(), 2);
        let uv = layout.attributes().iter().find(|a| a.location == 3).unwrap();
        assert_eq!(uv.binding, 1);
        assert_eq!(layout.location_mask(), 0b1001);
    }

    #[test]
    fn vertex_layout_cache_reuses_layouts() {
        let cache = VertexLayoutCache::default();
        let a = cache.request(MeshAttribute::Position | MeshAttribute::Normal);
        let b = cache.request(MeshAttribute::Normal | MeshAttribute::Position);
        assert!(Arc::ptr_eq(&a, &b));
        cache.request(MeshAttributes::all());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn alpha_mode_presets() {
        assert_eq!(AlphaMode::Opaque.depth_stencil(true), DepthStencilState::read_write());
        assert_eq!(AlphaMode::Blend.depth_stencil(true), DepthStencilState::read_only());
        assert_eq!(AlphaMode::Mask.depth_stencil(false), DepthStencilState::disabled());
        assert!(!AlphaMode::Opaque.blend().enable);
        assert!(AlphaMode::Blend.blend().enable);
    }

    #[test]
    fn render_pass_hash_covers_formats() {
        let a = RenderPassInfo::new(&[vk::Format::R8G8B8A8_UNORM], Some(vk::Format::D32_SFLOAT));
        let b = RenderPassInfo::new(&[vk::Format::R8G8B8A8_SRGB], Some(vk::Format::D32_SFLOAT));
        assert_ne!(a.hash_key(), b.hash_key());
        assert_eq!(a.hash_key(), a.clone().hash_key());
        assert_ne!(a.hash_key(), a.clone().with_samples(vk::SampleCountFlags::TYPE_4).hash_key());
    }
}
