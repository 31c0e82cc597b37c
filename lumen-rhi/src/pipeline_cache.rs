//! Pipeline cache for caching graphics pipelines with robust hashing.

use std::sync::Arc;

use ash::vk;
use lumen_core::collections::hashmap::HashMap;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use parking_lot::{Mutex, RwLock};

use crate::device::DeviceShared;
use crate::layout::CombinedResourceLayout;
use crate::pipeline::{
    uniform_blends, AlphaMode, GraphicPipeline, GraphicPipelineDesc, MeshAttributes, RasterState, RenderPassInfo,
    VertexLayoutCache,
};
use crate::pipeline_layout::PipelineLayoutCache;
use crate::shader::ShaderProgram;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub graphic_pipeline_count: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Pipeline cache for storing and reusing graphics pipelines.
#[DeviceObject]
pub struct PipelineCache {
    cache: vk::PipelineCache,
    pipelines: RwLock<HashMap<u64, Arc<GraphicPipeline>>>,
    stats: Mutex<PipelineCacheStats>,
}

impl PipelineCache {
    /// Create a pipeline cache, optionally seeded with data from a previous run.
    pub(crate) fn new(device: &Arc<DeviceShared>, initial_data: &[u8]) -> Self {
        let cache = vk_check!(device.backend().create_pipeline_cache(initial_data), "vkCreatePipelineCache");
        Self {
            cache,
            pipelines: RwLock::new(HashMap::default()),
            stats: Mutex::new(PipelineCacheStats::default()),
            device: device.clone(),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineCache { self.cache }

    /// Get or create a graphics pipeline.
    #[profiling::function]
    pub fn get_or_create(&self, desc: &GraphicPipelineDesc, layouts: &PipelineLayoutCache) -> Arc<GraphicPipeline> {
        let hash = desc.hash_key();

        if let Some(cached) = self.pipelines.read().get(&hash) {
            rhi_assert!(cached.desc() == desc, "pipeline hash collision on {:#x}", hash);
            self.stats.lock().hits += 1;
            return cached.clone();
        }

        let mut pipelines = self.pipelines.write();
        if let Some(cached) = pipelines.get(&hash) {
            self.stats.lock().hits += 1;
            return cached.clone();
        }

        log::debug!("Pipeline cache miss for '{}' ({:#x})", desc.name, hash);
        self.stats.lock().misses += 1;

        let combined = CombinedResourceLayout::merge(&desc.variant.stage_layouts());
        let layout = layouts.request_layout(&combined);
        let pipeline = Arc::new(GraphicPipeline::new(&self.device, desc, layout, self.cache));
        pipelines.insert(hash, pipeline.clone());
        pipeline
    }

    /// Pipeline for a program drawn with a mesh of `attributes` into `render_pass`.
    ///
    /// Depth and blend state come from the fixed `alpha_mode` presets, the vertex layout from
    /// the attribute mask.
    #[allow(clippy::too_many_arguments)]
    pub fn request_graphics_pso(
        &self,
        program: &ShaderProgram,
        render_pass: &RenderPassInfo,
        attributes: MeshAttributes,
        enable_depth: bool,
        alpha_mode: AlphaMode,
        vertex_layouts: &VertexLayoutCache,
        layouts: &PipelineLayoutCache,
    ) -> Arc<GraphicPipeline> {
        let variant = program.resolve_variant(attributes);
        let desc = GraphicPipelineDesc {
            name: program.name().to_owned(),
            variant: variant.clone(),
            render_pass: render_pass.clone(),
            vertex_input: vertex_layouts.request(attributes),
            depth_stencil: alpha_mode.depth_stencil(enable_depth && render_pass.has_depth()),
            blend: uniform_blends(alpha_mode.blend(), render_pass.color_count()),
            raster: RasterState::default(),
        };
        self.get_or_create(&desc, layouts)
    }

    /// Get cached pipeline data for serialization.
    pub fn cache_data(&self) -> Result<Vec<u8>, vk::Result> {
        self.device.backend().pipeline_cache_data(self.cache)
    }

    /// Get the number of cached pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.pipelines.read().is_empty()
    }

    pub fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            graphic_pipeline_count: self.len(),
            ..*self.stats.lock()
        }
    }

    /// Clear all cached pipelines. Pipelines still referenced elsewhere stay alive.
    pub fn clear(&self) {
        self.pipelines.write().clear();
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.clear();
        self.device.backend().destroy_pipeline_cache(self.cache);
    }
}
