//! Pipeline layouts keyed by their merged resource layout, and the descriptor set allocators
//! they share.

use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use lumen_core::collections::{hashmap::HashMap, SmallVec};
use lumen_core::log;
use memoffset::offset_of;
use parking_lot::{Mutex, RwLock};

use crate::backend::GpuBackend;
use crate::binding::ResourceBinding;
use crate::bitmask::for_each_bit;
use crate::descriptor::{DescriptorAllocatorStats, DescriptorSetAllocator};
use crate::layout::{CombinedResourceLayout, SetLayout};
use crate::{MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS};

/// Native pipeline layout plus what is needed to allocate and write its descriptor sets.
pub struct PipelineLayout {
    backend: Arc<dyn GpuBackend>,
    hash: u64,
    layout: CombinedResourceLayout,
    handle: vk::PipelineLayout,
    allocators: [Option<Arc<DescriptorSetAllocator>>; MAX_DESCRIPTOR_SETS],
    templates: [vk::DescriptorUpdateTemplate; MAX_DESCRIPTOR_SETS],
}

impl PipelineLayout {
    fn new(cache: &PipelineLayoutCache, layout: &CombinedResourceLayout, hash: u64) -> Self {
        let backend = cache.backend.clone();

        // Sets below the highest active one still need a layout; they get the empty one.
        let set_count = 32 - layout.set_mask.leading_zeros();
        let mut allocators: [Option<Arc<DescriptorSetAllocator>>; MAX_DESCRIPTOR_SETS] = Default::default();
        let mut set_layouts: SmallVec<[vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS]> = SmallVec::new();
        for set in 0..set_count {
            let allocator = cache.request_allocator(layout.set(set));
            set_layouts.push(allocator.handle());
            allocators[set as usize] = Some(allocator);
        }

        let handle = vk_check!(
            backend.create_pipeline_layout(&set_layouts, layout.push_constant.to_vk()),
            "vkCreatePipelineLayout"
        );

        let mut templates = [vk::DescriptorUpdateTemplate::null(); MAX_DESCRIPTOR_SETS];
        for set in for_each_bit(layout.set_mask) {
            if let Some(allocator) = &allocators[set as usize] {
                let entries = update_template_entries(allocator.set_layout());
                templates[set as usize] = vk_check!(
                    backend.create_update_template(allocator.handle(), &entries),
                    "vkCreateDescriptorUpdateTemplate"
                );
            }
        }

        log::debug!(
            "Pipeline layout {:#x} created: sets {:#b}, push constants {}..{}",
            hash,
            layout.set_mask,
            layout.push_constant.offset,
            layout.push_constant.end()
        );

        Self {
            backend,
            hash,
            layout: layout.clone(),
            handle,
            allocators,
            templates,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout { self.handle }

    #[inline]
    pub fn hash(&self) -> u64 { self.hash }

    #[inline]
    pub fn resource_layout(&self) -> &CombinedResourceLayout { &self.layout }

    #[inline]
    pub fn set_mask(&self) -> u32 { self.layout.set_mask }

    /// Allocator of an active set.
    pub fn allocator(&self, set: u32) -> &Arc<DescriptorSetAllocator> {
        match self.allocators.get(set as usize).and_then(Option::as_ref) {
            Some(allocator) => allocator,
            None => rhi_fatal!("pipeline layout {:#x} has no descriptor set {}", self.hash, set),
        }
    }

    #[inline]
    pub fn update_template(&self, set: u32) -> vk::DescriptorUpdateTemplate {
        self.templates[set as usize]
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        for template in self.templates {
            if template != vk::DescriptorUpdateTemplate::null() {
                self.backend.destroy_update_template(template);
            }
        }
        self.backend.destroy_pipeline_layout(self.handle);
    }
}

/// Maps every declared binding onto its slot in a `[ResourceBinding; MAX_BINDINGS_PER_SET]`
/// table. Array elements sit in consecutive slots.
fn update_template_entries(layout: &SetLayout) -> SmallVec<[vk::DescriptorUpdateTemplateEntry; MAX_BINDINGS_PER_SET]> {
    let stride = size_of::<ResourceBinding>();
    layout
        .bindings()
        .map(|binding| {
            let field = match binding.class() {
                Some(class) if class.is_buffer() => offset_of!(ResourceBinding, buffer),
                _ => offset_of!(ResourceBinding, image),
            };
            vk::DescriptorUpdateTemplateEntry {
                dst_binding: binding.binding,
                dst_array_element: 0,
                descriptor_count: binding.count,
                descriptor_type: binding.descriptor_type,
                offset: binding.binding as usize * stride + field,
                stride,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineLayoutCacheStats {
    pub layout_count: usize,
    pub allocator_count: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Device-lifetime cache of pipeline layouts and descriptor set allocators.
pub struct PipelineLayoutCache {
    backend: Arc<dyn GpuBackend>,
    ring_size: usize,
    initial_pool_size: u32,
    layouts: RwLock<HashMap<u64, Arc<PipelineLayout>>>,
    allocators: RwLock<HashMap<u64, Arc<DescriptorSetAllocator>>>,
    counters: Mutex<Counters>,
}

impl PipelineLayoutCache {
    pub fn new(backend: Arc<dyn GpuBackend>, ring_size: usize, initial_pool_size: u32) -> Self {
        Self {
            backend,
            ring_size,
            initial_pool_size,
            layouts: RwLock::new(HashMap::default()),
            allocators: RwLock::new(HashMap::default()),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Get or create the pipeline layout of a merged resource layout.
    #[profiling::function]
    pub fn request_layout(&self, layout: &CombinedResourceLayout) -> Arc<PipelineLayout> {
        let hash = layout.hash_key();

        if let Some(existing) = self.layouts.read().get(&hash) {
            rhi_assert!(existing.layout == *layout, "pipeline layout hash collision on {:#x}", hash);
            self.counters.lock().hits += 1;
            return existing.clone();
        }

        let mut layouts = self.layouts.write();
        // Another thread may have created it between the two locks.
        if let Some(existing) = layouts.get(&hash) {
            self.counters.lock().hits += 1;
            return existing.clone();
        }

        self.counters.lock().misses += 1;
        let created = Arc::new(PipelineLayout::new(self, layout, hash));
        layouts.insert(hash, created.clone());
        created
    }

    /// Get or create the allocator shared by every set with the same per-kind masks.
    pub fn request_allocator(&self, set: &SetLayout) -> Arc<DescriptorSetAllocator> {
        let key = set.allocator_key();

        if let Some(allocator) = self.allocators.read().get(&key) {
            return allocator.clone();
        }

        self.allocators
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(DescriptorSetAllocator::new(
                    self.backend.clone(),
                    set,
                    self.ring_size,
                    self.initial_pool_size,
                ))
            })
            .clone()
    }

    /// Advance every allocator's recycle ring.
    #[profiling::function]
    pub fn begin_frame(&self) {
        for allocator in self.allocators.read().values() {
            allocator.begin_frame();
        }
    }

    pub fn stats(&self) -> PipelineLayoutCacheStats {
        let counters = self.counters.lock();
        PipelineLayoutCacheStats {
            layout_count: self.layouts.read().len(),
            allocator_count: self.allocators.read().len(),
            hits: counters.hits,
            misses: counters.misses,
        }
    }

    /// Per-allocator statistics keyed by allocator key.
    pub fn allocator_stats(&self) -> Vec<(u64, DescriptorAllocatorStats)> {
        let mut stats = self
            .allocators
            .read()
            .iter()
            .map(|(key, allocator)| (*key, allocator.stats()))
            .collect::<Vec<_>>();
        stats.sort_by_key(|(key, _)| *key);
        stats
    }

    /// Drop every cached layout and allocator. The device must be idle.
    pub fn clear(&self) {
        self.layouts.write().clear();
        self.allocators.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::shader::{ShaderResourceLayout, ShaderStage};

    fn combined(texture_binding: u32) -> CombinedResourceLayout {
        let mut vs = ShaderResourceLayout::new(ShaderStage::Vertex);
        vs.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();
        vs.add_push_constant(0, 64).unwrap();
        let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
        fs.add_binding(1, texture_binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1).unwrap();
        CombinedResourceLayout::merge(&[&vs, &fs])
    }

    #[test]
    fn second_request_creates_nothing() {
        let backend = Arc::new(NullBackend::new());
        let cache = PipelineLayoutCache::new(backend.clone(), 4, 8);

        let first = cache.request_layout(&combined(0));
        let created = backend.stats().created;
        let second = cache.request_layout(&combined(0));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.stats().created, created);
        assert_eq!(cache.stats(), PipelineLayoutCacheStats { layout_count: 1, allocator_count: 2, hits: 1, misses: 1 });
    }

    #[test]
    fn structurally_equal_sets_share_allocators() {
        let backend = Arc::new(NullBackend::new());
        let cache = PipelineLayoutCache::new(backend.clone(), 4, 8);

        let a = cache.request_layout(&combined(0));
        let mut other_vs = ShaderResourceLayout::new(ShaderStage::Vertex);
        other_vs.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();
        let b = cache.request_layout(&CombinedResourceLayout::merge(&[&other_vs]));

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(a.allocator(0), b.allocator(0)));
        assert_eq!(a.allocator(0).handle(), b.allocator(0).handle());
    }

    #[test]
    fn inactive_lower_sets_get_empty_layouts() {
        let backend = Arc::new(NullBackend::new());
        let cache = PipelineLayoutCache::new(backend.clone(), 4, 8);

        let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
        fs.add_binding(2, 0, vk::DescriptorType::STORAGE_BUFFER, 1).unwrap();
        let layout = cache.request_layout(&CombinedResourceLayout::merge(&[&fs]));

        assert_eq!(layout.set_mask(), 0b100);
        assert!(layout.allocator(0).set_layout().is_empty());
        assert!(Arc::ptr_eq(layout.allocator(0), layout.allocator(1)));
        assert_eq!(layout.update_template(0), vk::DescriptorUpdateTemplate::null());
        assert_ne!(layout.update_template(2), vk::DescriptorUpdateTemplate::null());
    }

    #[test]
    fn template_entries_index_slot_table() {
        let mut set = SetLayout::default();
        set.add_binding(0, crate::layout::LayoutBinding {
            binding: 3,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 2,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        })
        .unwrap();
        set.add_binding(0, crate::layout::LayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
        })
        .unwrap();

        let entries = update_template_entries(&set);
        let stride = size_of::<ResourceBinding>();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dst_binding, 1);
        assert_eq!(entries[0].offset, stride + offset_of!(ResourceBinding, buffer));
        assert_eq!(entries[1].offset, 3 * stride + offset_of!(ResourceBinding, image));
        assert_eq!(entries[1].descriptor_count, 2);
        assert_eq!(entries[1].stride, stride);
    }
}
