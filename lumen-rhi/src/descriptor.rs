//! Descriptor set allocation: pool-of-pools plus a frame-windowed content cache.

use std::sync::Arc;

use ash::vk;
use lumen_core::collections::{hashmap::HashMap, SmallVec};
use lumen_core::log;
use parking_lot::Mutex;

use crate::backend::GpuBackend;
use crate::layout::SetLayout;

struct TemporaryEntry<T> {
    ring: usize,
    value: T,
}

/// Hash-addressed values that age out after `ring_size` frames without a request.
///
/// Every hit re-registers the entry in the current ring slot. [`begin_frame`](Self::begin_frame)
/// advances the ring and moves entries whose latest registration sits in the overwritten slot
/// to the vacant list, where they wait to be reused for another hash.
pub struct TemporaryHashmap<T> {
    rings: Vec<Vec<u64>>,
    index: usize,
    live: HashMap<u64, TemporaryEntry<T>>,
    vacant: Vec<T>,
}

impl<T: Copy> TemporaryHashmap<T> {
    pub fn new(ring_size: usize) -> Self {
        rhi_assert!(ring_size.is_power_of_two(), "ring size {} is not a power of two", ring_size);
        Self {
            rings: (0..ring_size).map(|_| Vec::new()).collect(),
            index: 0,
            live: HashMap::default(),
            vacant: Vec::new(),
        }
    }

    /// Look up a live value, promoting it to the current frame.
    pub fn request(&mut self, hash: u64) -> Option<T> {
        let index = self.index;
        let entry = self.live.get_mut(&hash)?;
        if entry.ring != index {
            entry.ring = index;
            self.rings[index].push(hash);
        }
        Some(entry.value)
    }

    /// Associate `value` with `hash` in the current frame.
    pub fn insert(&mut self, hash: u64, value: T) {
        let previous = self.live.insert(hash, TemporaryEntry { ring: self.index, value });
        rhi_assert!(previous.is_none(), "temporary hashmap already holds {:#x}", hash);
        self.rings[self.index].push(hash);
    }

    #[inline]
    pub fn pop_vacant(&mut self) -> Option<T> {
        self.vacant.pop()
    }

    #[inline]
    pub fn push_vacant(&mut self, value: T) {
        self.vacant.push(value);
    }

    /// Advance to the next ring slot and recycle everything last requested `ring_size` frames ago.
    pub fn begin_frame(&mut self) {
        self.index = (self.index + 1) & (self.rings.len() - 1);

        let mut aged = std::mem::take(&mut self.rings[self.index]);
        for hash in aged.drain(..) {
            // Entries promoted since are still registered in a newer slot.
            if self.live.get(&hash).is_some_and(|entry| entry.ring == self.index) {
                if let Some(entry) = self.live.remove(&hash) {
                    self.vacant.push(entry.value);
                }
            }
        }
        self.rings[self.index] = aged;
    }

    #[inline]
    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub fn vacant_len(&self) -> usize {
        self.vacant.len()
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.rings.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorAllocatorStats {
    pub pool_count: usize,
    /// Descriptor sets allocated across all pools.
    pub capacity: u32,
    pub live_sets: usize,
    pub vacant_sets: usize,
    pub hits: u64,
    pub misses: u64,
}

struct DescriptorPool {
    pool: vk::DescriptorPool,
    max_sets: u32,
}

struct AllocatorState {
    pools: Vec<DescriptorPool>,
    next_pool_size: u32,
    sets: TemporaryHashmap<vk::DescriptorSet>,
    hits: u64,
    misses: u64,
}

/// Owns the native set layout of one canonical [`SetLayout`] and every descriptor set allocated for it.
pub struct DescriptorSetAllocator {
    backend: Arc<dyn GpuBackend>,
    key: u64,
    layout: SetLayout,
    set_layout: vk::DescriptorSetLayout,
    state: Mutex<AllocatorState>,
}

impl DescriptorSetAllocator {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        layout: &SetLayout,
        ring_size: usize,
        initial_pool_size: u32,
    ) -> Self {
        let key = layout.allocator_key();

        // Allocators are shared across pipelines by binding kinds alone, so the native layout
        // is visible to every stage.
        let bindings = layout
            .bindings()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE)
            })
            .collect::<SmallVec<[vk::DescriptorSetLayoutBinding; 16]>>();
        let set_layout = vk_check!(backend.create_descriptor_set_layout(&bindings), "vkCreateDescriptorSetLayout");

        log::debug!("Descriptor set allocator {:#x} created ({} bindings)", key, bindings.len());

        Self {
            backend,
            key,
            layout: *layout,
            set_layout,
            state: Mutex::new(AllocatorState {
                pools: Vec::new(),
                next_pool_size: initial_pool_size.max(1),
                sets: TemporaryHashmap::new(ring_size),
                hits: 0,
                misses: 0,
            }),
        }
    }

    #[inline]
    pub fn key(&self) -> u64 { self.key }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout { self.set_layout }

    #[inline]
    pub fn set_layout(&self) -> &SetLayout { &self.layout }

    /// Find the set holding `content_hash`, or hand out a recycled one.
    ///
    /// The flag is `true` on a hit: the set already holds these bindings and must not be rewritten.
    #[profiling::function]
    pub fn request_set(&self, content_hash: u64) -> (vk::DescriptorSet, bool) {
        let mut state = self.state.lock();
        if let Some(set) = state.sets.request(content_hash) {
            state.hits += 1;
            return (set, true);
        }

        state.misses += 1;
        let set = match state.sets.pop_vacant() {
            Some(set) => set,
            None => {
                self.grow(&mut state);
                match state.sets.pop_vacant() {
                    Some(set) => set,
                    None => rhi_fatal!("descriptor pool growth for allocator {:#x} produced no sets", self.key),
                }
            }
        };
        state.sets.insert(content_hash, set);
        (set, false)
    }

    fn grow(&self, state: &mut AllocatorState) {
        let max_sets = state.next_pool_size;
        let sizes = self.layout.pool_sizes(max_sets);
        let pool = vk_check!(self.backend.create_descriptor_pool(max_sets, &sizes), "vkCreateDescriptorPool");
        let sets = vk_check!(
            self.backend.allocate_descriptor_sets(pool, self.set_layout, max_sets),
            "vkAllocateDescriptorSets"
        );
        for set in sets {
            state.sets.push_vacant(set);
        }

        log::debug!(
            "Descriptor set allocator {:#x}: pool #{} with {} sets",
            self.key,
            state.pools.len(),
            max_sets
        );
        state.pools.push(DescriptorPool { pool, max_sets });
        state.next_pool_size = max_sets.saturating_mul(2);
    }

    /// Advance the recycle ring. Call once per frame.
    pub fn begin_frame(&self) {
        self.state.lock().sets.begin_frame();
    }

    pub fn stats(&self) -> DescriptorAllocatorStats {
        let state = self.state.lock();
        DescriptorAllocatorStats {
            pool_count: state.pools.len(),
            capacity: state.pools.iter().map(|p| p.max_sets).sum(),
            live_sets: state.sets.live_len(),
            vacant_sets: state.sets.vacant_len(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Capacity of every pool, in creation order.
    pub fn pool_sizes(&self) -> Vec<u32> {
        self.state.lock().pools.iter().map(|p| p.max_sets).collect()
    }
}

impl Drop for DescriptorSetAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for pool in state.pools.drain(..) {
            self.backend.destroy_descriptor_pool(pool.pool);
        }
        self.backend.destroy_descriptor_set_layout(self.set_layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::layout::LayoutBinding;

    fn sampler_layout() -> SetLayout {
        let mut layout = SetLayout::default();
        layout
            .add_binding(0, LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
            })
            .unwrap();
        layout
    }

    #[test]
    fn temporary_hashmap_promotes_on_hit() {
        let mut map = TemporaryHashmap::<u32>::new(4);
        map.push_vacant(7);
        let value = map.pop_vacant().unwrap();
        map.insert(1, value);

        for _ in 0..3 {
            map.begin_frame();
            assert_eq!(map.request(1), Some(7));
        }
        // Requested every frame: never ages out.
        for _ in 0..3 {
            map.begin_frame();
            assert_eq!(map.request(1), Some(7));
        }
        assert_eq!(map.vacant_len(), 0);
    }

    #[test]
    fn temporary_hashmap_recycles_after_ring_size_frames() {
        let mut map = TemporaryHashmap::<u32>::new(2);
        map.insert(10, 1);
        map.insert(20, 2);

        map.begin_frame();
        assert_eq!(map.request(20), Some(2));
        assert_eq!(map.live_len(), 2);

        // Slot 0 comes around again: 10 was never promoted, 20 was.
        map.begin_frame();
        assert_eq!(map.request(10), None);
        assert_eq!(map.request(20), Some(2));
        assert_eq!(map.vacant_len(), 1);
        assert_eq!(map.pop_vacant(), Some(1));
    }

    #[test]
    fn request_set_hits_after_first_miss() {
        let backend = Arc::new(NullBackend::new());
        let allocator = DescriptorSetAllocator::new(backend.clone(), &sampler_layout(), 4, 4);

        let (first, hit) = allocator.request_set(0xabc);
        assert!(!hit);
        let created = backend.stats().created;
        let (second, hit) = allocator.request_set(0xabc);
        assert!(hit);
        assert_eq!(first, second);
        assert_eq!(backend.stats().created, created);

        let (other, hit) = allocator.request_set(0xdef);
        assert!(!hit);
        assert_ne!(other, first);
    }

    #[test]
    fn pools_double_and_never_shrink() {
        let backend = Arc::new(NullBackend::new());
        let allocator = DescriptorSetAllocator::new(backend.clone(), &sampler_layout(), 2, 4);

        for hash in 0..100u64 {
            let (_, hit) = allocator.request_set(hash);
            assert!(!hit);
        }
        let sizes = allocator.pool_sizes();
        assert_eq!(sizes, vec![4, 8, 16, 32, 64]);
        assert!(sizes.windows(2).all(|w| w[1] >= 2 * w[0]));

        // Everything ages out and is reused instead of allocating new pools.
        allocator.begin_frame();
        allocator.begin_frame();
        let stats = allocator.stats();
        assert_eq!(stats.live_sets, 0);
        assert_eq!(stats.vacant_sets, 124);
        for hash in 100..200u64 {
            allocator.request_set(hash);
        }
        assert_eq!(allocator.stats().pool_count, 5);
    }
}
