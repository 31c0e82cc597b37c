//! Per-set binding layouts and the merged, per-pipeline resource layout.
//!
//! A [`SetLayout`] is a fixed table of [`MAX_BINDINGS_PER_SET`] slots plus one bit mask per
//! resource kind. A [`CombinedResourceLayout`] is the union of every stage's layout of one
//! pipeline and is the key the pipeline layout cache is looked up with.

use std::hash::{Hash, Hasher};

use ash::vk;
use lumen_core::collections::{SmallVec, StableHasher};

use crate::bitmask::for_each_bit;
use crate::error::LayoutError;
use crate::shader::{ShaderResourceLayout, ShaderStage};
use crate::{MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS, MAX_PUSH_CONSTANT_SIZE};

/// The resource kind a descriptor type is classified as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorClass {
    UniformBuffer,
    StorageBuffer,
    /// Combined image + sampler.
    SampledImage,
    StorageImage,
    Sampler,
    /// Sampled image without a sampler.
    SeparateImage,
    InputAttachment,
}

impl DescriptorClass {
    /// Classify a descriptor type. Types this layer does not manage return `None`.
    pub fn of(ty: vk::DescriptorType) -> Option<Self> {
        match ty {
            vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => Some(DescriptorClass::UniformBuffer),
            vk::DescriptorType::STORAGE_BUFFER => Some(DescriptorClass::StorageBuffer),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => Some(DescriptorClass::SampledImage),
            vk::DescriptorType::STORAGE_IMAGE => Some(DescriptorClass::StorageImage),
            vk::DescriptorType::SAMPLER => Some(DescriptorClass::Sampler),
            vk::DescriptorType::SAMPLED_IMAGE => Some(DescriptorClass::SeparateImage),
            vk::DescriptorType::INPUT_ATTACHMENT => Some(DescriptorClass::InputAttachment),
            _ => None,
        }
    }

    /// Buffer kinds are written through the buffer half of a binding slot.
    #[inline]
    pub fn is_buffer(self) -> bool {
        matches!(self, DescriptorClass::UniformBuffer | DescriptorClass::StorageBuffer)
    }
}

/// One declared binding of a descriptor set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl LayoutBinding {
    #[inline]
    pub fn class(&self) -> Option<DescriptorClass> {
        DescriptorClass::of(self.descriptor_type)
    }
}

impl Hash for LayoutBinding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.binding.hash(state);
        self.count.hash(state);
        self.descriptor_type.as_raw().hash(state);
        self.stage_flags.as_raw().hash(state);
    }
}

/// The single push constant block of a stage or pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl PushConstantRange {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Smallest range covering both: min offset, max end, OR-ed stages.
    pub fn union(&self, other: &PushConstantRange) -> PushConstantRange {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let offset = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        PushConstantRange {
            offset,
            size: end - offset,
            stage_flags: self.stage_flags | other.stage_flags,
        }
    }

    pub fn to_vk(&self) -> Option<vk::PushConstantRange> {
        (!self.is_empty()).then(|| vk::PushConstantRange {
            stage_flags: self.stage_flags,
            offset: self.offset,
            size: self.size,
        })
    }
}

impl Hash for PushConstantRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
        self.size.hash(state);
        self.stage_flags.as_raw().hash(state);
    }
}

/// Bindings of one descriptor set, indexed by binding number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetLayout {
    bindings: [Option<LayoutBinding>; MAX_BINDINGS_PER_SET],
    pub uniform_buffer_mask: u32,
    pub storage_buffer_mask: u32,
    pub sampled_image_mask: u32,
    pub storage_image_mask: u32,
    pub sampler_mask: u32,
    pub separate_image_mask: u32,
    pub input_attachment_mask: u32,
}

impl SetLayout {
    /// Insert a binding, or merge it into an existing compatible one by OR-ing stage flags.
    pub fn add_binding(&mut self, set: u32, incoming: LayoutBinding) -> Result<(), LayoutError> {
        let index = incoming.binding as usize;
        rhi_assert!(index < MAX_BINDINGS_PER_SET, "binding {} exceeds the per-set slot table", index);

        if let Some(existing) = self.bindings[index].as_mut() {
            if existing.descriptor_type != incoming.descriptor_type || existing.count != incoming.count {
                return Err(LayoutError::IncompatibleBinding {
                    set,
                    binding: incoming.binding,
                    existing: (existing.descriptor_type, existing.count),
                    incoming: (incoming.descriptor_type, incoming.count),
                });
            }
            existing.stage_flags |= incoming.stage_flags;
            return Ok(());
        }

        let Some(class) = incoming.class() else {
            rhi_fatal!("descriptor type {:?} at (set {}, binding {}) has no classification", incoming.descriptor_type, set, incoming.binding);
        };
        self.bindings[index] = Some(incoming);
        *self.mask_mut(class) |= 1 << index;
        Ok(())
    }

    fn mask_mut(&mut self, class: DescriptorClass) -> &mut u32 {
        match class {
            DescriptorClass::UniformBuffer => &mut self.uniform_buffer_mask,
            DescriptorClass::StorageBuffer => &mut self.storage_buffer_mask,
            DescriptorClass::SampledImage => &mut self.sampled_image_mask,
            DescriptorClass::StorageImage => &mut self.storage_image_mask,
            DescriptorClass::Sampler => &mut self.sampler_mask,
            DescriptorClass::SeparateImage => &mut self.separate_image_mask,
            DescriptorClass::InputAttachment => &mut self.input_attachment_mask,
        }
    }

    #[inline]
    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(binding as usize).and_then(Option::as_ref)
    }

    /// Declared bindings in ascending binding order.
    pub fn bindings(&self) -> impl Iterator<Item = &LayoutBinding> + '_ {
        self.bindings.iter().flatten()
    }

    /// Every declared binding slot (array elements beyond the first are not included).
    #[inline]
    pub fn binding_mask(&self) -> u32 {
        self.uniform_buffer_mask
            | self.storage_buffer_mask
            | self.sampled_image_mask
            | self.storage_image_mask
            | self.sampler_mask
            | self.separate_image_mask
            | self.input_attachment_mask
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.binding_mask() == 0
    }

    /// Every uniform buffer is bound with a dynamic offset.
    #[inline]
    pub fn dynamic_offset_count(&self) -> u32 {
        for_each_bit(self.uniform_buffer_mask)
            .filter_map(|b| self.binding(b))
            .map(|b| b.count)
            .sum()
    }

    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.bindings().fold(vk::ShaderStageFlags::empty(), |acc, b| acc | b.stage_flags)
    }

    /// Array bindings occupy consecutive slots; those slots must be free.
    pub fn validate_arrays(&self, set: u32) -> Result<(), LayoutError> {
        for binding in self.bindings().filter(|b| b.count > 1) {
            let end = binding.binding + binding.count;
            let overlaps = end as usize > MAX_BINDINGS_PER_SET
                || (binding.binding + 1..end).any(|slot| self.binding(slot).is_some());
            if overlaps {
                return Err(LayoutError::ArrayOverlap { set, binding: binding.binding, count: binding.count });
            }
        }
        Ok(())
    }

    /// Key of the descriptor set allocator serving this layout: the per-kind masks plus
    /// array sizes. Stage visibility does not take part.
    pub fn allocator_key(&self) -> u64 {
        let mut hasher = StableHasher::new();
        self.uniform_buffer_mask.hash(&mut hasher);
        self.storage_buffer_mask.hash(&mut hasher);
        self.sampled_image_mask.hash(&mut hasher);
        self.storage_image_mask.hash(&mut hasher);
        self.sampler_mask.hash(&mut hasher);
        self.separate_image_mask.hash(&mut hasher);
        self.input_attachment_mask.hash(&mut hasher);
        for binding in self.bindings() {
            binding.count.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Pool sizes needed for `sets` descriptor sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> SmallVec<[vk::DescriptorPoolSize; 8]> {
        let mut sizes: SmallVec<[vk::DescriptorPoolSize; 8]> = SmallVec::new();
        for binding in self.bindings() {
            let count = binding.count * sets;
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize { ty: binding.descriptor_type, descriptor_count: count }),
            }
        }
        sizes
    }
}

/// Union of all stage layouts of one pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CombinedResourceLayout {
    pub sets: [SetLayout; MAX_DESCRIPTOR_SETS],
    pub set_mask: u32,
    pub push_constant: PushConstantRange,
    /// Vertex stage input locations.
    pub vertex_input_mask: u32,
    /// Fragment stage output locations.
    pub render_target_mask: u32,
}

impl CombinedResourceLayout {
    /// Merge stage layouts, aborting on incompatible overlap.
    pub fn merge(stages: &[&ShaderResourceLayout]) -> Self {
        match Self::try_merge(stages) {
            Ok(layout) => layout,
            Err(err) => rhi_fatal!("{}", err),
        }
    }

    #[profiling::function]
    pub fn try_merge(stages: &[&ShaderResourceLayout]) -> Result<Self, LayoutError> {
        let mut ordered: SmallVec<[&ShaderResourceLayout; 2]> = stages.iter().copied().collect();
        ordered.sort_by_key(|stage| stage.stage.pipeline_order());

        let mut combined = CombinedResourceLayout::default();
        for stage in ordered {
            for set in for_each_bit(stage.set_mask) {
                for binding in stage.sets[set as usize].bindings() {
                    combined.sets[set as usize].add_binding(set, *binding)?;
                }
            }
            combined.set_mask |= stage.set_mask;
            combined.push_constant = combined.push_constant.union(&stage.push_constant);

            match stage.stage {
                ShaderStage::Vertex => combined.vertex_input_mask |= stage.input_mask,
                ShaderStage::Fragment => combined.render_target_mask |= stage.output_mask,
                ShaderStage::Compute => {}
            }
        }

        rhi_assert!(
            combined.push_constant.end() <= MAX_PUSH_CONSTANT_SIZE as u32,
            "merged push constant range ends at {} bytes",
            combined.push_constant.end()
        );

        for set in for_each_bit(combined.set_mask) {
            combined.sets[set as usize].validate_arrays(set)?;
        }

        Ok(combined)
    }

    #[inline]
    pub fn set(&self, set: u32) -> &SetLayout {
        &self.sets[set as usize]
    }

    /// Canonical key: bindings in ascending (set, binding) order, then push constants, then the set mask.
    pub fn hash_key(&self) -> u64 {
        let mut hasher = StableHasher::new();
        for (set, layout) in self.sets.iter().enumerate() {
            for binding in layout.bindings() {
                set.hash(&mut hasher);
                binding.hash(&mut hasher);
            }
        }
        self.push_constant.hash(&mut hasher);
        self.set_mask.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_layout() -> ShaderResourceLayout {
        let mut layout = ShaderResourceLayout::new(ShaderStage::Vertex);
        layout.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();
        layout.add_binding(1, 0, vk::DescriptorType::STORAGE_BUFFER, 1).unwrap();
        layout.add_push_constant(0, 64).unwrap();
        layout.input_mask = 0b111;
        layout
    }

    fn fragment_layout() -> ShaderResourceLayout {
        let mut layout = ShaderResourceLayout::new(ShaderStage::Fragment);
        layout.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();
        layout.add_binding(0, 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1).unwrap();
        layout.add_binding(2, 0, vk::DescriptorType::SAMPLED_IMAGE, 4).unwrap();
        layout.add_push_constant(48, 32).unwrap();
        layout.output_mask = 0b1;
        layout
    }

    #[test]
    fn shared_binding_ors_stage_flags() {
        let (vs, fs) = (vertex_layout(), fragment_layout());
        let combined = CombinedResourceLayout::merge(&[&vs, &fs]);

        let ubo = combined.set(0).binding(0).unwrap();
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(combined.set_mask, 0b111);
        assert_eq!(combined.set(0).uniform_buffer_mask, 0b1);
        assert_eq!(combined.set(0).sampled_image_mask, 0b10);
        assert_eq!(combined.set(2).separate_image_mask, 0b1);
        assert_eq!(combined.vertex_input_mask, 0b111);
        assert_eq!(combined.render_target_mask, 0b1);
    }

    #[test]
    fn push_constants_cover_union() {
        let (vs, fs) = (vertex_layout(), fragment_layout());
        let combined = CombinedResourceLayout::merge(&[&vs, &fs]);
        assert_eq!(combined.push_constant.offset, 0);
        assert_eq!(combined.push_constant.size, 80);
        assert_eq!(
            combined.push_constant.stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn merge_order_does_not_change_hash() {
        let (vs, fs) = (vertex_layout(), fragment_layout());
        let forward = CombinedResourceLayout::merge(&[&vs, &fs]);
        let backward = CombinedResourceLayout::merge(&[&fs, &vs]);
        assert_eq!(forward, backward);
        assert_eq!(forward.hash_key(), backward.hash_key());
    }

    #[test]
    fn incompatible_overlap_is_rejected() {
        let vs = vertex_layout();
        let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
        fs.add_binding(1, 0, vk::DescriptorType::STORAGE_BUFFER, 2).unwrap();

        let err = CombinedResourceLayout::try_merge(&[&vs, &fs]).unwrap_err();
        assert_eq!(
            err,
            LayoutError::IncompatibleBinding {
                set: 1,
                binding: 0,
                existing: (vk::DescriptorType::STORAGE_BUFFER, 1),
                incoming: (vk::DescriptorType::STORAGE_BUFFER, 2),
            }
        );
    }

    #[test]
    #[should_panic]
    fn merge_aborts_on_incompatible_overlap() {
        let vs = vertex_layout();
        let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
        fs.add_binding(0, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1).unwrap();
        CombinedResourceLayout::merge(&[&vs, &fs]);
    }

    #[test]
    fn array_overlap_is_rejected() {
        let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
        fs.add_binding(0, 2, vk::DescriptorType::SAMPLED_IMAGE, 4).unwrap();
        fs.add_binding(0, 4, vk::DescriptorType::SAMPLER, 1).unwrap();

        let err = CombinedResourceLayout::try_merge(&[&fs]).unwrap_err();
        assert_eq!(err, LayoutError::ArrayOverlap { set: 0, binding: 2, count: 4 });
    }

    #[test]
    fn allocator_key_ignores_stage_visibility() {
        let mut a = SetLayout::default();
        let mut b = SetLayout::default();
        a.add_binding(0, LayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }).unwrap();
        b.add_binding(0, LayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        }).unwrap();
        assert_eq!(a.allocator_key(), b.allocator_key());

        let mut c = a;
        c.add_binding(0, LayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }).unwrap();
        assert_ne!(a.allocator_key(), c.allocator_key());
    }

    #[test]
    fn pool_sizes_scale_with_set_count() {
        let fs = fragment_layout();
        let sizes = fs.sets[0].pool_sizes(64);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 64));
        let arrays = fs.sets[2].pool_sizes(8);
        assert_eq!(arrays[0].descriptor_count, 32);
    }
}
