//! The logical "what is bound right now" table of a command list.

use std::hash::{Hash, Hasher};

use ash::vk;
use ash::vk::Handle;
use lumen_core::collections::{SmallVec, StableHasher};

use crate::error::BindingError;
use crate::layout::{DescriptorClass, SetLayout};
use crate::{MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS};

/// One binding slot.
///
/// The layout is what the per-set descriptor update templates index into: buffer
/// descriptors read `buffer`, image and sampler descriptors read `image`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ResourceBinding {
    pub buffer: vk::DescriptorBufferInfo,
    pub image: vk::DescriptorImageInfo,
    /// Offset applied at bind time for dynamic uniform buffers.
    pub dynamic_offset: u32,
}

/// What a bind call changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingChange {
    Unchanged,
    /// Same buffer and range, new dynamic offset: the bound set can be re-bound as is.
    DynamicOffset,
    /// Different resource: the set contents have to be looked up again.
    Content,
}

pub struct BindingTable {
    slots: [[ResourceBinding; MAX_BINDINGS_PER_SET]; MAX_DESCRIPTOR_SETS],
}

impl Default for BindingTable {
    fn default() -> Self {
        Self {
            slots: [[ResourceBinding::default(); MAX_BINDINGS_PER_SET]; MAX_DESCRIPTOR_SETS],
        }
    }
}

impl BindingTable {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn slots(&self, set: u32) -> &[ResourceBinding; MAX_BINDINGS_PER_SET] {
        &self.slots[set as usize]
    }

    #[inline]
    pub fn slot(&self, set: u32, binding: u32) -> &ResourceBinding {
        &self.slots[set as usize][binding as usize]
    }

    fn slot_mut(&mut self, set: u32, binding: u32) -> &mut ResourceBinding {
        rhi_assert!((set as usize) < MAX_DESCRIPTOR_SETS, "descriptor set {} out of range", set);
        rhi_assert!(
            (binding as usize) < MAX_BINDINGS_PER_SET,
            "binding slot {} in set {} out of range",
            binding,
            set
        );
        &mut self.slots[set as usize][binding as usize]
    }

    /// Dynamic uniform buffer. The offset is applied at bind time, not written into the set.
    pub fn bind_uniform_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> BindingChange {
        let Ok(offset) = u32::try_from(offset) else {
            rhi_fatal!("dynamic offset {} at (set {}, binding {}) does not fit 32 bits", offset, set, binding);
        };

        let slot = self.slot_mut(set, binding);
        if slot.buffer.buffer == buffer && slot.buffer.offset == 0 && slot.buffer.range == range {
            if slot.dynamic_offset == offset {
                return BindingChange::Unchanged;
            }
            slot.dynamic_offset = offset;
            return BindingChange::DynamicOffset;
        }

        slot.buffer = vk::DescriptorBufferInfo { buffer, offset: 0, range };
        slot.dynamic_offset = offset;
        BindingChange::Content
    }

    pub fn bind_storage_buffer(
        &mut self,
        set: u32,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> BindingChange {
        let slot = self.slot_mut(set, binding);
        if slot.buffer.buffer == buffer && slot.buffer.offset == offset && slot.buffer.range == range {
            return BindingChange::Unchanged;
        }
        slot.buffer = vk::DescriptorBufferInfo { buffer, offset, range };
        slot.dynamic_offset = 0;
        BindingChange::Content
    }

    /// Sampled, storage or input attachment image without a sampler.
    pub fn bind_image(&mut self, set: u32, binding: u32, view: vk::ImageView, layout: vk::ImageLayout) -> BindingChange {
        self.write_image(set, binding, view, layout, None)
    }

    /// Combined image sampler.
    pub fn bind_texture(
        &mut self,
        set: u32,
        binding: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> BindingChange {
        self.write_image(set, binding, view, layout, Some(sampler))
    }

    pub fn bind_sampler(&mut self, set: u32, binding: u32, sampler: vk::Sampler) -> BindingChange {
        let slot = self.slot_mut(set, binding);
        if slot.image.sampler == sampler {
            return BindingChange::Unchanged;
        }
        slot.image.sampler = sampler;
        BindingChange::Content
    }

    fn write_image(
        &mut self,
        set: u32,
        binding: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: Option<vk::Sampler>,
    ) -> BindingChange {
        let slot = self.slot_mut(set, binding);
        let sampler = sampler.unwrap_or(slot.image.sampler);
        if slot.image.image_view == view && slot.image.image_layout == layout && slot.image.sampler == sampler {
            return BindingChange::Unchanged;
        }
        slot.image = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        };
        BindingChange::Content
    }

    /// Identity of the resources bound to every slot `layout` declares.
    ///
    /// Covers handles, ranges and image layouts, never the data behind them. Dynamic
    /// offsets are excluded since they are supplied at bind time.
    pub fn content_hash(&self, set: u32, layout: &SetLayout) -> u64 {
        let mut hasher = StableHasher::new();
        let slots = self.slots(set);
        for binding in layout.bindings() {
            binding.binding.hash(&mut hasher);
            let first = binding.binding as usize;
            for slot in &slots[first..first + binding.count as usize] {
                match binding.class() {
                    Some(class) if class.is_buffer() => {
                        slot.buffer.buffer.as_raw().hash(&mut hasher);
                        slot.buffer.offset.hash(&mut hasher);
                        slot.buffer.range.hash(&mut hasher);
                    }
                    Some(DescriptorClass::Sampler) => {
                        slot.image.sampler.as_raw().hash(&mut hasher);
                    }
                    Some(DescriptorClass::SampledImage) => {
                        slot.image.image_view.as_raw().hash(&mut hasher);
                        slot.image.image_layout.as_raw().hash(&mut hasher);
                        slot.image.sampler.as_raw().hash(&mut hasher);
                    }
                    _ => {
                        slot.image.image_view.as_raw().hash(&mut hasher);
                        slot.image.image_layout.as_raw().hash(&mut hasher);
                    }
                }
            }
        }
        hasher.finish()
    }

    /// Dynamic offsets of the set, in binding and array element order.
    pub fn dynamic_offsets(&self, set: u32, layout: &SetLayout) -> SmallVec<[u32; MAX_BINDINGS_PER_SET]> {
        let slots = self.slots(set);
        layout
            .bindings()
            .filter(|b| b.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .flat_map(|b| {
                let first = b.binding as usize;
                slots[first..first + b.count as usize].iter().map(|slot| slot.dynamic_offset)
            })
            .collect()
    }

    /// Check that every slot `layout` declares has a resource bound.
    pub fn validate(&self, set: u32, layout: &SetLayout) -> Result<(), BindingError> {
        let slots = self.slots(set);
        for binding in layout.bindings() {
            let first = binding.binding as usize;
            for (index, slot) in slots[first..first + binding.count as usize].iter().enumerate() {
                let bound = match binding.class() {
                    Some(class) if class.is_buffer() => slot.buffer.buffer != vk::Buffer::null(),
                    Some(DescriptorClass::Sampler) => slot.image.sampler != vk::Sampler::null(),
                    Some(DescriptorClass::SampledImage) => {
                        slot.image.image_view != vk::ImageView::null() && slot.image.sampler != vk::Sampler::null()
                    }
                    _ => slot.image.image_view != vk::ImageView::null(),
                };
                if !bound {
                    return Err(BindingError::MissingResource {
                        set,
                        binding: binding.binding,
                        index: index as u32,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutBinding;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    fn ubo_and_texture() -> SetLayout {
        let mut layout = SetLayout::default();
        layout
            .add_binding(0, LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX,
            })
            .unwrap();
        layout
            .add_binding(0, LayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
            })
            .unwrap();
        layout
    }

    #[test]
    fn uniform_offset_change_only_needs_rebind() {
        let mut table = BindingTable::default();
        assert_eq!(table.bind_uniform_buffer(0, 0, buffer(1), 0, 256), BindingChange::Content);
        assert_eq!(table.bind_uniform_buffer(0, 0, buffer(1), 0, 256), BindingChange::Unchanged);
        assert_eq!(table.bind_uniform_buffer(0, 0, buffer(1), 512, 256), BindingChange::DynamicOffset);
        assert_eq!(table.bind_uniform_buffer(0, 0, buffer(1), 512, 128), BindingChange::Content);
        assert_eq!(table.bind_uniform_buffer(0, 0, buffer(2), 512, 128), BindingChange::Content);
    }

    #[test]
    fn storage_offset_is_content() {
        let mut table = BindingTable::default();
        table.bind_storage_buffer(1, 0, buffer(1), 0, 64);
        assert_eq!(table.bind_storage_buffer(1, 0, buffer(1), 64, 64), BindingChange::Content);
        assert_eq!(table.slot(1, 0).buffer.offset, 64);
    }

    #[test]
    fn content_hash_ignores_dynamic_offsets() {
        let layout = ubo_and_texture();
        let view = vk::ImageView::from_raw(10);
        let sampler = vk::Sampler::from_raw(20);

        let mut table = BindingTable::default();
        table.bind_uniform_buffer(0, 0, buffer(1), 0, 256);
        table.bind_texture(0, 1, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, sampler);
        let before = table.content_hash(0, &layout);

        table.bind_uniform_buffer(0, 0, buffer(1), 1024, 256);
        assert_eq!(table.content_hash(0, &layout), before);
        assert_eq!(table.dynamic_offsets(0, &layout).as_slice(), &[1024]);

        table.bind_texture(0, 1, vk::ImageView::from_raw(11), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, sampler);
        assert_ne!(table.content_hash(0, &layout), before);
    }

    #[test]
    fn undeclared_slots_do_not_affect_hash() {
        let layout = ubo_and_texture();
        let mut table = BindingTable::default();
        table.bind_uniform_buffer(0, 0, buffer(1), 0, 256);
        let before = table.content_hash(0, &layout);
        table.bind_storage_buffer(0, 7, buffer(9), 0, 16);
        assert_eq!(table.content_hash(0, &layout), before);
    }

    #[test]
    fn validate_reports_first_missing_slot() {
        let layout = ubo_and_texture();
        let mut table = BindingTable::default();
        table.bind_uniform_buffer(0, 0, buffer(1), 0, 256);
        // View without sampler is incomplete for a combined image sampler.
        table.bind_image(0, 1, vk::ImageView::from_raw(3), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(
            table.validate(0, &layout),
            Err(BindingError::MissingResource { set: 0, binding: 1, index: 0 })
        );
        table.bind_sampler(0, 1, vk::Sampler::from_raw(4));
        assert_eq!(table.validate(0, &layout), Ok(()));
    }

    #[test]
    fn template_offsets_point_into_slot() {
        assert_eq!(memoffset::offset_of!(ResourceBinding, buffer), 0);
        assert!(memoffset::offset_of!(ResourceBinding, image) >= std::mem::size_of::<vk::DescriptorBufferInfo>());
    }
}
