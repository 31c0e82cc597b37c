//! GPU images, their views and mip chains.

use std::ops::RangeBounds;
use std::sync::Arc;

use ash::vk;
use lumen_core::collections::{hashmap::HashMap, SmallVec};
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use parking_lot::Mutex;

use crate::backend::{ImageCreateInfo, ImageViewCreateInfo, NativeImage};
use crate::device::DeviceShared;
use crate::utility::normalize_range_u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    #[default]
    Tex2D,
    Tex3D,
    /// Six-layer 2D image viewed as a cube.
    Cube,
}

impl ImageType {
    pub fn to_vk(self) -> vk::ImageType {
        match self {
            ImageType::Tex2D | ImageType::Cube => vk::ImageType::TYPE_2D,
            ImageType::Tex3D => vk::ImageType::TYPE_3D,
        }
    }

    fn view_type(self, array_size: u32) -> vk::ImageViewType {
        match self {
            ImageType::Tex2D if array_size > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageType::Tex2D => vk::ImageViewType::TYPE_2D,
            ImageType::Tex3D => vk::ImageViewType::TYPE_3D,
            ImageType::Cube if array_size > 6 => vk::ImageViewType::CUBE_ARRAY,
            ImageType::Cube => vk::ImageViewType::CUBE,
        }
    }
}

/// Image descriptor for creating GPU images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 0 selects the full mip chain.
    pub mip_levels: u32,
    /// Array layers. Cube images count six layers per cube.
    pub array_size: u32,
    pub image_type: ImageType,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    /// Layout the image is left in once created and uploaded.
    pub initial_layout: vk::ImageLayout,
    /// Fill mips below the first from the uploaded level 0 with blits.
    pub generate_mipmaps: bool,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            name: "Unnamed image".to_string(),
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_size: 1,
            image_type: ImageType::Tex2D,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED,
            samples: vk::SampleCountFlags::TYPE_1,
            initial_layout: vk::ImageLayout::UNDEFINED,
            generate_mipmaps: false,
        }
    }
}

impl ImageDesc {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(name: &str, width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            name: name.to_owned(),
            width,
            height,
            format,
            initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ..Default::default()
        }
    }

    pub fn new_3d(name: &str, width: u32, height: u32, depth: u32, format: vk::Format) -> Self {
        Self {
            depth,
            image_type: ImageType::Tex3D,
            ..Self::new_2d(name, width, height, format)
        }
    }

    pub fn new_cube(name: &str, size: u32, format: vk::Format) -> Self {
        Self {
            array_size: 6,
            image_type: ImageType::Cube,
            ..Self::new_2d(name, size, size, format)
        }
    }

    pub fn new_color_attachment(name: &str, width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Self::new_2d(name, width, height, format)
        }
    }

    pub fn new_depth_attachment(name: &str, width: u32, height: u32) -> Self {
        Self {
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Self::new_2d(name, width, height, vk::Format::D32_SFLOAT)
        }
    }

    /// Set the number of mip levels.
    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    /// Full mip chain, generated from level 0.
    pub fn with_generated_mipmaps(mut self) -> Self {
        self.mip_levels = 0;
        self.generate_mipmaps = true;
        self
    }

    pub fn with_array_size(mut self, layers: u32) -> Self {
        self.array_size = layers;
        self
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_additional_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    /// Levels of a complete chain down to 1x1x1.
    pub fn full_mip_count(&self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }

    /// Mip level count with 0 resolved to the full chain.
    pub fn resolved_mip_levels(&self) -> u32 {
        match self.mip_levels {
            0 => self.full_mip_count(),
            levels => levels,
        }
    }

    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

/// Dimensions of one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipInfo {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Every level of the chain `desc` describes, each halved (floor, at least 1) from the one before.
pub fn mip_chain(desc: &ImageDesc) -> SmallVec<[MipInfo; 16]> {
    (0..desc.resolved_mip_levels())
        .map(|level| MipInfo {
            level,
            width: (desc.width >> level).max(1),
            height: (desc.height >> level).max(1),
            depth: (desc.depth >> level).max(1),
        })
        .collect()
}

/// Get the appropriate aspect mask for an image format.
pub fn format_to_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Bytes per texel of uncompressed formats that can be uploaded.
pub fn format_texel_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SRGB | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB | vk::Format::R16_SFLOAT | vk::Format::R16_UNORM | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::D32_SFLOAT => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32_SFLOAT => 12,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
struct ImageSubresource {
    base_mip: u32,
    num_mips: u32,
    base_layer: u32,
    num_layers: u32,
}

/// GPU image. Owns its memory unless it wraps a swapchain image.
#[DeviceObject]
pub struct Image {
    desc: ImageDesc,
    image: vk::Image,
    native: Option<NativeImage>,
    aspect: vk::ImageAspectFlags,
    view: vk::ImageView,
    views: Mutex<HashMap<ImageSubresource, vk::ImageView>>,
}

impl Image {
    /// Create the image and its default view. Contents are undefined.
    pub(crate) fn new(device: &Arc<DeviceShared>, desc: &ImageDesc) -> Self {
        let mut desc = desc.clone();
        desc.mip_levels = desc.resolved_mip_levels();
        rhi_assert!(
            desc.width > 0 && desc.height > 0 && desc.depth > 0 && desc.array_size > 0,
            "image '{}' has an empty extent",
            desc.name
        );
        rhi_assert!(
            desc.image_type != ImageType::Cube || desc.array_size % 6 == 0,
            "cube image '{}' needs a multiple of six layers, got {}",
            desc.name,
            desc.array_size
        );
        rhi_assert!(
            device.backend().is_format_supported(desc.format, vk::FormatFeatureFlags::empty()),
            "format {:?} of image '{}' is not supported",
            desc.format,
            desc.name
        );

        let flags = match desc.image_type {
            ImageType::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            _ => vk::ImageCreateFlags::empty(),
        };
        let native = vk_check!(
            device.backend().create_image(&ImageCreateInfo {
                image_type: desc.image_type.to_vk(),
                flags,
                format: desc.format,
                extent: desc.extent(),
                mip_levels: desc.mip_levels,
                array_layers: desc.array_size,
                samples: desc.samples,
                usage: desc.usage,
            }),
            "vkCreateImage"
        );

        log::trace!(
            "Image '{}' created ({}x{}x{}, {} mips, {:?})",
            desc.name,
            desc.width,
            desc.height,
            desc.depth,
            desc.mip_levels,
            desc.format
        );
        Self::with_default_view(device, desc, native.image, Some(native))
    }

    /// Wrap a swapchain image. The image itself is not owned.
    pub(crate) fn from_swapchain_image(
        device: &Arc<DeviceShared>,
        index: u32,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        let desc = ImageDesc {
            name: format!("swapchain.backbuffer.{index}"),
            width: extent.width,
            height: extent.height,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            initial_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        Self::with_default_view(device, desc, image, None)
    }

    fn with_default_view(device: &Arc<DeviceShared>, desc: ImageDesc, image: vk::Image, native: Option<NativeImage>) -> Self {
        let aspect = format_to_aspect_mask(desc.format);
        let view = vk_check!(
            device.backend().create_image_view(&ImageViewCreateInfo {
                image,
                view_type: desc.image_type.view_type(desc.array_size),
                format: desc.format,
                aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_size,
            }),
            "vkCreateImageView"
        );

        Self {
            desc,
            image,
            native,
            aspect,
            view,
            views: Mutex::new(HashMap::default()),
            device: device.clone(),
        }
    }

    /// Destroy every view right away. The device must be idle.
    pub(crate) fn destroy_views(&mut self) {
        let backend = self.device.backend();
        for (_, view) in self.views.get_mut().drain() {
            backend.destroy_image_view(view);
        }
        let view = std::mem::replace(&mut self.view, vk::ImageView::null());
        if view != vk::ImageView::null() {
            backend.destroy_image_view(view);
        }
    }

    /// Get the raw Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image { self.image }

    /// View of every mip and layer.
    #[inline]
    pub fn view(&self) -> vk::ImageView { self.view }

    #[inline]
    pub fn name(&self) -> &str { &self.desc.name }

    #[inline]
    pub fn desc(&self) -> &ImageDesc { &self.desc }

    #[inline]
    pub fn format(&self) -> vk::Format { self.desc.format }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D { self.desc.extent() }

    #[inline]
    pub fn mip_levels(&self) -> u32 { self.desc.mip_levels }

    #[inline]
    pub fn array_size(&self) -> u32 { self.desc.array_size }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags { self.desc.usage }

    #[inline]
    pub fn has_usage(&self, usage: vk::ImageUsageFlags) -> bool { self.desc.usage.contains(usage) }

    /// Get the aspect flags for this image based on its format.
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags { self.aspect }

    #[inline]
    pub fn is_swapchain_image(&self) -> bool { self.native.is_none() }

    pub fn mip_info(&self, level: u32) -> MipInfo {
        rhi_assert!(level < self.desc.mip_levels, "image '{}' has no mip {}", self.desc.name, level);
        MipInfo {
            level,
            width: (self.desc.width >> level).max(1),
            height: (self.desc.height >> level).max(1),
            depth: (self.desc.depth >> level).max(1),
        }
    }

    pub fn mips(&self) -> SmallVec<[MipInfo; 16]> {
        mip_chain(&self.desc)
    }

    /// View of a mip and layer range, created on first use.
    pub fn subresource_view<M: RangeBounds<u32>, L: RangeBounds<u32>>(&self, mips: M, layers: L) -> vk::ImageView {
        let (Some((base_mip, num_mips)), Some((base_layer, num_layers))) = (
            normalize_range_u32(mips, self.desc.mip_levels),
            normalize_range_u32(layers, self.desc.array_size),
        ) else {
            rhi_fatal!("subresource range out of bounds for image '{}'", self.desc.name);
        };
        let subresource = ImageSubresource { base_mip, num_mips, base_layer, num_layers };

        let mut views = self.views.lock();
        if let Some(view) = views.get(&subresource) {
            return *view;
        }

        let view_type = match (self.desc.image_type, num_layers) {
            (ImageType::Tex3D, _) => vk::ImageViewType::TYPE_3D,
            (_, 1) => vk::ImageViewType::TYPE_2D,
            (ImageType::Cube, 6) => vk::ImageViewType::CUBE,
            _ => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        let view = vk_check!(
            self.device.backend().create_image_view(&ImageViewCreateInfo {
                image: self.image,
                view_type,
                format: self.desc.format,
                aspect: self.aspect,
                base_mip_level: base_mip,
                level_count: num_mips,
                base_array_layer: base_layer,
                layer_count: num_layers,
            }),
            "vkCreateImageView"
        );
        views.insert(subresource, view);
        view
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        for (_, view) in self.views.get_mut().drain() {
            self.device.defer_release(view);
        }
        if self.view != vk::ImageView::null() {
            self.device.defer_release(self.view);
        }
        if let Some(native) = self.native {
            self.device.defer_release(native);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mips_of_256_square() {
        let desc = ImageDesc::new_2d("albedo", 256, 256, vk::Format::R8G8B8A8_SRGB).with_generated_mipmaps();
        let chain = mip_chain(&desc);
        assert_eq!(chain.len(), 9);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].width, (pair[0].width / 2).max(1));
            assert_eq!(pair[1].height, (pair[0].height / 2).max(1));
        }
        assert_eq!((chain[8].width, chain[8].height), (1, 1));
    }

    #[test]
    fn non_square_chain_clamps_to_one() {
        let desc = ImageDesc::new_2d("strip", 64, 4, vk::Format::R8_UNORM).with_mip_levels(0);
        let chain = mip_chain(&desc);
        assert_eq!(chain.len(), 7);
        assert_eq!((chain[3].width, chain[3].height), (8, 1));
        assert_eq!((chain[6].width, chain[6].height), (1, 1));
    }

    #[test]
    fn explicit_mip_count_is_kept() {
        let desc = ImageDesc::new_2d("explicit", 512, 512, vk::Format::R8G8B8A8_UNORM).with_mip_levels(3);
        assert_eq!(desc.resolved_mip_levels(), 3);
        assert_eq!(desc.full_mip_count(), 10);
    }

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(format_to_aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(format_to_aspect_mask(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(format_texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(format_texel_size(vk::Format::BC7_UNORM_BLOCK), None);
    }
}
