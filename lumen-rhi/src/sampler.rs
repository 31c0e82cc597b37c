//! Sampler descriptions, their bit-packed hash, and the shared sampler object.

use ash::vk;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipmapMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderColor {
    FloatTransparentBlack,
    IntTransparentBlack,
    FloatOpaqueBlack,
    #[default]
    IntOpaqueBlack,
    FloatOpaqueWhite,
    IntOpaqueWhite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

macro_rules! packed_enum {
    ($ty:ident { $($variant:ident = $bits:expr => $vk:expr),+ $(,)? }, $vk_ty:ty) => {
        impl $ty {
            #[inline]
            fn bits(self) -> u64 {
                match self { $($ty::$variant => $bits),+ }
            }

            #[inline]
            fn from_bits(bits: u64) -> Option<Self> {
                match bits {
                    $($bits => Some($ty::$variant),)+
                    _ => None,
                }
            }

            pub fn to_vk(self) -> $vk_ty {
                match self { $($ty::$variant => $vk),+ }
            }
        }
    };
}

packed_enum!(Filter {
    Nearest = 0 => vk::Filter::NEAREST,
    Linear = 1 => vk::Filter::LINEAR,
}, vk::Filter);

packed_enum!(MipmapMode {
    Nearest = 0 => vk::SamplerMipmapMode::NEAREST,
    Linear = 1 => vk::SamplerMipmapMode::LINEAR,
}, vk::SamplerMipmapMode);

packed_enum!(AddressMode {
    Repeat = 0 => vk::SamplerAddressMode::REPEAT,
    MirroredRepeat = 1 => vk::SamplerAddressMode::MIRRORED_REPEAT,
    ClampToEdge = 2 => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    ClampToBorder = 3 => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    MirrorClampToEdge = 4 => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
}, vk::SamplerAddressMode);

packed_enum!(BorderColor {
    FloatTransparentBlack = 0 => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
    IntTransparentBlack = 1 => vk::BorderColor::INT_TRANSPARENT_BLACK,
    FloatOpaqueBlack = 2 => vk::BorderColor::FLOAT_OPAQUE_BLACK,
    IntOpaqueBlack = 3 => vk::BorderColor::INT_OPAQUE_BLACK,
    FloatOpaqueWhite = 4 => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    IntOpaqueWhite = 5 => vk::BorderColor::INT_OPAQUE_WHITE,
}, vk::BorderColor);

packed_enum!(CompareOp {
    Never = 0 => vk::CompareOp::NEVER,
    Less = 1 => vk::CompareOp::LESS,
    Equal = 2 => vk::CompareOp::EQUAL,
    LessOrEqual = 3 => vk::CompareOp::LESS_OR_EQUAL,
    Greater = 4 => vk::CompareOp::GREATER,
    NotEqual = 5 => vk::CompareOp::NOT_EQUAL,
    GreaterOrEqual = 6 => vk::CompareOp::GREATER_OR_EQUAL,
    Always = 7 => vk::CompareOp::ALWAYS,
}, vk::CompareOp);

/// Sampler configuration.
///
/// Every field has a small discrete range so the whole description packs losslessly into
/// the `u64` returned by [`SamplerDesc::get_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: MipmapMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub border_color: BorderColor,
    /// Depth comparison; `None` disables it.
    pub compare: Option<CompareOp>,
    /// 0 or 1 disables anisotropic filtering. At most 16.
    pub max_anisotropy: u8,
    pub min_lod: u8,
    /// `None` leaves the mip chain unclamped.
    pub max_lod: Option<u8>,
    pub unnormalized_coordinates: bool,
}

// Field offsets inside the packed hash.
const MAG_SHIFT: u32 = 0;
const MIN_SHIFT: u32 = 1;
const MIP_SHIFT: u32 = 2;
const ADDRESS_U_SHIFT: u32 = 3;
const ADDRESS_V_SHIFT: u32 = 6;
const ADDRESS_W_SHIFT: u32 = 9;
const BORDER_SHIFT: u32 = 12;
const COMPARE_SHIFT: u32 = 15;
const ANISOTROPY_SHIFT: u32 = 19;
const MIN_LOD_SHIFT: u32 = 24;
const MAX_LOD_SHIFT: u32 = 32;
const UNNORMALIZED_SHIFT: u32 = 41;

const MAX_ANISOTROPY: u8 = 16;

impl SamplerDesc {
    /// Create a linear filtering sampler config.
    pub fn linear() -> Self {
        Self::default()
    }

    /// Create a nearest (point) filtering sampler config.
    pub fn nearest() -> Self {
        Self {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            mipmap_mode: MipmapMode::Nearest,
            ..Default::default()
        }
    }

    /// Create a sampler config with anisotropic filtering.
    pub fn anisotropic(max_anisotropy: u8) -> Self {
        Self {
            max_anisotropy: max_anisotropy.min(MAX_ANISOTROPY),
            ..Default::default()
        }
    }

    /// Set address mode for all axes.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    pub fn with_compare(mut self, op: CompareOp) -> Self {
        self.compare = Some(op);
        self
    }

    /// Pack the description into a `u64`. Distinct descriptions give distinct hashes.
    pub fn get_hash(&self) -> u64 {
        rhi_assert!(self.max_anisotropy <= MAX_ANISOTROPY, "max anisotropy {} exceeds {}", self.max_anisotropy, MAX_ANISOTROPY);

        let compare = match self.compare {
            Some(op) => 0b1000 | op.bits(),
            None => 0,
        };
        let max_lod = match self.max_lod {
            Some(lod) => 0x100 | lod as u64,
            None => 0,
        };

        (self.mag_filter.bits() << MAG_SHIFT)
            | (self.min_filter.bits() << MIN_SHIFT)
            | (self.mipmap_mode.bits() << MIP_SHIFT)
            | (self.address_u.bits() << ADDRESS_U_SHIFT)
            | (self.address_v.bits() << ADDRESS_V_SHIFT)
            | (self.address_w.bits() << ADDRESS_W_SHIFT)
            | (self.border_color.bits() << BORDER_SHIFT)
            | (compare << COMPARE_SHIFT)
            | ((self.max_anisotropy as u64) << ANISOTROPY_SHIFT)
            | ((self.min_lod as u64) << MIN_LOD_SHIFT)
            | (max_lod << MAX_LOD_SHIFT)
            | ((self.unnormalized_coordinates as u64) << UNNORMALIZED_SHIFT)
    }

    /// Inverse of [`get_hash`](Self::get_hash). `None` for values no description packs to.
    pub fn resolve_hash(hash: u64) -> Option<Self> {
        let field = |shift: u32, bits: u32| (hash >> shift) & ((1u64 << bits) - 1);

        if hash >> (UNNORMALIZED_SHIFT + 1) != 0 {
            return None;
        }

        let compare_bits = field(COMPARE_SHIFT, 4);
        let compare = match compare_bits {
            0 => None,
            bits if bits & 0b1000 != 0 => Some(CompareOp::from_bits(bits & 0b111)?),
            _ => return None,
        };
        let max_lod_bits = field(MAX_LOD_SHIFT, 9);
        let max_lod = match max_lod_bits {
            0 => None,
            bits if bits & 0x100 != 0 => Some((bits & 0xff) as u8),
            _ => return None,
        };
        let max_anisotropy = field(ANISOTROPY_SHIFT, 5) as u8;
        if max_anisotropy > MAX_ANISOTROPY {
            return None;
        }

        Some(Self {
            mag_filter: Filter::from_bits(field(MAG_SHIFT, 1))?,
            min_filter: Filter::from_bits(field(MIN_SHIFT, 1))?,
            mipmap_mode: MipmapMode::from_bits(field(MIP_SHIFT, 1))?,
            address_u: AddressMode::from_bits(field(ADDRESS_U_SHIFT, 3))?,
            address_v: AddressMode::from_bits(field(ADDRESS_V_SHIFT, 3))?,
            address_w: AddressMode::from_bits(field(ADDRESS_W_SHIFT, 3))?,
            border_color: BorderColor::from_bits(field(BORDER_SHIFT, 3))?,
            compare,
            max_anisotropy,
            min_lod: field(MIN_LOD_SHIFT, 8) as u8,
            max_lod,
            unnormalized_coordinates: field(UNNORMALIZED_SHIFT, 1) != 0,
        })
    }

    pub fn to_vk(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter.to_vk())
            .min_filter(self.min_filter.to_vk())
            .mipmap_mode(self.mipmap_mode.to_vk())
            .address_mode_u(self.address_u.to_vk())
            .address_mode_v(self.address_v.to_vk())
            .address_mode_w(self.address_w.to_vk())
            .mip_lod_bias(0.0)
            .anisotropy_enable(self.max_anisotropy > 1)
            .max_anisotropy(self.max_anisotropy.max(1) as f32)
            .compare_enable(self.compare.is_some())
            .compare_op(self.compare.map_or(vk::CompareOp::ALWAYS, CompareOp::to_vk))
            .min_lod(self.min_lod as f32)
            .max_lod(self.max_lod.map_or(vk::LOD_CLAMP_NONE, |lod| lod as f32))
            .border_color(self.border_color.to_vk())
            .unnormalized_coordinates(self.unnormalized_coordinates)
    }
}

/// Vulkan sampler for texture sampling.
#[DeviceObject]
pub struct Sampler {
    desc: SamplerDesc,
    sampler: vk::Sampler,
}

impl Sampler {
    pub(crate) fn new(device: &std::sync::Arc<crate::device::DeviceShared>, desc: &SamplerDesc) -> Self {
        let sampler = vk_check!(device.backend().create_sampler(desc), "vkCreateSampler");
        log::trace!("Sampler {:#x} created", desc.get_hash());
        Self {
            desc: *desc,
            sampler,
            device: device.clone(),
        }
    }

    #[inline]
    pub fn desc(&self) -> &SamplerDesc { &self.desc }

    /// Get the raw Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.defer_release(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERS: [Filter; 2] = [Filter::Nearest, Filter::Linear];
    const MIPMAP_MODES: [MipmapMode; 2] = [MipmapMode::Nearest, MipmapMode::Linear];
    const ADDRESS_MODES: [AddressMode; 5] = [
        AddressMode::Repeat,
        AddressMode::MirroredRepeat,
        AddressMode::ClampToEdge,
        AddressMode::ClampToBorder,
        AddressMode::MirrorClampToEdge,
    ];
    const BORDER_COLORS: [BorderColor; 6] = [
        BorderColor::FloatTransparentBlack,
        BorderColor::IntTransparentBlack,
        BorderColor::FloatOpaqueBlack,
        BorderColor::IntOpaqueBlack,
        BorderColor::FloatOpaqueWhite,
        BorderColor::IntOpaqueWhite,
    ];
    const COMPARES: [Option<CompareOp>; 9] = [
        None,
        Some(CompareOp::Never),
        Some(CompareOp::Less),
        Some(CompareOp::Equal),
        Some(CompareOp::LessOrEqual),
        Some(CompareOp::Greater),
        Some(CompareOp::NotEqual),
        Some(CompareOp::GreaterOrEqual),
        Some(CompareOp::Always),
    ];

    #[test]
    fn every_enum_combination_resolves_back() {
        let mut seen = std::collections::HashSet::new();
        for mag_filter in FILTERS {
            for min_filter in FILTERS {
                for mipmap_mode in MIPMAP_MODES {
                    for address_u in ADDRESS_MODES {
                        for address_v in ADDRESS_MODES {
                            for address_w in ADDRESS_MODES {
                                for border_color in BORDER_COLORS {
                                    for compare in COMPARES {
                                        let desc = SamplerDesc {
                                            mag_filter,
                                            min_filter,
                                            mipmap_mode,
                                            address_u,
                                            address_v,
                                            address_w,
                                            border_color,
                                            compare,
                                            ..Default::default()
                                        };
                                        let hash = desc.get_hash();
                                        assert_eq!(SamplerDesc::resolve_hash(hash), Some(desc));
                                        assert!(seen.insert(hash));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn numeric_fields_resolve_back() {
        for max_anisotropy in 0..=MAX_ANISOTROPY {
            for max_lod in [None, Some(0), Some(1), Some(13), Some(255)] {
                let desc = SamplerDesc {
                    max_anisotropy,
                    min_lod: max_anisotropy * 3,
                    max_lod,
                    unnormalized_coordinates: max_anisotropy % 2 == 0,
                    ..SamplerDesc::nearest()
                };
                assert_eq!(SamplerDesc::resolve_hash(desc.get_hash()), Some(desc));
            }
        }
    }

    #[test]
    fn foreign_bits_do_not_resolve() {
        assert_eq!(SamplerDesc::resolve_hash(1 << 50), None);
        // Address mode 7 is not a variant.
        assert_eq!(SamplerDesc::resolve_hash(0b111 << ADDRESS_U_SHIFT), None);
        // Compare op bits without the enable bit.
        assert_eq!(SamplerDesc::resolve_hash(0b0011 << COMPARE_SHIFT), None);
    }

    #[test]
    fn converts_to_vulkan() {
        let info = SamplerDesc::anisotropic(8).with_compare(CompareOp::Less).to_vk();
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 8.0);
        assert_eq!(info.compare_op, vk::CompareOp::LESS);
        assert_eq!(info.max_lod, vk::LOD_CLAMP_NONE);
    }
}
