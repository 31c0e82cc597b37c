//! SPIR-V reflection, shader modules and shader programs.

use std::ffi::CString;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use lumen_core::collections::{hashmap::HashMap, StableHasher};
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use rspirv_reflect::{BindingCount, DescriptorType, Reflection};

use crate::error::ShaderError;
use crate::layout::{DescriptorClass, LayoutBinding, PushConstantRange, SetLayout};
use crate::pipeline::MeshAttributes;
use crate::{MAX_BINDINGS_PER_SET, MAX_DESCRIPTOR_SETS, MAX_PUSH_CONSTANT_SIZE};

/// Shader stage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Convert to Vulkan shader stage flags.
    pub fn to_vk_stage(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Position of the stage in the pipeline. Layouts are merged in this order.
    #[inline]
    pub fn pipeline_order(&self) -> u32 {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
            ShaderStage::Compute => 2,
        }
    }
}

/// Resources a single shader stage declares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderResourceLayout {
    pub stage: ShaderStage,
    pub sets: [SetLayout; MAX_DESCRIPTOR_SETS],
    pub set_mask: u32,
    pub push_constant: PushConstantRange,
    /// Locations of the stage's input variables.
    pub input_mask: u32,
    /// Locations of the stage's output variables.
    pub output_mask: u32,
}

impl ShaderResourceLayout {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            sets: Default::default(),
            set_mask: 0,
            push_constant: PushConstantRange::default(),
            input_mask: 0,
            output_mask: 0,
        }
    }

    /// Record a descriptor binding. Plain uniform buffers are always promoted to dynamic ones.
    pub fn add_binding(
        &mut self,
        set: u32,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
    ) -> Result<&mut Self, ShaderError> {
        if set as usize >= MAX_DESCRIPTOR_SETS {
            return Err(ShaderError::Unsupported(format!("descriptor set {} (max {})", set, MAX_DESCRIPTOR_SETS)));
        }
        if binding as usize >= MAX_BINDINGS_PER_SET {
            return Err(ShaderError::Unsupported(format!("binding {} in set {} (max {})", binding, set, MAX_BINDINGS_PER_SET)));
        }
        if count == 0 {
            return Err(ShaderError::Unsupported(format!("zero-sized array at (set {}, binding {})", set, binding)));
        }

        let descriptor_type = if descriptor_type == vk::DescriptorType::UNIFORM_BUFFER {
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        } else {
            descriptor_type
        };
        if DescriptorClass::of(descriptor_type).is_none() {
            return Err(ShaderError::Unsupported(format!(
                "descriptor type {:?} at (set {}, binding {})",
                descriptor_type, set, binding
            )));
        }

        let incoming = LayoutBinding {
            binding,
            descriptor_type,
            count,
            stage_flags: self.stage.to_vk_stage(),
        };
        self.sets[set as usize]
            .add_binding(set, incoming)
            .map_err(|e| ShaderError::Unsupported(e.to_string()))?;
        self.set_mask |= 1 << set;
        Ok(self)
    }

    /// Content key over bindings, push constants and interface locations.
    pub fn hash_key(&self) -> u64 {
        let mut hasher = StableHasher::new();
        self.stage.hash(&mut hasher);
        for (set, layout) in self.sets.iter().enumerate() {
            for binding in layout.bindings() {
                set.hash(&mut hasher);
                binding.hash(&mut hasher);
            }
        }
        self.push_constant.hash(&mut hasher);
        self.input_mask.hash(&mut hasher);
        self.output_mask.hash(&mut hasher);
        hasher.finish()
    }

    /// Widen the stage's push constant block to cover `offset..offset + size`.
    pub fn add_push_constant(&mut self, offset: u32, size: u32) -> Result<&mut Self, ShaderError> {
        if size == 0 {
            return Ok(self);
        }
        let incoming = PushConstantRange {
            offset,
            size,
            stage_flags: self.stage.to_vk_stage(),
        };
        let merged = self.push_constant.union(&incoming);
        if merged.end() > MAX_PUSH_CONSTANT_SIZE as u32 {
            return Err(ShaderError::Unsupported(format!(
                "push constants end at {} bytes (max {})",
                merged.end(),
                MAX_PUSH_CONSTANT_SIZE
            )));
        }
        self.push_constant = merged;
        Ok(self)
    }
}

/// Reflect descriptor bindings, push constants and interface locations of a SPIR-V module.
#[profiling::function]
pub fn reflect_spirv(spirv: &[u8], stage: ShaderStage) -> Result<ShaderResourceLayout, ShaderError> {
    if spirv.len() % 4 != 0 {
        return Err(ShaderError::ReflectionFailed("SPIR-V must be 4-byte aligned".to_string()));
    }

    let reflection = Reflection::new_from_spirv(spirv)
        .map_err(|e| ShaderError::ReflectionFailed(format!("{:?}", e)))?;

    let mut layout = ShaderResourceLayout::new(stage);

    let descriptor_sets = reflection
        .get_descriptor_sets()
        .map_err(|e| ShaderError::ReflectionFailed(format!("{:?}", e)))?;
    for (set_index, set_bindings) in descriptor_sets.iter() {
        for (binding_index, binding_info) in set_bindings.iter() {
            let count = match &binding_info.binding_count {
                BindingCount::One => 1,
                BindingCount::StaticSized(n) => *n as u32,
                BindingCount::Unbounded => {
                    return Err(ShaderError::Unsupported(format!(
                        "unbounded array `{}` at (set {}, binding {})",
                        binding_info.name, set_index, binding_index
                    )));
                }
            };
            layout.add_binding(*set_index, *binding_index, convert_descriptor_type(binding_info.ty), count)?;
        }
    }

    let push_constant = reflection
        .get_push_constant_range()
        .map_err(|e| ShaderError::ReflectionFailed(format!("{:?}", e)))?;
    if let Some(info) = push_constant {
        layout.add_push_constant(info.offset, info.size)?;
    }

    let words = spirv_words(spirv);
    let interface = reflect_interface_locations(&words)?;
    layout.input_mask = interface.inputs;
    layout.output_mask = interface.outputs;

    Ok(layout)
}

fn spirv_words(spirv: &[u8]) -> Vec<u32> {
    spirv
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

/// Convert rspirv_reflect descriptor type to Vulkan descriptor type.
fn convert_descriptor_type(reflect_type: DescriptorType) -> vk::DescriptorType {
    // DescriptorType is a transparent wrapper around u32, matching Vulkan values
    vk::DescriptorType::from_raw(reflect_type.0 as i32)
}

#[derive(Debug, Clone)]
enum SpirvType {
    Int { width: u32 },
    Matrix { count: u32 },
    Array { element_type: u32, length_id: u32 },
    Struct { members: Vec<u32> },
    Pointer { pointee_type: u32 },
    Other,
}

#[derive(Default)]
struct MemberDecos {
    location: Option<u32>,
    builtin: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct InterfaceLocations {
    inputs: u32,
    outputs: u32,
}

/// Minimal SPIR-V walk collecting the `Location`s of non-builtin Input/Output variables.
fn reflect_interface_locations(words: &[u32]) -> Result<InterfaceLocations, ShaderError> {
    if words.len() < 5 {
        return Err(ShaderError::ReflectionFailed("SPIR-V header too small".into()));
    }

    // SPIR-V opcodes.
    const OP_DECORATE: u16 = 71;
    const OP_MEMBER_DECORATE: u16 = 72;
    const OP_VARIABLE: u16 = 59;
    const OP_TYPE_INT: u16 = 21;
    const OP_TYPE_FLOAT: u16 = 22;
    const OP_TYPE_VECTOR: u16 = 23;
    const OP_TYPE_MATRIX: u16 = 24;
    const OP_TYPE_ARRAY: u16 = 28;
    const OP_TYPE_STRUCT: u16 = 30;
    const OP_TYPE_POINTER: u16 = 32;
    const OP_CONSTANT: u16 = 43;

    const DECORATION_BUILTIN: u32 = 11;
    const DECORATION_LOCATION: u32 = 30;

    const STORAGE_CLASS_INPUT: u32 = 1;
    const STORAGE_CLASS_OUTPUT: u32 = 3;

    let mut types: HashMap<u32, SpirvType> = HashMap::default();
    let mut const_u32: HashMap<u32, u32> = HashMap::default();
    let mut variables: Vec<(u32, u32, u32)> = Vec::new();
    let mut var_location: HashMap<u32, u32> = HashMap::default();
    let mut var_builtin: HashMap<u32, u32> = HashMap::default();
    let mut member_decos: HashMap<(u32, u32), MemberDecos> = HashMap::default();

    // Skip header (5 words).
    let mut i = 5usize;
    while i < words.len() {
        let first = words[i];
        let wc = (first >> 16) as usize;
        let op = (first & 0xFFFF) as u16;
        if wc == 0 || i + wc > words.len() {
            return Err(ShaderError::ReflectionFailed("invalid SPIR-V instruction word count".into()));
        }

        let inst = &words[i..i + wc];
        match op {
            OP_TYPE_INT if wc >= 4 => {
                types.insert(inst[1], SpirvType::Int { width: inst[2] });
            }
            OP_TYPE_FLOAT | OP_TYPE_VECTOR if wc >= 3 => {
                types.insert(inst[1], SpirvType::Other);
            }
            OP_TYPE_MATRIX if wc >= 4 => {
                types.insert(inst[1], SpirvType::Matrix { count: inst[3] });
            }
            OP_TYPE_ARRAY if wc >= 4 => {
                types.insert(inst[1], SpirvType::Array { element_type: inst[2], length_id: inst[3] });
            }
            OP_TYPE_STRUCT if wc >= 2 => {
                types.insert(inst[1], SpirvType::Struct { members: inst[2..].to_vec() });
            }
            OP_TYPE_POINTER if wc >= 4 => {
                types.insert(inst[1], SpirvType::Pointer { pointee_type: inst[3] });
            }
            OP_CONSTANT if wc >= 4 => {
                // Only 32-bit scalar ints matter, as array lengths.
                if let Some(SpirvType::Int { width: 32 }) = types.get(&inst[1]) {
                    const_u32.insert(inst[2], inst[3]);
                }
            }
            OP_VARIABLE if wc >= 4 => {
                // OpVariable %result_type %result StorageClass [initializer]
                variables.push((inst[2], inst[1], inst[3]));
            }
            OP_DECORATE if wc >= 4 => match inst[2] {
                DECORATION_LOCATION => {
                    var_location.insert(inst[1], inst[3]);
                }
                DECORATION_BUILTIN => {
                    var_builtin.insert(inst[1], inst[3]);
                }
                _ => {}
            },
            OP_MEMBER_DECORATE if wc >= 4 => {
                let entry = member_decos.entry((inst[1], inst[2])).or_default();
                match inst[3] {
                    DECORATION_LOCATION if wc >= 5 => entry.location = Some(inst[4]),
                    DECORATION_BUILTIN => entry.builtin = true,
                    _ => {}
                }
            }
            _ => {}
        }

        i += wc;
    }

    let mut out = InterfaceLocations::default();

    for &(var_id, ptr_type_id, storage_class) in &variables {
        let mask = match storage_class {
            STORAGE_CLASS_INPUT => &mut out.inputs,
            STORAGE_CLASS_OUTPUT => &mut out.outputs,
            _ => continue,
        };
        if var_builtin.contains_key(&var_id) {
            continue;
        }
        let Some(SpirvType::Pointer { pointee_type }) = types.get(&ptr_type_id) else { continue };

        match types.get(pointee_type) {
            Some(SpirvType::Struct { members }) if !var_location.contains_key(&var_id) => {
                for (member_index, &member_ty) in members.iter().enumerate() {
                    let Some(decos) = member_decos.get(&(*pointee_type, member_index as u32)) else { continue };
                    if decos.builtin {
                        continue;
                    }
                    let Some(location) = decos.location else { continue };
                    *mask |= location_bits(location, location_span(&types, &const_u32, member_ty));
                }
            }
            _ => {
                let Some(&location) = var_location.get(&var_id) else { continue };
                *mask |= location_bits(location, location_span(&types, &const_u32, *pointee_type));
            }
        }
    }

    Ok(out)
}

/// Number of consecutive locations a variable of this type occupies.
fn location_span(types: &HashMap<u32, SpirvType>, const_u32: &HashMap<u32, u32>, ty_id: u32) -> u32 {
    match types.get(&ty_id) {
        Some(SpirvType::Matrix { count }) => *count,
        Some(SpirvType::Array { element_type, length_id }) => {
            let length = const_u32.get(length_id).copied().unwrap_or(1);
            length * location_span(types, const_u32, *element_type)
        }
        _ => 1,
    }
}

fn location_bits(location: u32, span: u32) -> u32 {
    (location..location.saturating_add(span))
        .take_while(|&l| l < 32)
        .fold(0, |acc, l| acc | (1 << l))
}

/// A compiled shader module with the layout reflected from it.
#[DeviceObject]
pub struct Shader {
    name: String,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
    layout: ShaderResourceLayout,
    hash: u64,
}

impl Shader {
    pub(crate) fn from_spirv(
        device: &Arc<crate::device::DeviceShared>,
        name: &str,
        spirv: &[u8],
        entry_point: &str,
        stage: ShaderStage,
    ) -> Result<Self, ShaderError> {
        let layout = reflect_spirv(spirv, stage)?;
        Self::from_layout(device, name, spirv, entry_point, layout)
    }

    /// Shader whose layout was reflected ahead of time, e.g. by an offline shader build.
    pub(crate) fn from_layout(
        device: &Arc<crate::device::DeviceShared>,
        name: &str,
        spirv: &[u8],
        entry_point: &str,
        layout: ShaderResourceLayout,
    ) -> Result<Self, ShaderError> {
        if spirv.len() % 4 != 0 {
            return Err(ShaderError::ReflectionFailed("SPIR-V must be 4-byte aligned".to_string()));
        }
        let stage = layout.stage;
        let entry_point = CString::new(entry_point)
            .map_err(|_| ShaderError::ReflectionFailed(format!("entry point of `{}` contains a NUL byte", name)))?;

        let words = spirv_words(spirv);
        let module = device.backend().create_shader_module(&words)?;

        let mut hasher = StableHasher::new();
        spirv.hash(&mut hasher);
        entry_point.hash(&mut hasher);
        stage.hash(&mut hasher);
        layout.hash_key().hash(&mut hasher);
        let hash = hasher.finish();

        log::trace!("Shader `{}` ({:?}) created, sets {:#b}", name, stage, layout.set_mask);

        Ok(Self {
            name: name.to_owned(),
            module,
            stage,
            entry_point,
            layout,
            hash,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule { self.module }

    #[inline]
    pub fn stage(&self) -> ShaderStage { self.stage }

    #[inline]
    pub fn entry_point(&self) -> &CString { &self.entry_point }

    #[inline]
    pub fn resource_layout(&self) -> &ShaderResourceLayout { &self.layout }

    /// Content hash of the bytecode, entry point and stage.
    #[inline]
    pub fn hash(&self) -> u64 { self.hash }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.device.defer_release(self.module);
    }
}

/// One concrete vertex + fragment pair.
pub struct ShaderVariant {
    vertex: Arc<Shader>,
    fragment: Arc<Shader>,
    hash: u64,
}

impl ShaderVariant {
    pub fn new(vertex: Arc<Shader>, fragment: Arc<Shader>) -> Self {
        rhi_assert!(vertex.stage() == ShaderStage::Vertex, "`{}` is not a vertex shader", vertex.name());
        rhi_assert!(fragment.stage() == ShaderStage::Fragment, "`{}` is not a fragment shader", fragment.name());

        let mut hasher = StableHasher::new();
        vertex.hash().hash(&mut hasher);
        fragment.hash().hash(&mut hasher);
        let hash = hasher.finish();

        Self { vertex, fragment, hash }
    }

    #[inline]
    pub fn vertex(&self) -> &Arc<Shader> { &self.vertex }

    #[inline]
    pub fn fragment(&self) -> &Arc<Shader> { &self.fragment }

    #[inline]
    pub fn hash(&self) -> u64 { self.hash }

    pub fn stage_layouts(&self) -> [&ShaderResourceLayout; 2] {
        [self.vertex.resource_layout(), self.fragment.resource_layout()]
    }
}

enum ProgramVariants {
    Static(Arc<ShaderVariant>),
    ByAttributes(HashMap<MeshAttributes, Arc<ShaderVariant>>),
}

/// A named graphics program: one static variant, or permutations keyed by mesh attributes.
pub struct ShaderProgram {
    name: String,
    variants: ProgramVariants,
}

impl ShaderProgram {
    pub fn new_static(name: &str, variant: ShaderVariant) -> Self {
        Self {
            name: name.to_owned(),
            variants: ProgramVariants::Static(Arc::new(variant)),
        }
    }

    pub fn with_variants(name: &str, variants: impl IntoIterator<Item = (MeshAttributes, ShaderVariant)>) -> Self {
        let variants = variants
            .into_iter()
            .map(|(attributes, variant)| (attributes, Arc::new(variant)))
            .collect::<HashMap<_, _>>();
        rhi_assert!(!variants.is_empty(), "shader program `{}` has no variants", name);

        Self {
            name: name.to_owned(),
            variants: ProgramVariants::ByAttributes(variants),
        }
    }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn is_static(&self) -> bool {
        matches!(self.variants, ProgramVariants::Static(_))
    }

    /// The variant compiled for `attributes`. Static programs ignore the mask.
    pub fn resolve_variant(&self, attributes: MeshAttributes) -> &Arc<ShaderVariant> {
        match &self.variants {
            ProgramVariants::Static(variant) => variant,
            ProgramVariants::ByAttributes(variants) => match variants.get(&attributes) {
                Some(variant) => variant,
                None => rhi_fatal!("shader program `{}` has no variant for attributes {:?}", self.name, attributes),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP_DECORATE: u32 = 71;
    const OP_MEMBER_DECORATE: u32 = 72;
    const OP_VARIABLE: u32 = 59;
    const OP_TYPE_INT: u32 = 21;
    const OP_TYPE_FLOAT: u32 = 22;
    const OP_TYPE_VECTOR: u32 = 23;
    const OP_TYPE_MATRIX: u32 = 24;
    const OP_TYPE_ARRAY: u32 = 28;
    const OP_TYPE_STRUCT: u32 = 30;
    const OP_TYPE_POINTER: u32 = 32;
    const OP_CONSTANT: u32 = 43;

    fn inst(words: &mut Vec<u32>, op: u32, operands: &[u32]) {
        words.push(((operands.len() as u32 + 1) << 16) | op);
        words.extend_from_slice(operands);
    }

    fn header() -> Vec<u32> {
        vec![0x0723_0203, 0x0001_0000, 0, 64, 0]
    }

    #[test]
    fn collects_input_and_output_locations() {
        let mut w = header();
        inst(&mut w, OP_TYPE_FLOAT, &[1, 32]);
        inst(&mut w, OP_TYPE_VECTOR, &[2, 1, 4]);
        inst(&mut w, OP_TYPE_MATRIX, &[3, 2, 4]);
        inst(&mut w, OP_TYPE_INT, &[4, 32, 0]);
        inst(&mut w, OP_CONSTANT, &[4, 5, 2]);
        inst(&mut w, OP_TYPE_ARRAY, &[6, 2, 5]);
        inst(&mut w, OP_TYPE_POINTER, &[10, 1, 2]);
        inst(&mut w, OP_TYPE_POINTER, &[11, 1, 3]);
        inst(&mut w, OP_TYPE_POINTER, &[12, 3, 6]);
        inst(&mut w, OP_TYPE_POINTER, &[13, 1, 2]);
        // in vec4 @0, in mat4 @1..4, out vec4[2] @2..3, builtin input ignored
        inst(&mut w, OP_VARIABLE, &[10, 20, 1]);
        inst(&mut w, OP_VARIABLE, &[11, 21, 1]);
        inst(&mut w, OP_VARIABLE, &[12, 22, 3]);
        inst(&mut w, OP_VARIABLE, &[13, 23, 1]);
        inst(&mut w, OP_DECORATE, &[20, 30, 0]);
        inst(&mut w, OP_DECORATE, &[21, 30, 1]);
        inst(&mut w, OP_DECORATE, &[22, 30, 2]);
        inst(&mut w, OP_DECORATE, &[23, 11, 42]);

        let locations = reflect_interface_locations(&w).unwrap();
        assert_eq!(locations.inputs, 0b11111);
        assert_eq!(locations.outputs, 0b1100);
    }

    #[test]
    fn block_members_use_member_locations() {
        let mut w = header();
        inst(&mut w, OP_TYPE_FLOAT, &[1, 32]);
        inst(&mut w, OP_TYPE_VECTOR, &[2, 1, 3]);
        inst(&mut w, OP_TYPE_STRUCT, &[3, 2, 2, 2]);
        inst(&mut w, OP_TYPE_POINTER, &[4, 3, 3]);
        inst(&mut w, OP_VARIABLE, &[4, 5, 3]);
        inst(&mut w, OP_MEMBER_DECORATE, &[3, 0, 11, 0]);
        inst(&mut w, OP_MEMBER_DECORATE, &[3, 1, 30, 3]);
        inst(&mut w, OP_MEMBER_DECORATE, &[3, 2, 30, 5]);

        let locations = reflect_interface_locations(&w).unwrap();
        assert_eq!(locations.inputs, 0);
        assert_eq!(locations.outputs, (1 << 3) | (1 << 5));
    }

    #[test]
    fn truncated_instruction_is_an_error() {
        let mut w = header();
        w.push((5 << 16) | OP_DECORATE);
        w.push(1);
        assert!(matches!(reflect_interface_locations(&w), Err(ShaderError::ReflectionFailed(_))));
    }

    #[test]
    fn rejects_malformed_bytecode() {
        assert!(matches!(reflect_spirv(&[0u8; 7], ShaderStage::Vertex), Err(ShaderError::ReflectionFailed(_))));
        assert!(reflect_spirv(&[0xffu8; 16], ShaderStage::Fragment).is_err());
    }

    #[test]
    fn uniform_buffers_are_promoted_to_dynamic() {
        let mut layout = ShaderResourceLayout::new(ShaderStage::Fragment);
        layout.add_binding(1, 3, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();

        let binding = layout.sets[1].binding(3).unwrap();
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(layout.sets[1].uniform_buffer_mask, 1 << 3);
        assert_eq!(layout.set_mask, 0b10);
    }

    #[test]
    fn out_of_range_sets_are_unsupported() {
        let mut layout = ShaderResourceLayout::new(ShaderStage::Vertex);
        let err = layout.add_binding(MAX_DESCRIPTOR_SETS as u32, 0, vk::DescriptorType::SAMPLER, 1).unwrap_err();
        assert!(matches!(err, ShaderError::Unsupported(_)));
        assert!(layout.add_binding(0, MAX_BINDINGS_PER_SET as u32, vk::DescriptorType::SAMPLER, 1).is_err());
        assert!(layout.add_binding(0, 0, vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1).is_err());
    }

    #[test]
    fn push_constants_widen_and_respect_budget() {
        let mut layout = ShaderResourceLayout::new(ShaderStage::Vertex);
        layout.add_push_constant(16, 16).unwrap();
        layout.add_push_constant(0, 8).unwrap();
        assert_eq!((layout.push_constant.offset, layout.push_constant.size), (0, 32));

        assert!(layout.add_push_constant(96, 64).is_err());
        assert_eq!(layout.push_constant.size, 32);
        layout.add_push_constant(64, 64).unwrap();
        assert_eq!(layout.push_constant.end(), MAX_PUSH_CONSTANT_SIZE as u32);
    }
}
