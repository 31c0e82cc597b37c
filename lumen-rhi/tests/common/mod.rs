#![allow(dead_code)]

use std::sync::Arc;

use lumen_rhi::vk;
use lumen_rhi::*;

pub const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub fn null_device() -> (Arc<NullBackend>, RenderDevice) {
    null_device_with(Arc::new(NullBackend::new()), RhiConfig::default())
}

pub fn null_device_with(backend: Arc<NullBackend>, config: RhiConfig) -> (Arc<NullBackend>, RenderDevice) {
    let device = match RenderDevice::new(backend.clone(), config) {
        Ok(device) => device,
        Err(err) => panic!("null device creation failed: {err:#}"),
    };
    (backend, device)
}

/// A module header followed by `tag`, so differently tagged modules never share a hash.
pub fn fake_spirv(tag: &str) -> Vec<u8> {
    let header: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
    let mut bytes: Vec<u8> = header.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.extend_from_slice(tag.as_bytes());
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

pub fn shader(device: &RenderDevice, name: &str, layout: ShaderResourceLayout) -> Arc<Shader> {
    device
        .create_shader_with_layout(name, &fake_spirv(name), "main", layout)
        .expect("shader with a prepared layout")
}

/// Vertex stage reading positions and a uniform block at (0, 0).
pub fn camera_vertex_layout() -> ShaderResourceLayout {
    let mut vs = ShaderResourceLayout::new(ShaderStage::Vertex);
    vs.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1).unwrap();
    vs.input_mask = 1 << MeshAttribute::Position.location();
    vs.output_mask = 1;
    vs
}

/// Fragment stage sampling a texture at (1, 0) with 16 bytes of push constants.
pub fn textured_fragment_layout() -> ShaderResourceLayout {
    let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
    fs.add_binding(1, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1).unwrap();
    fs.add_push_constant(0, 16).unwrap();
    fs.input_mask = 1;
    fs.output_mask = 1;
    fs
}

pub fn textured_program(device: &RenderDevice) -> ShaderProgram {
    let vs = shader(device, "textured.vert", camera_vertex_layout());
    let fs = shader(device, "textured.frag", textured_fragment_layout());
    ShaderProgram::new_static("textured", ShaderVariant::new(vs, fs))
}

/// Same vertex stage as [`textured_program`], flat colored fragment stage without resources.
pub fn flat_program(device: &RenderDevice) -> ShaderProgram {
    let vs = shader(device, "flat.vert", camera_vertex_layout());
    let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
    fs.output_mask = 1;
    let fs = shader(device, "flat.frag", fs);
    ShaderProgram::new_static("flat", ShaderVariant::new(vs, fs))
}

pub fn color_target(device: &RenderDevice, name: &str) -> Image {
    device.create_image(&ImageDesc::new_color_attachment(name, 64, 64, TARGET_FORMAT), &[])
}

pub fn texture(device: &RenderDevice, name: &str) -> Image {
    device.create_image(&ImageDesc::new_2d(name, 4, 4, vk::Format::R8G8B8A8_UNORM), &[])
}

pub fn pso(device: &RenderDevice, program: &ShaderProgram, target: &Image) -> Arc<GraphicPipeline> {
    let targets = RenderTargets::new().with_color(ColorTarget::load(target));
    device.request_graphics_pso(
        program,
        &targets.render_pass_info(),
        MeshAttribute::Position.into(),
        false,
        AlphaMode::Opaque,
    )
}

pub fn count_commands(commands: &[RecordedCommand], predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
    commands.iter().filter(|c| predicate(c)).count()
}
