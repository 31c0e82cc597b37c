use std::sync::Arc;

use lumen_core::cli::EngineArgs;
use lumen_core::log;
use lumen_rhi::vk;
use lumen_rhi::*;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const BACK_BUFFER_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
/// Stride between the per-frame slices of the camera buffer.
const CAMERA_STRIDE: u64 = 256;
const CAMERA_SIZE: u64 = 64;

/// Module header only. The layouts are handed over pre-reflected, so no body is needed.
fn placeholder_spirv(id: u32) -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, id, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

fn as_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn textured_program(device: &RenderDevice) -> anyhow::Result<ShaderProgram> {
    let mut vs = ShaderResourceLayout::new(ShaderStage::Vertex);
    vs.add_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)?;
    vs.input_mask = 1 << MeshAttribute::Position.location();
    vs.output_mask = 1;

    let mut fs = ShaderResourceLayout::new(ShaderStage::Fragment);
    fs.add_binding(1, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)?;
    fs.add_push_constant(0, 16)?;
    fs.input_mask = 1;
    fs.output_mask = 1;

    let vs = device.create_shader_with_layout("sandbox.vert", &placeholder_spirv(1), "main", vs)?;
    let fs = device.create_shader_with_layout("sandbox.frag", &placeholder_spirv(2), "main", fs)?;
    Ok(ShaderProgram::new_static("sandbox.textured", ShaderVariant::new(vs, fs)))
}

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let on = ((x / 8) + (y / 8)) % 2 == 0;
            if on { [230, 230, 230, 255] } else { [40, 40, 40, 255] }
        })
        .collect()
}

/// Draws one textured triangle per frame into the null backend's swapchain.
pub struct Sandbox {
    pipeline: Arc<GraphicPipeline>,
    camera: Buffer,
    vertices: Buffer,
    albedo: Image,
    sampler: Arc<Sampler>,
    /// Frame at which a window resize is simulated.
    resize_at: u32,
    device: RenderDevice,
    backend: Arc<NullBackend>,
}

impl Sandbox {
    pub fn new(args: &EngineArgs) -> anyhow::Result<Self> {
        let backend = Arc::new(NullBackend::with_swapchain(
            BACK_BUFFER_FORMAT,
            vk::Extent2D { width: 1280, height: 720 },
            3,
        ));
        let config = RhiConfig::builder()
            .frames_in_flight(args.frames_in_flight as usize)
            .build()?;
        let device = RenderDevice::new(backend.clone(), config)?;

        let program = textured_program(&device)?;
        let pipeline = device.request_graphics_pso(
            &program,
            &RenderPassInfo::new(&[BACK_BUFFER_FORMAT], None),
            MeshAttribute::Position.into(),
            false,
            AlphaMode::Opaque,
        );

        let camera = device.create_buffer(
            &BufferDesc::uniform("camera", CAMERA_STRIDE * device.num_frames() as u64),
            None,
        );
        let positions = as_bytes(&[-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.0, 0.5, 0.0]);
        let vertices = device.create_buffer(&BufferDesc::vertex("triangle", positions.len() as u64), Some(&positions));

        let texels = checkerboard(64);
        let albedo = device.create_image(
            &ImageDesc::new_2d("checker", 64, 64, vk::Format::R8G8B8A8_SRGB).with_generated_mipmaps(),
            &[texels.as_slice()],
        );
        let sampler = device.request_sampler(&SamplerDesc::anisotropic(8).with_address_mode(AddressMode::Repeat));

        log::info!(
            "Sandbox ready: pipeline '{}', texture with {} mips",
            pipeline.name(),
            albedo.mip_levels()
        );

        Ok(Self {
            pipeline,
            camera,
            vertices,
            albedo,
            sampler,
            resize_at: args.frames / 2,
            device,
            backend,
        })
    }

    #[profiling::function]
    pub fn render(&mut self, frame: u32) {
        let slot = self.device.begin_frame();

        if frame == self.resize_at && frame > 0 {
            log::info!("Frame {}: simulating a window resize", frame);
            self.backend.invalidate_swapchain();
        } else if frame == self.resize_at / 2 && frame > 0 {
            log::info!("Frame {}: simulating a suboptimal surface", frame);
            self.backend.degrade_swapchain();
        }
        let Some(image) = self.device.acquire_next_image() else {
            log::info!("Frame {} skipped, swapchain was recreated", frame);
            return;
        };

        let angle = frame as f32 * 0.1;
        let (sin, cos) = angle.sin_cos();
        #[rustfmt::skip]
        let view = [
            cos, -sin, 0.0, 0.0,
            sin,  cos, 0.0, 0.0,
            0.0,  0.0, 1.0, 0.0,
            0.0,  0.0, 0.0, 1.0,
        ];
        let offset = slot as u64 * CAMERA_STRIDE;
        self.camera.write_at(offset, &as_bytes(&view));

        let mut cmd = self.device.begin_command_list(QueueType::Graphics);
        cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::clear(image.image(), [0.1, 0.1, 0.15, 1.0])));
        cmd.bind_pipeline(&self.pipeline);
        cmd.bind_uniform_buffer(0, 0, self.camera.as_range(offset..offset + CAMERA_SIZE));
        cmd.bind_texture(1, 0, &self.albedo, &self.sampler);
        cmd.bind_vertex_buffer(0, self.vertices.as_range(..));
        cmd.push_constant(0, &[1.0f32, 0.8, 0.6, 1.0]);
        cmd.draw(3, 1, 0, 0);
        cmd.end_render_pass();

        let stats = cmd.stats();
        log::debug!(
            "Frame {} (slot {}): {} descriptor writes, {} set binds ({} offset-only)",
            frame,
            slot,
            stats.descriptor_writes,
            stats.set_binds,
            stats.set_rebinds
        );

        self.device.submit_command_list(cmd, Vec::new(), false);
        if !self.device.present(image) {
            log::info!("Frame {}: swapchain recreated on present", frame);
        }
    }

    pub fn report(&self) {
        self.device.wait_idle();

        let pso = self.device.pipeline_cache_stats();
        let layouts = self.device.pipeline_layout_stats();
        log::info!(
            "Pipelines: {} cached, {} hits, {} misses",
            pso.graphic_pipeline_count,
            pso.hits,
            pso.misses
        );
        log::info!("Pipeline layouts: {}, descriptor set allocators: {}", layouts.layout_count, layouts.allocator_count);
        for (key, stats) in self.device.pipeline_layout_cache().allocator_stats() {
            log::info!(
                "  allocator {:#018x}: {} live / {} vacant sets in {} pools, {} hits, {} misses",
                key,
                stats.live_sets,
                stats.vacant_sets,
                stats.pool_count,
                stats.hits,
                stats.misses
            );
        }

        let native = self.backend.stats();
        log::info!(
            "Backend: {} objects alive, {} submits, {} presents, {} swapchain recreations",
            self.backend.live_object_count(),
            native.submits,
            native.presents,
            native.swapchain_recreations
        );
        log::info!("Objects waiting for release: {}", self.device.pending_release_count());
    }
}
