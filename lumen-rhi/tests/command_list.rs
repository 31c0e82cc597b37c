mod common;

use std::sync::Arc;

use common::*;
use lumen_rhi::vk;
use lumen_rhi::*;

struct Scene {
    backend: Arc<NullBackend>,
    target: Image,
    textured: Arc<GraphicPipeline>,
    flat: Arc<GraphicPipeline>,
    camera: Buffer,
    albedo: Image,
    normal: Image,
    sampler: Arc<Sampler>,
    // Last so every resource above is dropped while the device still exists.
    device: RenderDevice,
}

fn scene() -> Scene {
    let (backend, device) = null_device();
    let target = color_target(&device, "target");
    let textured = pso(&device, &textured_program(&device), &target);
    let flat = pso(&device, &flat_program(&device), &target);
    Scene {
        backend,
        textured,
        flat,
        camera: device.create_buffer(&BufferDesc::uniform("camera", 256), None),
        albedo: texture(&device, "albedo"),
        normal: texture(&device, "normal"),
        sampler: device.request_sampler(&SamplerDesc::linear()),
        target,
        device,
    }
}

impl Scene {
    fn begin(&self) -> CommandList {
        let mut cmd = self.device.begin_command_list(QueueType::Graphics);
        cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::clear(&self.target, [0.0; 4])));
        cmd
    }

    fn commands(&self, cmd: &CommandList) -> Vec<RecordedCommand> {
        self.backend.commands(cmd.handle())
    }
}

#[test]
fn descriptor_sets_are_cached_by_content() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    for image in [&scene.albedo, &scene.normal, &scene.albedo] {
        cmd.bind_texture(1, 0, image, &scene.sampler);
        cmd.draw(3, 1, 0, 0);
    }
    cmd.end_render_pass();

    let textures = scene.textured.layout().allocator(1).stats();
    assert_eq!(textures.misses, 2);
    assert_eq!(textures.hits, 1);
    assert_eq!(textures.live_sets, 2);

    let stats = cmd.stats();
    assert_eq!(stats.descriptor_writes, 3);
    assert_eq!(stats.set_binds, 4);
    assert_eq!(stats.draws, 3);
    assert_eq!(scene.backend.stats().descriptor_writes, 3);

    scene.device.submit_command_list(cmd, vec![], false);
}

#[test]
fn uniform_offset_change_only_rebinds() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    for offset in [0u64, 64, 128] {
        cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(offset..offset + 64));
        cmd.draw(3, 1, 0, 0);
    }

    let stats = cmd.stats();
    assert_eq!(stats.descriptor_writes, 2);
    assert_eq!(stats.set_rebinds, 2);
    assert_eq!(stats.set_binds, 4);

    let offsets: Vec<Vec<u32>> = scene
        .commands(&cmd)
        .into_iter()
        .filter_map(|c| match c {
            RecordedCommand::BindDescriptorSet { set_index: 0, dynamic_offsets, .. } => Some(dynamic_offsets),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![vec![0], vec![64], vec![128]]);
}

#[test]
fn unchanged_state_records_only_the_draw() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.push_constants(0, &[7u8; 16]);
    cmd.draw(3, 1, 0, 0);
    let before = scene.commands(&cmd).len();

    // Re-binding identical resources and the bound pipeline is not a change.
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.draw(3, 1, 0, 0);

    let commands = scene.commands(&cmd);
    assert_eq!(commands.len(), before + 1);
    assert_eq!(commands.last(), Some(&RecordedCommand::Draw { vertex_count: 3, instance_count: 1 }));

    let stats = cmd.stats();
    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(stats.set_binds, 2);
    assert_eq!(stats.push_constant_updates, 1);
}

#[test]
fn flush_is_idempotent() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);

    cmd.flush();
    let first = scene.commands(&cmd);
    cmd.flush();
    assert_eq!(scene.commands(&cmd), first);

    assert_eq!(
        count_commands(&first, |c| matches!(c, RecordedCommand::BindDescriptorSet { .. })),
        2
    );
    assert_eq!(count_commands(&first, |c| matches!(c, RecordedCommand::PushConstants { offset: 0, size: 16 })), 1);
}

#[test]
fn push_constants_upload_the_merged_range() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.draw(3, 1, 0, 0);
    cmd.push_constant(0, &[1.0f32, 0.5, 0.25, 1.0]);
    cmd.draw(3, 1, 0, 0);

    assert_eq!(cmd.stats().push_constant_updates, 2);
    let pushes = count_commands(&scene.commands(&cmd), |c| {
        matches!(c, RecordedCommand::PushConstants { offset: 0, size: 16 })
    });
    assert_eq!(pushes, 2);
}

#[test]
fn layout_change_rebinds_surviving_slots() {
    let scene = scene();
    assert!(!Arc::ptr_eq(scene.textured.layout(), scene.flat.layout()));
    assert!(Arc::ptr_eq(
        scene.textured.layout().allocator(0),
        scene.flat.layout().allocator(0)
    ));

    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.draw(3, 1, 0, 0);

    // Set 0 is still populated and must be bound again under the flat layout.
    cmd.bind_pipeline(&scene.flat);
    cmd.draw(3, 1, 0, 0);
    let stats = cmd.stats();
    assert_eq!(stats.pipeline_binds, 2);
    assert_eq!(stats.set_binds, 3);
    assert_eq!(stats.descriptor_writes, 2);
    assert_eq!(stats.push_constant_updates, 1);

    // Back to the textured layout: set 1 kept its texture across the switch.
    cmd.bind_pipeline(&scene.textured);
    cmd.draw(3, 1, 0, 0);
    let stats = cmd.stats();
    assert_eq!(stats.pipeline_binds, 3);
    assert_eq!(stats.set_binds, 5);
    assert_eq!(stats.descriptor_writes, 2);
    assert_eq!(stats.push_constant_updates, 2);
}

#[test]
fn vertex_buffers_bind_in_contiguous_ranges() {
    let scene = scene();
    let positions = scene.device.create_buffer(&BufferDesc::vertex("positions", 1024).host_visible(), None);
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.bind_vertex_buffer(0, positions.as_range(..));
    cmd.bind_vertex_buffer(1, positions.as_range(512..));
    cmd.draw(3, 1, 0, 0);

    let binds: Vec<RecordedCommand> = scene
        .commands(&cmd)
        .into_iter()
        .filter(|c| matches!(c, RecordedCommand::BindVertexBuffers { .. }))
        .collect();
    assert_eq!(binds, vec![RecordedCommand::BindVertexBuffers {
        first_binding: 0,
        buffers: vec![positions.handle(), positions.handle()],
        offsets: vec![0, 512],
    }]);
    assert_eq!(cmd.stats().vertex_buffer_binds, 1);
}

#[test]
fn render_pass_boundary_resets_bindings() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.draw(3, 1, 0, 0);
    cmd.end_render_pass();
    assert_eq!(cmd.state(), CommandListState::InRecording);

    cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::load(&scene.target)));
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.bind_texture(1, 0, &scene.albedo, &scene.sampler);
    cmd.draw(3, 1, 0, 0);

    let stats = cmd.stats();
    assert_eq!(stats.pipeline_binds, 2);
    assert_eq!(stats.set_binds, 4);
    // Same contents, same frame: both sets come back from the allocators.
    assert_eq!(stats.descriptor_writes, 2);
}

#[test]
#[should_panic(expected = "STORAGE_BUFFER")]
fn storage_binding_requires_storage_usage() {
    let scene = scene();
    let staging_only = scene.device.create_buffer(
        &BufferDesc::new("readback", 256).with_usage(vk::BufferUsageFlags::TRANSFER_DST),
        None,
    );
    let mut cmd = scene.begin();
    cmd.bind_storage_buffer(0, 1, staging_only.as_range(..));
}

#[test]
#[should_panic(expected = "Nothing bound at (set 1, binding 0, element 0)")]
fn drawing_with_an_empty_slot_fails() {
    let scene = scene();
    let mut cmd = scene.begin();
    cmd.bind_pipeline(&scene.textured);
    cmd.bind_uniform_buffer(0, 0, scene.camera.as_range(0..64));
    cmd.draw(3, 1, 0, 0);
}

#[test]
#[should_panic(expected = "incompatible with the active render pass")]
fn pipeline_must_match_render_pass_formats() {
    let scene = scene();
    let other = scene.device.create_image(
        &ImageDesc::new_color_attachment("hdr", 64, 64, vk::Format::R16G16B16A16_SFLOAT),
        &[],
    );
    let mut cmd = scene.device.begin_command_list(QueueType::Graphics);
    cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::load(&other)));
    cmd.bind_pipeline(&scene.textured);
}

#[test]
#[should_panic(expected = "bind_pipeline requires a command list InRenderPass")]
fn pipelines_bind_inside_render_passes_only() {
    let scene = scene();
    let mut cmd = scene.device.begin_command_list(QueueType::Graphics);
    cmd.bind_pipeline(&scene.textured);
}
