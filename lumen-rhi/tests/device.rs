mod common;

use std::sync::Arc;

use common::*;
use lumen_rhi::vk;
use lumen_rhi::*;

#[test]
fn pipeline_requests_are_cached() {
    let (backend, device) = null_device();
    let program = textured_program(&device);
    let target = color_target(&device, "target");

    let first = pso(&device, &program, &target);
    let live = backend.live_object_count();
    let second = pso(&device, &program, &target);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.live_object_count(), live);
    assert_eq!(device.pipeline_cache_stats(), PipelineCacheStats {
        graphic_pipeline_count: 1,
        hits: 1,
        misses: 1,
    });
    assert_eq!(backend.stats().pipelines, 1);
    assert_eq!(backend.stats().pipeline_layouts, 1);

    // Blending is part of the key, the layout is not affected by it.
    let blended = device.request_graphics_pso(
        &program,
        first.render_pass(),
        MeshAttribute::Position.into(),
        false,
        AlphaMode::Blend,
    );
    assert!(!Arc::ptr_eq(&first, &blended));
    assert!(Arc::ptr_eq(first.layout(), blended.layout()));
    assert_eq!(backend.stats().pipelines, 2);
    assert_eq!(backend.stats().pipeline_layouts, 1);
}

#[test]
fn explicit_pipeline_desc_shares_the_request_cache() {
    let (_backend, device) = null_device();
    let program = textured_program(&device);
    let target = color_target(&device, "target");
    let requested = pso(&device, &program, &target);

    let desc = GraphicPipelineDesc::builder()
        .name("textured.explicit")
        .variant(program.resolve_variant(MeshAttribute::Position.into()).clone())
        .render_pass(requested.render_pass().clone())
        .vertex_input(device.vertex_layout_cache().request(MeshAttribute::Position.into()))
        .blend(lumen_rhi::pipeline::uniform_blends(BlendState::opaque(), 1))
        .build()
        .unwrap();
    let explicit = device.create_graphic_pipeline(&desc);

    assert!(Arc::ptr_eq(&requested, &explicit));
}

#[test]
fn pipeline_desc_rejects_depth_test_without_depth_attachment() {
    let (_backend, device) = null_device();
    let program = textured_program(&device);
    let result = GraphicPipelineDesc::builder()
        .variant(program.resolve_variant(MeshAttributes::empty()).clone())
        .render_pass(RenderPassInfo::new(&[TARGET_FORMAT], None))
        .depth_stencil(DepthStencilState::read_write())
        .build();
    assert!(result.is_err());
}

#[test]
fn layouts_share_allocators_per_set_layout() {
    let (backend, device) = null_device();
    let target = color_target(&device, "target");
    let textured = pso(&device, &textured_program(&device), &target);
    let flat = pso(&device, &flat_program(&device), &target);

    let stats = device.pipeline_layout_stats();
    assert_eq!(stats.layout_count, 2);
    assert_eq!(stats.allocator_count, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(backend.stats().descriptor_set_layouts, 2);

    assert_eq!(textured.layout().set_mask(), 0b11);
    assert_eq!(flat.layout().set_mask(), 0b01);
    let push = textured.layout().resource_layout().push_constant;
    assert_eq!((push.offset, push.size), (0, 16));
    assert!(flat.layout().resource_layout().push_constant.is_empty());
}

#[test]
fn descriptor_sets_recycle_after_the_ring_wraps() {
    let (_backend, device) = null_device();
    let target = color_target(&device, "target");
    let pipeline = pso(&device, &textured_program(&device), &target);
    let camera = device.create_buffer(&BufferDesc::uniform("camera", 256), None);
    let albedo = texture(&device, "albedo");
    let sampler = device.request_sampler(&SamplerDesc::linear());

    let draw = || {
        let mut cmd = device.begin_command_list(QueueType::Graphics);
        cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::load(&target)));
        cmd.bind_pipeline(&pipeline);
        cmd.bind_uniform_buffer(0, 0, camera.as_range(0..64));
        cmd.bind_texture(1, 0, &albedo, &sampler);
        cmd.draw(3, 1, 0, 0);
        cmd.end_render_pass();
        let writes = cmd.stats().descriptor_writes;
        device.submit_command_list(cmd, vec![], false);
        writes
    };

    assert_eq!(draw(), 2);
    let allocator = pipeline.layout().allocator(1);
    let initial = allocator.stats();
    assert_eq!(initial.live_sets, 1);
    assert_eq!(initial.pool_count, 1);

    let ring = device.config().descriptor_ring_size;
    for _ in 0..ring - 1 {
        device.begin_frame();
    }
    assert_eq!(allocator.stats().live_sets, 1);

    // Requested in the meantime: the set stays cached for another full ring.
    assert_eq!(draw(), 0);
    for _ in 0..ring - 1 {
        device.begin_frame();
    }
    assert_eq!(allocator.stats().live_sets, 1);
    device.begin_frame();

    let recycled = allocator.stats();
    assert_eq!(recycled.live_sets, 0);
    assert_eq!(recycled.vacant_sets, recycled.capacity as usize);
    assert_eq!(draw(), 2);
    assert_eq!(allocator.stats().pool_count, 1);
}

#[test]
fn dropped_objects_outlive_their_frame() {
    let (backend, device) = null_device();
    assert_eq!(device.num_frames(), 2);

    let buffer = device.create_buffer(&BufferDesc::storage("scratch", 1024), None);
    let handle = buffer.handle();
    drop(buffer);

    assert!(backend.is_alive(handle));
    assert_eq!(device.pending_release_count(), 1);

    device.begin_frame();
    assert!(backend.is_alive(handle));
    assert_eq!(device.last_freed_stats().total(), 0);

    device.begin_frame();
    assert!(!backend.is_alive(handle));
    assert_eq!(device.last_freed_stats().buffers, 1);
    assert_eq!(device.pending_release_count(), 0);
}

#[test]
fn frame_slot_waits_for_its_submissions() {
    let (backend, device) = null_device();
    let target = color_target(&device, "target");

    let mut cmd = device.begin_command_list(QueueType::Graphics);
    cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::clear(&target, [0.0; 4])));
    cmd.end_render_pass();
    assert!(device.submit_command_list(cmd, vec![], false).is_none());

    let submit = backend.submissions().last().cloned().unwrap();
    assert_eq!(submit.queue, QueueType::Graphics);
    assert_ne!(submit.fence, vk::Fence::null());

    device.begin_frame();
    device.begin_frame();
    assert_eq!(device.frame_number(), 2);
    assert_eq!(device.last_freed_stats().total(), 0);
}

#[test]
fn signals_chain_submissions_across_queues() {
    let (backend, device) = null_device();

    let producer = device.begin_command_list(QueueType::AsyncCompute);
    let signal = device.submit_command_list(producer, vec![], true).unwrap();
    assert_eq!(signal.queue(), QueueType::AsyncCompute);
    let semaphore = signal.handle();

    let consumer = device.begin_command_list(QueueType::Graphics);
    device.submit_command_list(consumer, vec![signal], false);

    let submissions = backend.submissions();
    let [.., produced, consumed] = submissions.as_slice() else {
        panic!("expected two submissions");
    };
    assert_eq!(produced.signal, vec![semaphore]);
    assert_eq!(consumed.wait, vec![semaphore]);

    // Consumed signals are destroyed once their frame slot comes around again.
    assert!(backend.is_alive(semaphore));
    device.begin_frame();
    device.begin_frame();
    assert!(!backend.is_alive(semaphore));
}

#[test]
fn buffer_upload_runs_the_queue_chain() {
    let (backend, device) = null_device();
    let before = backend.submissions().len();
    let data: Vec<u8> = (0..=255).collect();
    let buffer = device.create_buffer(&BufferDesc::storage("lut", 256), Some(&data));
    assert!(buffer.has_usage(vk::BufferUsageFlags::TRANSFER_DST));

    let chain = &backend.submissions()[before..];
    let queues: Vec<QueueType> = chain.iter().map(|s| s.queue).collect();
    assert_eq!(queues, vec![QueueType::AsyncTransfer, QueueType::Graphics, QueueType::AsyncCompute]);
    assert_eq!(chain[1].wait, chain[0].signal);
    assert_eq!(chain[2].wait, chain[1].signal);
    assert_ne!(chain[2].fence, vk::Fence::null());

    let copies = count_commands(&backend.commands(chain[0].command_buffers[0]), |c| {
        matches!(c, RecordedCommand::CopyBuffer { dst, .. } if *dst == buffer.handle())
    });
    assert_eq!(copies, 1);
}

#[test]
fn host_visible_buffers_are_written_directly() {
    let (backend, device) = null_device();
    let before = backend.stats().submits;
    let buffer = device.create_buffer(&BufferDesc::uniform("params", 8), Some(&[1, 2, 3, 4]));
    assert_eq!(backend.stats().submits, before);
    assert_eq!(buffer.read_at(0, 4), vec![1, 2, 3, 4]);
    assert_eq!(buffer.domain(), MemoryDomain::Cpu);
}

#[test]
fn generated_mip_chain_halves_down_to_one() {
    let (backend, device) = null_device();
    let desc = ImageDesc::new_2d("albedo", 256, 256, vk::Format::R8G8B8A8_UNORM).with_generated_mipmaps();
    let texels = vec![0x80u8; 256 * 256 * 4];
    let before = backend.submissions().len();
    let image = device.create_image(&desc, &[texels.as_slice()]);

    assert_eq!(image.mip_levels(), 9);
    assert_eq!(mip_chain(&desc).len(), 9);
    for level in 0..9 {
        let mip = image.mip_info(level);
        assert_eq!((mip.width, mip.height, mip.depth), (256 >> level, 256 >> level, 1));
    }

    let blits: Vec<RecordedCommand> = backend.submissions()[before..]
        .iter()
        .flat_map(|s| s.command_buffers.clone())
        .flat_map(|cmd| backend.commands(cmd))
        .filter(|c| matches!(c, RecordedCommand::BlitImage { .. }))
        .collect();
    assert_eq!(blits.len(), 8);
    assert_eq!(blits.first(), Some(&RecordedCommand::BlitImage { src_mip: 0, dst_mip: 1, dst_extent: [128, 128] }));
    assert_eq!(blits.last(), Some(&RecordedCommand::BlitImage { src_mip: 7, dst_mip: 8, dst_extent: [1, 1] }));
}

#[test]
fn explicit_mips_are_copied_without_blits() {
    let (backend, device) = null_device();
    let desc = ImageDesc::new_2d("lut", 4, 2, vk::Format::R8_UNORM).with_mip_levels(3);
    let mips: [&[u8]; 3] = [&[0; 8], &[0; 2], &[0; 1]];
    let before = backend.submissions().len();
    let image = device.create_image(&desc, &mips);

    assert_eq!(image.mip_info(2), MipInfo { level: 2, width: 1, height: 1, depth: 1 });
    let commands: Vec<RecordedCommand> = backend.submissions()[before..]
        .iter()
        .flat_map(|s| s.command_buffers.clone())
        .flat_map(|cmd| backend.commands(cmd))
        .collect();
    assert_eq!(count_commands(&commands, |c| matches!(c, RecordedCommand::BlitImage { .. })), 0);
    assert!(commands.contains(&RecordedCommand::CopyBufferToImage { dst: image.handle(), regions: 3 }));
}

#[test]
fn samplers_are_shared_by_description() {
    let (backend, device) = null_device();
    let linear = device.request_sampler(&SamplerDesc::linear());
    let again = device.request_sampler(&SamplerDesc::linear());
    let clamped = device.request_sampler(&SamplerDesc::nearest().with_address_mode(AddressMode::ClampToEdge));

    assert!(Arc::ptr_eq(&linear, &again));
    assert!(!Arc::ptr_eq(&linear, &clamped));
    assert_eq!(device.sampler_count(), 2);
    assert_eq!(backend.stats().samplers, 2);

    let shadow = SamplerDesc::linear()
        .with_address_mode(AddressMode::ClampToBorder)
        .with_compare(CompareOp::LessOrEqual);
    assert_eq!(SamplerDesc::resolve_hash(shadow.get_hash()), Some(shadow));
}

#[test]
fn swapchain_frame_waits_on_acquire_and_presents() {
    let swapchain = NullBackend::with_swapchain(
        vk::Format::B8G8R8A8_UNORM,
        vk::Extent2D { width: 64, height: 64 },
        3,
    );
    let (backend, device) = null_device_with(Arc::new(swapchain), RhiConfig::default());
    assert_eq!(device.swapchain_images().len(), 3);

    let image = device.acquire_next_image().expect("swapchain image");
    assert_eq!(image.index(), 0);

    let mut cmd = device.begin_command_list(QueueType::Graphics);
    cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::clear(image.image(), [0.0; 4])));
    cmd.end_render_pass();
    device.submit_command_list(cmd, vec![], false);

    let draw = backend.submissions().last().cloned().unwrap();
    assert_eq!(draw.wait.len(), 1);

    assert!(device.present(image));
    let release = backend.submissions().last().cloned().unwrap();
    assert!(release.command_buffers.is_empty());
    assert!(release.wait.is_empty());
    assert_eq!(release.signal.len(), 1);
    assert_eq!(backend.stats().presents, 1);

    device.begin_frame();
    let next = device.acquire_next_image().expect("swapchain image");
    assert_eq!(next.index(), 1);
    // Nothing was drawn, so the release submission waits for the acquire itself.
    assert!(device.present(next));
    let release = backend.submissions().last().cloned().unwrap();
    assert_eq!(release.wait.len(), 1);
}

#[test]
fn out_of_date_swapchain_is_recreated() {
    let swapchain = NullBackend::with_swapchain(
        vk::Format::B8G8R8A8_SRGB,
        vk::Extent2D { width: 32, height: 32 },
        2,
    );
    let (backend, device) = null_device_with(Arc::new(swapchain), RhiConfig::default());

    backend.invalidate_swapchain();
    assert!(device.acquire_next_image().is_none());
    assert_eq!(backend.stats().swapchain_recreations, 1);
    assert_eq!(device.swapchain_images().len(), 2);

    let image = device.acquire_next_image().expect("recreated swapchain");
    assert_eq!(image.index(), 0);
    assert!(device.present(image));
}

fn swapchain_device(image_count: u32) -> (Arc<NullBackend>, RenderDevice) {
    let swapchain = NullBackend::with_swapchain(
        vk::Format::B8G8R8A8_UNORM,
        vk::Extent2D { width: 64, height: 64 },
        image_count,
    );
    null_device_with(Arc::new(swapchain), RhiConfig::default())
}

fn clear_and_submit(device: &RenderDevice, image: &SwapchainImage) {
    let mut cmd = device.begin_command_list(QueueType::Graphics);
    cmd.begin_render_pass(&RenderTargets::new().with_color(ColorTarget::clear(image.image(), [0.0; 4])));
    cmd.end_render_pass();
    device.submit_command_list(cmd, vec![], false);
}

#[test]
fn present_only_frame_is_fenced() {
    let (backend, device) = swapchain_device(3);

    for _ in 0..device.num_frames() * 2 {
        device.begin_frame();
        let image = device.acquire_next_image().expect("swapchain image");
        assert!(device.present(image));

        let release = backend.submissions().last().cloned().unwrap();
        assert!(release.command_buffers.is_empty());
        assert_eq!(release.wait.len(), 1);
        assert!(!backend.is_signaled(release.wait[0]));
        assert_ne!(release.fence, vk::Fence::null());
        assert!(backend.is_alive(release.fence));
    }
    assert_eq!(backend.stats().presents, device.num_frames() as u64 * 2);
}

#[test]
fn suboptimal_acquire_renders_then_recreates() {
    let (backend, device) = swapchain_device(2);
    let old_image = device.swapchain_images()[0].handle();

    backend.degrade_swapchain();
    let image = device.acquire_next_image().expect("suboptimal swapchains still hand out images");
    assert_eq!(image.index(), 0);
    assert_eq!(backend.stats().swapchain_recreations, 0);

    clear_and_submit(&device, &image);
    let draw = backend.submissions().last().cloned().unwrap();
    assert_eq!(draw.wait.len(), 1);
    assert!(!backend.is_signaled(draw.wait[0]));

    assert!(!device.present(image));
    assert_eq!(backend.stats().swapchain_recreations, 1);
    assert!(!backend.is_alive(old_image));
    assert_ne!(device.swapchain_images()[0].handle(), old_image);

    // Every acquire semaphore in the ring comes round again without a pending signal.
    for _ in 0..device.num_frames() * 2 {
        device.begin_frame();
        let image = device.acquire_next_image().expect("recreated swapchain");
        clear_and_submit(&device, &image);
        assert!(device.present(image));
    }
    assert_eq!(backend.stats().swapchain_recreations, 1);
}

#[test]
fn out_of_date_acquire_keeps_the_semaphore_ring_usable() {
    let (backend, device) = swapchain_device(2);
    let old_images: Vec<vk::Image> = device.swapchain_images().iter().map(|image| image.handle()).collect();

    backend.invalidate_swapchain();
    assert!(device.acquire_next_image().is_none());
    assert!(backend.submissions().is_empty());
    assert!(old_images.iter().all(|image| !backend.is_alive(*image)));

    // The frame is abandoned: the next slot acquires again, and the skipped slot is reused later.
    for _ in 0..device.num_frames() * 2 {
        device.begin_frame();
        let image = device.acquire_next_image().expect("recreated swapchain");
        assert!(device.present(image));
    }
}

#[test]
#[should_panic(expected = "still referenced while the swapchain is recreated")]
fn swapchain_images_cannot_outlive_a_recreation() {
    let (backend, device) = swapchain_device(2);
    let _held = device.swapchain_images();

    backend.invalidate_swapchain();
    device.acquire_next_image();
}

#[test]
fn shader_failures_are_reported() {
    let (_backend, device) = null_device();

    let unaligned = device.create_shader("broken.vert", &[0x03, 0x02, 0x23], "main", ShaderStage::Vertex);
    assert!(unaligned.is_err());

    let no_magic = device.create_shader_with_layout(
        "garbage.frag",
        &[0u8; 20],
        "main",
        ShaderResourceLayout::new(ShaderStage::Fragment),
    );
    assert!(no_magic.is_err());
}

#[test]
fn config_rejects_inconsistent_values() {
    assert!(RhiConfig::builder().descriptor_ring_size(6).build().is_err());
    assert!(RhiConfig::builder().frames_in_flight(0).build().is_err());

    let short_ring = RhiConfig::builder()
        .frames_in_flight(4)
        .descriptor_ring_size(2)
        .build()
        .unwrap();
    assert!(RenderDevice::new(Arc::new(NullBackend::new()), short_ring).is_err());
}
