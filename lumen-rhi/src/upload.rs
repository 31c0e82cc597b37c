//! Synchronous staged uploads of initial resource contents.
//!
//! Data is copied out of a staging buffer on the transfer queue, ownership moves to the
//! graphics queue (which also generates mip levels and settles the final layout), and an
//! empty compute submission closes the transfer → graphics → compute semaphore chain.
//! The caller blocks until the last submission has retired.

use std::sync::Arc;

use ash::vk;
use lumen_core::collections::SmallVec;
use lumen_core::log;

use crate::backend::{GpuBackend, SubmitBatch};
use crate::barrier::{BufferBarrier, BufferState, ImageBarrier, ImageState};
use crate::buffer::{Buffer, BufferDesc};
use crate::command::CommandPool;
use crate::device::DeviceShared;
use crate::queue::QueueType;
use crate::texture::{format_texel_size, Image};

/// `bufferOffset` of every image copy region is aligned to this.
const REGION_ALIGNMENT: u64 = 16;

fn record<F>(device: &DeviceShared, queue: QueueType, commands: F) -> CommandPool
where
    F: FnOnce(&dyn GpuBackend, vk::CommandBuffer),
{
    let pool = CommandPool::new(device, queue);
    let backend = device.backend();
    vk_check!(backend.begin_command_buffer(pool.cmd), "vkBeginCommandBuffer");
    commands(&**backend, pool.cmd);
    vk_check!(backend.end_command_buffer(pool.cmd), "vkEndCommandBuffer");
    pool
}

/// Submit `chain` in order, each link waiting on the previous one, and block until the
/// last one has finished. The pools are destroyed afterwards.
#[profiling::function]
fn submit_chain_and_wait(device: &DeviceShared, chain: &[CommandPool]) {
    let backend = device.backend();
    let semaphores: SmallVec<[vk::Semaphore; 2]> = (1..chain.len())
        .map(|_| vk_check!(backend.create_semaphore(), "vkCreateSemaphore"))
        .collect();
    let fence = vk_check!(backend.create_fence(false), "vkCreateFence");

    for (index, pool) in chain.iter().enumerate() {
        let wait: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags2); 1]> = index
            .checked_sub(1)
            .map(|prev| (semaphores[prev], pool.queue.default_wait_stage()))
            .into_iter()
            .collect();
        let signal: SmallVec<[vk::Semaphore; 1]> = semaphores.get(index).copied().into_iter().collect();
        let last = index + 1 == chain.len();

        device.submit(pool.queue, &SubmitBatch {
            command_buffers: std::slice::from_ref(&pool.cmd),
            wait: &wait,
            signal: &signal,
            fence: if last { fence } else { vk::Fence::null() },
        });
    }

    match backend.wait_fences(&[fence], device.config().fence_timeout) {
        Ok(true) => {}
        Ok(false) => rhi_fatal!("upload did not finish within {:?}", device.config().fence_timeout),
        Err(err) => rhi_fatal!("waiting for upload failed: {:?}", err),
    }

    backend.destroy_fence(fence);
    for semaphore in semaphores {
        backend.destroy_semaphore(semaphore);
    }
    for pool in chain {
        backend.destroy_command_pool(pool.pool);
    }
}

/// Fill a device-local buffer with `data`.
#[profiling::function]
pub(crate) fn upload_buffer(device: &Arc<DeviceShared>, dst: &Buffer, data: &[u8]) {
    rhi_assert!(
        data.len() as u64 <= dst.size(),
        "{} bytes of initial data overflow buffer '{}' ({} bytes)",
        data.len(),
        dst.name(),
        dst.size()
    );
    rhi_assert!(
        dst.has_usage(vk::BufferUsageFlags::TRANSFER_DST),
        "buffer '{}' is uploaded to without TRANSFER_DST usage",
        dst.name()
    );
    if data.is_empty() {
        return;
    }

    let staging = Buffer::new(device, &BufferDesc::staging(&format!("staging.{}", dst.name()), data.len() as u64));
    staging.write_at(0, data);

    let backend = device.backend();
    let transfer_family = backend.queue_family_index(QueueType::AsyncTransfer);
    let graphics_family = backend.queue_family_index(QueueType::Graphics);
    let ownership = BufferBarrier::new(dst.handle(), BufferState::TransferDst, BufferState::from_usage(dst.usage()))
        .with_range(0, data.len() as u64)
        .with_queue_transfer(transfer_family, graphics_family);

    let transfer = record(device, QueueType::AsyncTransfer, |backend, cmd| {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size: data.len() as u64 };
        backend.cmd_copy_buffer(cmd, staging.handle(), dst.handle(), &[region]);
        backend.cmd_pipeline_barrier(cmd, &[ownership], &[]);
    });
    let graphics = record(device, QueueType::Graphics, |backend, cmd| {
        backend.cmd_pipeline_barrier(cmd, &[ownership], &[]);
    });
    let compute = record(device, QueueType::AsyncCompute, |_, _| {});

    submit_chain_and_wait(device, &[transfer, graphics, compute]);
    log::trace!("Uploaded {} bytes into buffer '{}'", data.len(), dst.name());
}

/// Layout an image settles in once its contents are in place.
fn final_state(image: &Image) -> ImageState {
    match ImageState::from_image_layout(image.desc().initial_layout) {
        ImageState::Undefined => ImageState::Sampled,
        state => state,
    }
}

/// Fill an image from `init_data`, one slice per subresource, layer-major then mip.
///
/// With `generate_mipmaps` only mip 0 of every layer is supplied and the rest of the
/// chain is blitted down from it.
#[profiling::function]
pub(crate) fn upload_image(device: &Arc<DeviceShared>, image: &Image, init_data: &[&[u8]]) {
    let desc = image.desc();
    let layers = desc.array_size;
    let mips = image.mip_levels();
    let generate = desc.generate_mipmaps && mips > 1;
    let provided_levels = if desc.generate_mipmaps { 1 } else { init_data.len() as u32 / layers };

    rhi_assert!(
        provided_levels >= 1 && provided_levels <= mips && init_data.len() as u32 == provided_levels * layers,
        "image '{}': {} initial data slices do not cover {} layers of {} mips",
        image.name(),
        init_data.len(),
        layers,
        mips
    );
    rhi_assert!(
        image.has_usage(vk::ImageUsageFlags::TRANSFER_DST),
        "image '{}' is uploaded to without TRANSFER_DST usage",
        image.name()
    );
    if generate {
        rhi_assert!(
            image.has_usage(vk::ImageUsageFlags::TRANSFER_SRC),
            "image '{}' generates mipmaps without TRANSFER_SRC usage",
            image.name()
        );
        rhi_assert!(
            device
                .backend()
                .is_format_supported(image.format(), vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR),
            "format {:?} of image '{}' cannot be blitted with linear filtering",
            image.format(),
            image.name()
        );
    }

    // Lay every subresource out in the staging buffer.
    let mut regions: Vec<vk::BufferImageCopy> = Vec::with_capacity(init_data.len());
    let mut offset = 0u64;
    for layer in 0..layers {
        for level in 0..provided_levels {
            let data = init_data[(layer * provided_levels + level) as usize];
            let mip = image.mip_info(level);
            if let Some(texel) = format_texel_size(image.format()) {
                let expected = mip.width as u64 * mip.height as u64 * mip.depth as u64 * texel as u64;
                rhi_assert!(
                    data.len() as u64 == expected,
                    "image '{}' layer {} mip {}: {} bytes given, {} expected",
                    image.name(),
                    layer,
                    level,
                    data.len(),
                    expected
                );
            }
            regions.push(vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect(),
                    mip_level: level,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D { width: mip.width, height: mip.height, depth: mip.depth },
            });
            offset = (offset + data.len() as u64).next_multiple_of(REGION_ALIGNMENT);
        }
    }

    let staging = Buffer::new(device, &BufferDesc::staging(&format!("staging.{}", image.name()), offset.max(1)));
    for (region, data) in regions.iter().zip(init_data) {
        staging.write_at(region.buffer_offset, data);
    }

    let backend = device.backend();
    let transfer_family = backend.queue_family_index(QueueType::AsyncTransfer);
    let graphics_family = backend.queue_family_index(QueueType::Graphics);
    let aspect = image.aspect();
    let ownership = ImageBarrier::new(image.handle(), aspect, ImageState::TransferDst, ImageState::TransferDst)
        .with_queue_transfer(transfer_family, graphics_family);
    let final_state = final_state(image);

    let transfer = record(device, QueueType::AsyncTransfer, |backend, cmd| {
        let to_dst = ImageBarrier::new(image.handle(), aspect, ImageState::Undefined, ImageState::TransferDst).discard();
        backend.cmd_pipeline_barrier(cmd, &[], &[to_dst]);
        backend.cmd_copy_buffer_to_image(cmd, staging.handle(), image.handle(), &regions);
        backend.cmd_pipeline_barrier(cmd, &[], &[ownership]);
    });

    let graphics = record(device, QueueType::Graphics, |backend, cmd| {
        backend.cmd_pipeline_barrier(cmd, &[], &[ownership]);

        if !generate {
            let settle = ImageBarrier::new(image.handle(), aspect, ImageState::TransferDst, final_state);
            backend.cmd_pipeline_barrier(cmd, &[], &[settle]);
            return;
        }

        for level in 1..mips {
            let src = image.mip_info(level - 1);
            let dst = image.mip_info(level);
            let to_src = ImageBarrier::new(image.handle(), aspect, ImageState::TransferDst, ImageState::TransferSrc)
                .with_mips(level - 1, 1);
            backend.cmd_pipeline_barrier(cmd, &[], &[to_src]);

            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: layers,
                },
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D { x: src.width as i32, y: src.height as i32, z: src.depth as i32 },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: layers,
                },
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D { x: dst.width as i32, y: dst.height as i32, z: dst.depth as i32 },
                ],
            };
            backend.cmd_blit_image(cmd, image.handle(), image.handle(), &blit, vk::Filter::LINEAR);
        }

        let last = ImageBarrier::new(image.handle(), aspect, ImageState::TransferDst, ImageState::TransferSrc)
            .with_mips(mips - 1, 1);
        let settle = ImageBarrier::new(image.handle(), aspect, ImageState::TransferSrc, final_state);
        backend.cmd_pipeline_barrier(cmd, &[], &[last]);
        backend.cmd_pipeline_barrier(cmd, &[], &[settle]);
    });

    let compute = record(device, QueueType::AsyncCompute, |_, _| {});

    submit_chain_and_wait(device, &[transfer, graphics, compute]);
    log::trace!(
        "Uploaded {} subresources into image '{}'{}",
        regions.len(),
        image.name(),
        if generate { ", mips generated" } else { "" }
    );
}

/// Move a freshly created image without contents into its initial layout.
pub(crate) fn transition_image(device: &Arc<DeviceShared>, image: &Image) {
    let final_state = ImageState::from_image_layout(image.desc().initial_layout);
    if final_state == ImageState::Undefined {
        return;
    }
    let graphics = record(device, QueueType::Graphics, |backend, cmd| {
        let barrier = ImageBarrier::new(image.handle(), image.aspect(), ImageState::Undefined, final_state).discard();
        backend.cmd_pipeline_barrier(cmd, &[], &[barrier]);
    });
    submit_chain_and_wait(device, &[graphics]);
}
