//! The render device: frames in flight, object creation, submission and presentation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use ash::vk;
use derive_builder::Builder;
use lumen_core::collections::hashmap::HashMap;
use lumen_core::collections::SmallVec;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use parking_lot::{Mutex, RwLock};

use crate::backend::{GpuBackend, SubmitBatch};
use crate::buffer::{Buffer, BufferDesc, MemoryDomain};
use crate::command::{CommandList, CommandPool};
use crate::defer_release::{DeferRelease, DeferReleaseQueue, LastFreedStats};
use crate::error::ShaderError;
use crate::pipeline::{AlphaMode, GraphicPipeline, GraphicPipelineDesc, MeshAttributes, RenderPassInfo, VertexLayoutCache};
use crate::pipeline_cache::{PipelineCache, PipelineCacheStats};
use crate::pipeline_layout::{PipelineLayoutCache, PipelineLayoutCacheStats};
use crate::queue::QueueType;
use crate::sampler::{Sampler, SamplerDesc};
use crate::shader::{Shader, ShaderProgram, ShaderResourceLayout, ShaderStage};
use crate::texture::{Image, ImageDesc};
use crate::upload;
use crate::MAX_FRAMES_IN_FLIGHT;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Crate-only trait for GPU objects holding on to the device that created them.
///
/// Sealed: only `#[DeviceObject]` structs of this crate implement it.
#[allow(dead_code)]
pub(crate) trait DeviceObject: sealed::Sealed {
    fn device(&self) -> &Arc<DeviceShared>;
}

/// Device construction parameters.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct RhiConfig {
    /// Frames the CPU may record ahead of the GPU.
    #[builder(default = "MAX_FRAMES_IN_FLIGHT")]
    pub frames_in_flight: usize,
    /// Frames a descriptor set stays cached without being requested. Power of two.
    #[builder(default = "8")]
    pub descriptor_ring_size: usize,
    /// Sets in the first descriptor pool of every allocator. Later pools double.
    #[builder(default = "64")]
    pub initial_descriptor_pool_size: u32,
    /// Longest a fence wait may take before the device is considered lost.
    #[builder(default = "Duration::from_secs(5)")]
    pub fence_timeout: Duration,
    /// Native pipeline cache contents from a previous run.
    #[builder(default)]
    pub pipeline_cache_data: Vec<u8>,
}

impl RhiConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.frames_in_flight == Some(0) {
            return Err("at least one frame in flight is required".to_owned());
        }
        if let Some(ring) = self.descriptor_ring_size {
            if !ring.is_power_of_two() {
                return Err(format!("descriptor ring size {ring} is not a power of two"));
            }
        }
        Ok(())
    }
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            descriptor_ring_size: 8,
            initial_descriptor_pool_size: 64,
            fence_timeout: Duration::from_secs(5),
            pipeline_cache_data: Vec::new(),
        }
    }
}

impl RhiConfig {
    pub fn builder() -> RhiConfigBuilder {
        RhiConfigBuilder::default()
    }

    /// Checks the relations between fields the builder cannot see on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.frames_in_flight >= 1, "at least one frame in flight is required");
        ensure!(
            self.descriptor_ring_size.is_power_of_two(),
            "descriptor ring size {} is not a power of two",
            self.descriptor_ring_size
        );
        ensure!(
            self.descriptor_ring_size >= self.frames_in_flight,
            "descriptor ring size {} is shorter than {} frames in flight",
            self.descriptor_ring_size,
            self.frames_in_flight
        );
        ensure!(self.initial_descriptor_pool_size > 0, "initial descriptor pool size must be positive");
        ensure!(!self.fence_timeout.is_zero(), "fence timeout must be positive");
        Ok(())
    }
}

/// What every device object shares: the backend, the frame index and the release queues.
pub(crate) struct DeviceShared {
    backend: Arc<dyn GpuBackend>,
    config: RhiConfig,
    frame_index: AtomicUsize,
    garbage: Vec<Mutex<DeferReleaseQueue>>,
    queue_locks: [Mutex<()>; QueueType::COUNT],
}

impl DeviceShared {
    #[inline]
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.frame_index.load(Ordering::Acquire)
    }

    /// Queue `object` for destruction once the current frame slot comes round again.
    #[inline]
    pub fn defer_release<T: DeferRelease>(&self, object: T) {
        self.garbage[self.current_frame_index()].lock().push(object);
    }

    /// Submit to a logical queue. Submissions to the same queue are serialized.
    pub fn submit(&self, queue: QueueType, batch: &SubmitBatch<'_>) {
        let _guard = self.queue_locks[queue.index()].lock();
        vk_check!(self.backend.queue_submit(queue, batch), "vkQueueSubmit2");
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("vkDeviceWaitIdle failed on shutdown: {:?}", err);
        }
        for queue in &self.garbage {
            queue.lock().release_all(&*self.backend);
        }
    }
}

/// Completion signal of a submission, waited on by a later one.
#[DeviceObject]
pub struct SubmitSignal {
    queue: QueueType,
    semaphore: vk::Semaphore,
}

impl SubmitSignal {
    #[inline]
    pub fn queue(&self) -> QueueType { self.queue }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore { self.semaphore }
}

impl Drop for SubmitSignal {
    fn drop(&mut self) {
        self.device.defer_release(self.semaphore);
    }
}

/// A swapchain image acquired for the current frame.
pub struct SwapchainImage {
    index: u32,
    image: Arc<Image>,
}

impl SwapchainImage {
    #[inline]
    pub fn index(&self) -> u32 { self.index }

    #[inline]
    pub fn image(&self) -> &Arc<Image> { &self.image }
}

#[derive(Default)]
struct FrameContext {
    /// Fences of every submission made while this slot was current.
    fences: Vec<vk::Fence>,
    free_fences: Vec<vk::Fence>,
    /// Pools recorded and submitted in this slot, recycled once `fences` signal.
    command_pools: Vec<CommandPool>,
}

#[derive(Default)]
struct SwapchainState {
    images: Vec<Arc<Image>>,
    /// One per frame slot, signaled by the acquire.
    acquire_semaphores: Vec<vk::Semaphore>,
    /// One per swapchain image, waited by the present.
    release_semaphores: Vec<vk::Semaphore>,
    acquired: Option<u32>,
    /// The acquire semaphore of the current frame has not been waited on yet.
    acquire_pending: bool,
    /// The last acquire reported a suboptimal swapchain. It is recreated after the present.
    suboptimal: bool,
}

/// The device the renderer talks to.
pub struct RenderDevice {
    shared: Arc<DeviceShared>,
    frames: Vec<Mutex<FrameContext>>,
    frame_number: AtomicU64,
    free_command_pools: [Mutex<Vec<CommandPool>>; QueueType::COUNT],

    layout_cache: PipelineLayoutCache,
    pso_cache: PipelineCache,
    vertex_layouts: VertexLayoutCache,
    samplers: RwLock<HashMap<u64, Arc<Sampler>>>,

    swapchain: Mutex<SwapchainState>,
    last_freed: Mutex<LastFreedStats>,
}

impl RenderDevice {
    /// Create a device on top of `backend`.
    pub fn new(backend: Arc<dyn GpuBackend>, config: RhiConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let frames_in_flight = config.frames_in_flight;
        let shared = Arc::new(DeviceShared {
            backend: backend.clone(),
            frame_index: AtomicUsize::new(0),
            garbage: (0..frames_in_flight).map(|_| Mutex::new(DeferReleaseQueue::new())).collect(),
            queue_locks: Default::default(),
            config,
        });

        let layout_cache = PipelineLayoutCache::new(
            backend.clone(),
            shared.config.descriptor_ring_size,
            shared.config.initial_descriptor_pool_size,
        );
        let pso_cache = PipelineCache::new(&shared, &shared.config.pipeline_cache_data);

        let device = Self {
            frames: (0..frames_in_flight).map(|_| Mutex::new(FrameContext::default())).collect(),
            frame_number: AtomicU64::new(0),
            free_command_pools: Default::default(),
            layout_cache,
            pso_cache,
            vertex_layouts: VertexLayoutCache::default(),
            samplers: RwLock::new(HashMap::default()),
            swapchain: Mutex::new(SwapchainState::default()),
            last_freed: Mutex::new(LastFreedStats::default()),
            shared,
        };

        if backend.swapchain_info().is_some() {
            let mut swapchain = SwapchainState::default();
            for _ in 0..frames_in_flight {
                swapchain.acquire_semaphores.push(backend.create_semaphore()?);
            }
            device.rebuild_swapchain_images(&mut swapchain);
            *device.swapchain.lock() = swapchain;
        }

        log::info!(
            "Render device created on '{}' ({} frames in flight)",
            backend.name(),
            frames_in_flight
        );
        Ok(device)
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        self.shared.backend()
    }

    #[inline]
    pub fn config(&self) -> &RhiConfig {
        self.shared.config()
    }

    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.shared.current_frame_index()
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Move on to the next frame slot.
    ///
    /// Waits until the GPU is done with the work submitted the last time this slot was
    /// current, then recycles its command pools and fences and destroys its garbage.
    #[profiling::function]
    pub fn begin_frame(&self) -> usize {
        let backend = self.backend();
        let next = (self.current_frame_index() + 1) % self.frames.len();

        {
            let mut frame = self.frames[next].lock();
            if !frame.fences.is_empty() {
                match backend.wait_fences(&frame.fences, self.config().fence_timeout) {
                    Ok(true) => {}
                    Ok(false) => rhi_fatal!(
                        "frame slot {} did not retire within {:?}",
                        next,
                        self.config().fence_timeout
                    ),
                    Err(err) => rhi_fatal!("waiting for frame slot {} failed: {:?}", next, err),
                }
                vk_check!(backend.reset_fences(&frame.fences), "vkResetFences");
                let fences = std::mem::take(&mut frame.fences);
                frame.free_fences.extend(fences);
            }
            for pool in frame.command_pools.drain(..) {
                self.free_command_pools[pool.queue.index()].lock().push(pool);
            }
        }

        self.shared.frame_index.store(next, Ordering::Release);
        let freed = self.shared.garbage[next].lock().release_all(&**backend);
        if freed.total() > 0 {
            log::trace!("Frame slot {} released {} objects", next, freed.total());
        }
        *self.last_freed.lock() = freed;

        self.layout_cache.begin_frame();
        self.frame_number.fetch_add(1, Ordering::AcqRel);
        next
    }

    /// Objects destroyed by the last `begin_frame`.
    pub fn last_freed_stats(&self) -> LastFreedStats {
        *self.last_freed.lock()
    }

    /// Objects waiting in the release queue of every frame slot.
    pub fn pending_release_count(&self) -> usize {
        self.shared.garbage.iter().map(|queue| queue.lock().len()).sum()
    }

    pub fn wait_idle(&self) {
        vk_check!(self.backend().wait_idle(), "vkDeviceWaitIdle");
    }

    /// Create a buffer, optionally filled with `initial_data`.
    ///
    /// CPU buffers are written through their mapping, GPU buffers through a blocking staged
    /// upload.
    pub fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Buffer {
        let Some(data) = initial_data else {
            return Buffer::new(&self.shared, desc);
        };

        match desc.domain {
            MemoryDomain::Cpu => {
                let buffer = Buffer::new(&self.shared, desc);
                buffer.write_at(0, data);
                buffer
            }
            MemoryDomain::Gpu => {
                let desc = desc.clone().with_additional_usage(vk::BufferUsageFlags::TRANSFER_DST);
                let buffer = Buffer::new(&self.shared, &desc);
                upload::upload_buffer(&self.shared, &buffer, data);
                buffer
            }
        }
    }

    /// Create an image. `init_data` holds one slice per subresource, layer-major then mip;
    /// with `generate_mipmaps` only mip 0 of each layer.
    pub fn create_image(&self, desc: &ImageDesc, init_data: &[&[u8]]) -> Image {
        if init_data.is_empty() {
            let image = Image::new(&self.shared, desc);
            upload::transition_image(&self.shared, &image);
            return image;
        }

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST;
        if desc.generate_mipmaps {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = Image::new(&self.shared, &desc.clone().with_additional_usage(usage));
        upload::upload_image(&self.shared, &image, init_data);
        image
    }

    /// Compile and reflect a shader. Failures are reported, not fatal.
    pub fn create_shader(
        &self,
        name: &str,
        spirv: &[u8],
        entry_point: &str,
        stage: ShaderStage,
    ) -> Result<Arc<Shader>, ShaderError> {
        match Shader::from_spirv(&self.shared, name, spirv, entry_point, stage) {
            Ok(shader) => Ok(Arc::new(shader)),
            Err(err) => {
                log::warn!("Shader '{}' failed to load: {}", name, err);
                Err(err)
            }
        }
    }

    /// Create a shader from bytecode and a layout reflected ahead of time.
    pub fn create_shader_with_layout(
        &self,
        name: &str,
        spirv: &[u8],
        entry_point: &str,
        layout: ShaderResourceLayout,
    ) -> Result<Arc<Shader>, ShaderError> {
        Shader::from_layout(&self.shared, name, spirv, entry_point, layout).map(Arc::new)
    }

    /// Shared sampler for `desc`.
    pub fn request_sampler(&self, desc: &SamplerDesc) -> Arc<Sampler> {
        let hash = desc.get_hash();
        if let Some(sampler) = self.samplers.read().get(&hash) {
            return sampler.clone();
        }

        let mut samplers = self.samplers.write();
        samplers
            .entry(hash)
            .or_insert_with(|| {
                log::debug!("Sampler cache miss ({:#x})", hash);
                Arc::new(Sampler::new(&self.shared, desc))
            })
            .clone()
    }

    /// Cached graphics pipeline for `desc`.
    pub fn create_graphic_pipeline(&self, desc: &GraphicPipelineDesc) -> Arc<GraphicPipeline> {
        self.pso_cache.get_or_create(desc, &self.layout_cache)
    }

    /// Cached pipeline for drawing a mesh with `attributes` using `program` into `render_pass`.
    pub fn request_graphics_pso(
        &self,
        program: &ShaderProgram,
        render_pass: &RenderPassInfo,
        attributes: MeshAttributes,
        enable_depth: bool,
        alpha_mode: AlphaMode,
    ) -> Arc<GraphicPipeline> {
        self.pso_cache.request_graphics_pso(
            program,
            render_pass,
            attributes,
            enable_depth,
            alpha_mode,
            &self.vertex_layouts,
            &self.layout_cache,
        )
    }

    #[inline]
    pub fn pipeline_layout_cache(&self) -> &PipelineLayoutCache {
        &self.layout_cache
    }

    #[inline]
    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pso_cache
    }

    #[inline]
    pub fn vertex_layout_cache(&self) -> &VertexLayoutCache {
        &self.vertex_layouts
    }

    pub fn pipeline_cache_stats(&self) -> PipelineCacheStats {
        self.pso_cache.stats()
    }

    pub fn pipeline_layout_stats(&self) -> PipelineLayoutCacheStats {
        self.layout_cache.stats()
    }

    pub fn sampler_count(&self) -> usize {
        self.samplers.read().len()
    }

    /// Start recording on `queue`. The list records into a pool of its own.
    pub fn begin_command_list(&self, queue: QueueType) -> CommandList {
        let pool = self.free_command_pools[queue.index()]
            .lock()
            .pop()
            .unwrap_or_else(|| CommandPool::new(&self.shared, queue));
        CommandList::new(&self.shared, pool)
    }

    fn acquire_fence(&self) -> vk::Fence {
        let mut frame = self.frames[self.current_frame_index()].lock();
        let fence = match frame.free_fences.pop() {
            Some(fence) => fence,
            None => vk_check!(self.backend().create_fence(false), "vkCreateFence"),
        };
        frame.fences.push(fence);
        fence
    }

    /// Submit a recorded command list.
    ///
    /// The submission waits for every signal in `wait`. With `signal`, the returned
    /// [`SubmitSignal`] lets a later submission wait for this one. The first graphics
    /// submission after an acquire also waits for the swapchain image.
    #[profiling::function]
    pub fn submit_command_list(
        &self,
        mut cmd: CommandList,
        wait: Vec<SubmitSignal>,
        signal: bool,
    ) -> Option<SubmitSignal> {
        let queue = cmd.queue();
        let pool = cmd.finish();
        drop(cmd);

        let mut waits: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags2); 4]> =
            wait.iter().map(|s| (s.handle(), queue.default_wait_stage())).collect();
        if queue == QueueType::Graphics {
            if let Some(acquire) = self.take_pending_acquire() {
                waits.push((acquire, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
            }
        }

        let signal_semaphore = signal.then(|| vk_check!(self.backend().create_semaphore(), "vkCreateSemaphore"));
        let signals: SmallVec<[vk::Semaphore; 1]> = signal_semaphore.into_iter().collect();

        let fence = self.acquire_fence();
        self.shared.submit(queue, &SubmitBatch {
            command_buffers: std::slice::from_ref(&pool.cmd),
            wait: &waits,
            signal: &signals,
            fence,
        });

        self.frames[self.current_frame_index()].lock().command_pools.push(pool);

        // Waited semaphores are released with this frame slot.
        drop(wait);

        signal_semaphore.map(|semaphore| SubmitSignal {
            queue,
            semaphore,
            device: self.shared.clone(),
        })
    }

    fn take_pending_acquire(&self) -> Option<vk::Semaphore> {
        let mut swapchain = self.swapchain.lock();
        if !swapchain.acquire_pending {
            return None;
        }
        swapchain.acquire_pending = false;
        Some(swapchain.acquire_semaphores[self.current_frame_index()])
    }

    fn rebuild_swapchain_images(&self, swapchain: &mut SwapchainState) {
        let backend = self.backend();
        let Some(info) = backend.swapchain_info() else {
            rhi_fatal!("backend '{}' has no swapchain", backend.name());
        };

        swapchain.images = (0..info.image_count)
            .map(|index| {
                Arc::new(Image::from_swapchain_image(
                    &self.shared,
                    index,
                    backend.swapchain_image(index),
                    info.format,
                    info.extent,
                ))
            })
            .collect();
        while swapchain.release_semaphores.len() < info.image_count as usize {
            let semaphore = vk_check!(backend.create_semaphore(), "vkCreateSemaphore");
            swapchain.release_semaphores.push(semaphore);
        }
        log::debug!(
            "Swapchain images: {} x {}x{} {:?}",
            info.image_count,
            info.extent.width,
            info.extent.height,
            info.format
        );
    }

    fn recreate_swapchain(&self, swapchain: &mut SwapchainState) {
        rhi_assert!(!swapchain.acquire_pending, "swapchain recreated with an unwaited acquire");
        self.wait_idle();

        // Views of the old images go before the swapchain that owns the images.
        for image in swapchain.images.drain(..) {
            match Arc::try_unwrap(image) {
                Ok(mut image) => image.destroy_views(),
                Err(image) => rhi_fatal!(
                    "swapchain image '{}' is still referenced while the swapchain is recreated",
                    image.name()
                ),
            }
        }

        vk_check!(self.backend().recreate_swapchain(), "swapchain recreation");
        swapchain.acquired = None;
        swapchain.suboptimal = false;
        self.rebuild_swapchain_images(swapchain);
        log::info!("Swapchain recreated");
    }

    /// Acquire the next swapchain image.
    ///
    /// `None` means the swapchain was out of date and has been recreated: skip rendering
    /// this frame. A suboptimal swapchain still hands out the image, and is recreated once
    /// it has been presented.
    pub fn acquire_next_image(&self) -> Option<SwapchainImage> {
        let mut swapchain = self.swapchain.lock();
        rhi_assert!(swapchain.acquired.is_none(), "swapchain image acquired twice without present");
        if swapchain.acquire_semaphores.is_empty() {
            rhi_fatal!("device was created without a swapchain");
        }

        let semaphore = swapchain.acquire_semaphores[self.current_frame_index()];
        match self.backend().acquire_next_image(semaphore) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal on acquire, recreating after present");
                }
                swapchain.acquired = Some(index);
                swapchain.acquire_pending = true;
                swapchain.suboptimal |= suboptimal;
                Some(SwapchainImage {
                    index,
                    image: swapchain.images[index as usize].clone(),
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain(&mut swapchain);
                None
            }
            Err(err) => rhi_fatal!("vkAcquireNextImageKHR failed: {:?}", err),
        }
    }

    /// Present an acquired image once all graphics work submitted so far has finished.
    ///
    /// Returns `false` when the swapchain had to be recreated.
    #[profiling::function]
    pub fn present(&self, image: SwapchainImage) -> bool {
        let mut swapchain = self.swapchain.lock();
        if swapchain.acquired != Some(image.index) {
            rhi_fatal!("presenting swapchain image {} which is not the acquired one", image.index);
        }

        // Queue order puts this signal after every graphics submission made so far.
        let release = swapchain.release_semaphores[image.index as usize];
        let mut waits: SmallVec<[(vk::Semaphore, vk::PipelineStageFlags2); 1]> = SmallVec::new();
        if swapchain.acquire_pending {
            swapchain.acquire_pending = false;
            waits.push((
                swapchain.acquire_semaphores[self.current_frame_index()],
                vk::PipelineStageFlags2::ALL_COMMANDS,
            ));
        }
        // Fenced with the frame slot so its acquire semaphore is free again when the slot is reused.
        let fence = self.acquire_fence();
        self.shared.submit(QueueType::Graphics, &SubmitBatch {
            command_buffers: &[],
            wait: &waits,
            signal: std::slice::from_ref(&release),
            fence,
        });

        swapchain.acquired = None;
        let index = image.index;
        drop(image);

        match self.backend().present(index, release) {
            Ok(false) if !swapchain.suboptimal => true,
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain suboptimal or out of date on present");
                self.recreate_swapchain(&mut swapchain);
                false
            }
            Err(err) => rhi_fatal!("vkQueuePresentKHR failed: {:?}", err),
        }
    }

    /// Swapchain images, in index order. Drop them before the next acquire: a recreation
    /// requires the device to hold the only references.
    pub fn swapchain_images(&self) -> Vec<Arc<Image>> {
        self.swapchain.lock().images.clone()
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        if let Err(err) = self.backend().wait_idle() {
            log::error!("vkDeviceWaitIdle failed on shutdown: {:?}", err);
        }

        let backend = self.shared.backend.clone();
        for frame in &self.frames {
            let mut frame = frame.lock();
            let frame = &mut *frame;
            for fence in frame.fences.drain(..).chain(frame.free_fences.drain(..)) {
                backend.destroy_fence(fence);
            }
            for pool in frame.command_pools.drain(..) {
                backend.destroy_command_pool(pool.pool);
            }
        }
        for pools in &self.free_command_pools {
            for pool in pools.lock().drain(..) {
                backend.destroy_command_pool(pool.pool);
            }
        }

        let swapchain = self.swapchain.get_mut();
        swapchain.images.clear();
        for semaphore in swapchain.acquire_semaphores.drain(..).chain(swapchain.release_semaphores.drain(..)) {
            backend.destroy_semaphore(semaphore);
        }

        self.samplers.write().clear();
        self.pso_cache.clear();
        self.layout_cache.clear();
    }
}
