//! Per-frame garbage: native objects whose destruction waits until the GPU is done with them.

use ash::vk;

use crate::backend::{GpuBackend, NativeBuffer, NativeImage};

/// A native object that can be queued for destruction.
pub trait DeferRelease: Copy + Send + 'static {
    fn push_to(self, queue: &mut DeferReleaseQueue);
}

/// Objects released at the end of one frame slot's lifetime.
#[derive(Default)]
pub struct DeferReleaseQueue {
    buffers: Vec<NativeBuffer>,
    images: Vec<NativeImage>,
    image_views: Vec<vk::ImageView>,
    samplers: Vec<vk::Sampler>,
    shader_modules: Vec<vk::ShaderModule>,
    pipelines: Vec<vk::Pipeline>,
    command_pools: Vec<vk::CommandPool>,
    semaphores: Vec<vk::Semaphore>,
}

/// How many objects of each kind the last release of a frame slot destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastFreedStats {
    pub buffers: usize,
    pub images: usize,
    pub image_views: usize,
    pub samplers: usize,
    pub shader_modules: usize,
    pub pipelines: usize,
    pub command_pools: usize,
    pub semaphores: usize,
}

impl LastFreedStats {
    pub fn total(&self) -> usize {
        self.buffers
            + self.images
            + self.image_views
            + self.samplers
            + self.shader_modules
            + self.pipelines
            + self.command_pools
            + self.semaphores
    }
}

macro_rules! impl_defer_release {
    ($($ty:ty => $list:ident),+ $(,)?) => {
        $(
            impl DeferRelease for $ty {
                #[inline]
                fn push_to(self, queue: &mut DeferReleaseQueue) {
                    queue.$list.push(self);
                }
            }
        )+
    };
}

impl_defer_release! {
    NativeBuffer => buffers,
    NativeImage => images,
    vk::ImageView => image_views,
    vk::Sampler => samplers,
    vk::ShaderModule => shader_modules,
    vk::Pipeline => pipelines,
    vk::CommandPool => command_pools,
    vk::Semaphore => semaphores,
}

impl DeferReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push<T: DeferRelease>(&mut self, object: T) {
        object.push_to(self);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
            + self.images.len()
            + self.image_views.len()
            + self.samplers.len()
            + self.shader_modules.len()
            + self.pipelines.len()
            + self.command_pools.len()
            + self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy everything queued. Views go before the images they look at.
    pub fn release_all(&mut self, backend: &dyn GpuBackend) -> LastFreedStats {
        let stats = LastFreedStats {
            buffers: self.buffers.len(),
            images: self.images.len(),
            image_views: self.image_views.len(),
            samplers: self.samplers.len(),
            shader_modules: self.shader_modules.len(),
            pipelines: self.pipelines.len(),
            command_pools: self.command_pools.len(),
            semaphores: self.semaphores.len(),
        };

        for pipeline in self.pipelines.drain(..) {
            backend.destroy_pipeline(pipeline);
        }
        for module in self.shader_modules.drain(..) {
            backend.destroy_shader_module(module);
        }
        for view in self.image_views.drain(..) {
            backend.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            backend.destroy_image(&image);
        }
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(&buffer);
        }
        for sampler in self.samplers.drain(..) {
            backend.destroy_sampler(sampler);
        }
        for pool in self.command_pools.drain(..) {
            backend.destroy_command_pool(pool);
        }
        for semaphore in self.semaphores.drain(..) {
            backend.destroy_semaphore(semaphore);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::backend::BufferCreateInfo;

    #[test]
    fn release_destroys_everything_queued() {
        let backend = NullBackend::new();
        let buffer = backend
            .create_buffer(&BufferCreateInfo { size: 64, usage: vk::BufferUsageFlags::VERTEX_BUFFER, host_visible: false })
            .unwrap();
        let sampler = backend.create_sampler(&Default::default()).unwrap();

        let mut queue = DeferReleaseQueue::new();
        queue.push(buffer);
        queue.push(sampler);
        assert_eq!(queue.len(), 2);
        assert!(backend.is_alive(buffer.buffer));

        let stats = queue.release_all(&backend);
        assert_eq!(stats, LastFreedStats { buffers: 1, samplers: 1, ..Default::default() });
        assert!(queue.is_empty());
        assert!(!backend.is_alive(buffer.buffer));
        assert!(!backend.is_alive(sampler));
    }
}
