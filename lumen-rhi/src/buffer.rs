//! GPU buffers.

use std::ops::RangeBounds;

use ash::vk;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;

use crate::backend::{BufferCreateInfo, NativeBuffer};
use crate::device::DeviceShared;
use crate::utility::normalize_range_u64;

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryDomain {
    /// Device local. Initial data goes through a staged upload.
    #[default]
    Gpu,
    /// Host visible, coherent and persistently mapped.
    Cpu,
}

/// Buffer descriptor for creating GPU buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub name: String,
    /// Size of the buffer in bytes.
    pub size: vk::DeviceSize,
    pub domain: MemoryDomain,
    pub usage: vk::BufferUsageFlags,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            name: "Unnamed buffer".to_string(),
            size: 0,
            domain: MemoryDomain::Gpu,
            usage: vk::BufferUsageFlags::empty(),
        }
    }
}

impl BufferDesc {
    pub fn new(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            ..Default::default()
        }
    }

    pub fn vertex(name: &str, size: vk::DeviceSize) -> Self {
        Self::new(name, size).with_usage(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
    }

    pub fn index(name: &str, size: vk::DeviceSize) -> Self {
        Self::new(name, size).with_usage(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
    }

    /// Host-visible uniform buffer, written every frame.
    pub fn uniform(name: &str, size: vk::DeviceSize) -> Self {
        Self::new(name, size)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .host_visible()
    }

    pub fn storage(name: &str, size: vk::DeviceSize) -> Self {
        Self::new(name, size).with_usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
    }

    /// Create a staging buffer descriptor (CPU-visible for transfers).
    pub fn staging(name: &str, size: vk::DeviceSize) -> Self {
        Self::new(name, size)
            .with_usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .host_visible()
    }

    /// Set the buffer usage flags.
    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Add additional usage flags.
    pub fn with_additional_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    /// Make the buffer host-visible (CPU accessible).
    pub fn host_visible(mut self) -> Self {
        self.domain = MemoryDomain::Cpu;
        self
    }

    /// Make the buffer device-local (GPU-only).
    pub fn device_local(mut self) -> Self {
        self.domain = MemoryDomain::Gpu;
        self
    }
}

/// GPU buffer with its own memory allocation.
#[DeviceObject]
pub struct Buffer {
    desc: BufferDesc,
    native: NativeBuffer,
}

impl Buffer {
    pub(crate) fn new(device: &std::sync::Arc<DeviceShared>, desc: &BufferDesc) -> Self {
        rhi_assert!(desc.size > 0, "buffer '{}' has zero size", desc.name);

        let native = vk_check!(
            device.backend().create_buffer(&BufferCreateInfo {
                size: desc.size,
                usage: desc.usage,
                host_visible: desc.domain == MemoryDomain::Cpu,
            }),
            "vkCreateBuffer"
        );
        if desc.domain == MemoryDomain::Cpu && native.mapped.is_none() {
            rhi_fatal!("host-visible buffer '{}' was not mapped", desc.name);
        }

        log::trace!("Buffer '{}' created ({} bytes, {:?})", desc.name, desc.size, desc.domain);

        Self {
            desc: desc.clone(),
            native,
            device: device.clone(),
        }
    }

    /// Get the raw Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.native.buffer
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.desc.usage
    }

    #[inline]
    pub fn domain(&self) -> MemoryDomain {
        self.desc.domain
    }

    #[inline]
    pub fn has_usage(&self, usage: vk::BufferUsageFlags) -> bool {
        self.desc.usage.contains(usage)
    }

    /// Sub-range of the buffer. An out-of-bounds range is a usage error.
    pub fn as_range<R: RangeBounds<u64>>(&self, range: R) -> BufferRange<'_> {
        match normalize_range_u64(range, self.desc.size) {
            Some((offset, size)) => BufferRange { buffer: self, offset, size },
            None => rhi_fatal!("range out of bounds for buffer '{}' ({} bytes)", self.desc.name, self.desc.size),
        }
    }

    /// Copy `data` into a host-visible buffer at `offset`.
    pub fn write_at(&self, offset: vk::DeviceSize, data: &[u8]) {
        let Some(mapped) = self.native.mapped else {
            rhi_fatal!("buffer '{}' is not host visible", self.desc.name);
        };
        rhi_assert!(
            offset + data.len() as u64 <= self.desc.size,
            "write of {} bytes at {} overflows buffer '{}' ({} bytes)",
            data.len(),
            offset,
            self.desc.name,
            self.desc.size
        );

        // SAFETY: the mapping covers the whole buffer and the range was checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len());
        }
    }

    /// Read back `len` bytes of a host-visible buffer.
    pub fn read_at(&self, offset: vk::DeviceSize, len: usize) -> Vec<u8> {
        let Some(mapped) = self.native.mapped else {
            rhi_fatal!("buffer '{}' is not host visible", self.desc.name);
        };
        rhi_assert!(
            offset + len as u64 <= self.desc.size,
            "read of {} bytes at {} overflows buffer '{}' ({} bytes)",
            len,
            offset,
            self.desc.name,
            self.desc.size
        );

        let mut data = vec![0u8; len];
        // SAFETY: see `write_at`.
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.as_ptr().add(offset as usize), data.as_mut_ptr(), len);
        }
        data
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.defer_release(self.native);
    }
}

#[derive(Clone, Copy)]
pub struct BufferRange<'a> {
    buffer: &'a Buffer,
    offset: u64,
    size: u64,
}

impl<'a> BufferRange<'a> {
    #[inline]
    pub fn buffer(&self) -> &'a Buffer { self.buffer }

    #[inline]
    pub fn offset(&self) -> u64 { self.offset }

    #[inline]
    pub fn size(&self) -> u64 { self.size }

    pub fn write(&self, data: &[u8]) {
        rhi_assert!(
            data.len() as u64 <= self.size,
            "write of {} bytes overflows a {} byte range of '{}'",
            data.len(),
            self.size,
            self.buffer.name()
        );
        self.buffer.write_at(self.offset, data);
    }
}
