use ash::vk;
use log::trace;
use vk_mem::Alloc;

use crate::gpu::{GPUError, Result};

const MIN_STAGING_SIZE: u32 = 256 * 1024;

pub(crate) struct StagingBuffer {
    pub(crate) buf: vk::Buffer,
    pub(crate) alloc: vk_mem::Allocation,
    pub(crate) size: u32,
}

/// Growable pool of reusable host-visible buffers for host→device uploads.
/// Uploads are synchronous, so a buffer is recyclable as soon as its one-shot
/// submit has completed.
#[derive(Default)]
pub(crate) struct StagingPool {
    free: Vec<StagingBuffer>,
}

impl StagingPool {
    /// Pop a buffer of at least `size` bytes, growing the pool on miss.
    pub(crate) fn acquire(
        &mut self,
        allocator: &vk_mem::Allocator,
        size: u32,
    ) -> Result<StagingBuffer> {
        if let Some(idx) = self.free.iter().position(|b| b.size >= size) {
            return Ok(self.free.swap_remove(idx));
        }

        let rounded = size.max(MIN_STAGING_SIZE).next_power_of_two();
        trace!("staging pool grows by a {rounded}-byte buffer");
        let (buf, alloc) = unsafe {
            allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(rounded as u64)
                    .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                    .build(),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferHost,
                    flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                    ..Default::default()
                },
            )?
        };
        Ok(StagingBuffer {
            buf,
            alloc,
            size: rounded,
        })
    }

    /// Copy `data` into the staging buffer through a transient mapping.
    pub(crate) fn write(
        allocator: &vk_mem::Allocator,
        staging: &mut StagingBuffer,
        data: &[u8],
    ) -> Result<()> {
        if data.len() > staging.size as usize {
            return Err(GPUError::Allocation("staging buffer too small for upload"));
        }
        unsafe {
            let ptr = allocator.map_memory(&mut staging.alloc)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            allocator.unmap_memory(&mut staging.alloc);
        }
        Ok(())
    }

    pub(crate) fn recycle(&mut self, staging: StagingBuffer) {
        self.free.push(staging);
    }

    pub(crate) fn destroy(&mut self, _device: &ash::Device, allocator: &mut vk_mem::Allocator) {
        for mut b in self.free.drain(..) {
            unsafe {
                allocator.destroy_buffer(b.buf, &mut b.alloc);
            }
        }
    }
}
