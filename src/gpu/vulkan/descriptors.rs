use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::gpu::Result;

const MAX_SETS_PER_POOL: u32 = 1024;
const DESCRIPTORS_PER_TYPE: u32 = 4096;

/// Narrow seam to the job scheduler: the only thing the backend needs from it
/// is a stable small index for the calling worker thread.
pub trait ThreadIndexSource: Send + Sync {
    fn thread_index(&self) -> usize;
}

/// Default source: hands every thread that ever asks a distinct index.
#[derive(Default)]
pub struct WorkerThreadIndices {
    next: AtomicUsize,
}

impl ThreadIndexSource for WorkerThreadIndices {
    fn thread_index(&self) -> usize {
        thread_local! {
            static INDEX: std::cell::OnceCell<usize> = const { std::cell::OnceCell::new() };
        }
        INDEX.with(|cell| *cell.get_or_init(|| self.next.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Descriptor pools partitioned by worker-thread index. A worker's
/// allocations land in "its" pool, so the mutex is uncontended in the common
/// path and only blocks when two threads map to the same partition.
pub(crate) struct DescriptorPoolTable {
    pools: Vec<Mutex<vk::DescriptorPool>>,
    threads: Arc<dyn ThreadIndexSource>,
}

impl DescriptorPoolTable {
    pub(crate) fn new(device: &ash::Device, partitions: usize) -> Result<Self> {
        let mut pools = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            pools.push(Mutex::new(Self::make_pool(device)?));
        }
        Ok(Self {
            pools,
            threads: Arc::new(WorkerThreadIndices::default()),
        })
    }

    /// Swap in the job scheduler's thread-index source. Partition residency
    /// changes for future allocations only.
    pub(crate) fn set_thread_source(&mut self, threads: Arc<dyn ThreadIndexSource>) {
        self.threads = threads;
    }

    fn make_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
        let sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::SAMPLER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ]
        .map(|ty| {
            vk::DescriptorPoolSize::builder()
                .ty(ty)
                .descriptor_count(DESCRIPTORS_PER_TYPE)
                .build()
        });

        let pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .pool_sizes(&sizes)
                    .max_sets(MAX_SETS_PER_POOL)
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .build(),
                None,
            )?
        };
        Ok(pool)
    }

    /// Allocate one set from the calling thread's partition.
    pub(crate) fn allocate(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<(vk::DescriptorSet, usize)> {
        let index = self.threads.thread_index() % self.pools.len();
        let pool = self.pools[index].lock();
        let layouts = [layout];
        let sets = unsafe {
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(*pool)
                    .set_layouts(&layouts)
                    .build(),
            )?
        };
        Ok((sets[0], index))
    }

    pub(crate) fn free(&self, device: &ash::Device, set: vk::DescriptorSet, index: usize) {
        let pool = self.pools[index].lock();
        unsafe {
            let _ = device.free_descriptor_sets(*pool, &[set]);
        }
    }

    pub(crate) fn destroy(&mut self, device: &ash::Device) {
        for pool in &self.pools {
            unsafe {
                device.destroy_descriptor_pool(*pool.lock(), None);
            }
        }
        self.pools.clear();
    }
}
