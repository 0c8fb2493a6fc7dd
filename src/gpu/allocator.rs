use log::{debug, warn};

use super::device::RenderDevice;
use super::structs::BufferInfo;
use super::types::{Buffer, BufferSlice, BufferUsage, MemoryProps};
use super::Result;
use crate::utils::Handle;

/// New backing buffers are rounded up to this granularity so small requests
/// share one allocation instead of hitting the backend per object.
pub const BACKING_GRANULARITY: u32 = 2 * 1024 * 1024;

/// Free-list size past which we log the fragmentation debt; ranges are never
/// merged on free (known limitation).
const FREE_LIST_NOISE_THRESHOLD: usize = 4096;

struct BackingBuffer {
    handle: Handle<Buffer>,
    usage: BufferUsage,
    memory_props: MemoryProps,
    size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    backing: usize,
    offset: u32,
    size: u32,
}

/// Slab sub-allocator handing out byte ranges of larger backend buffers.
///
/// Owns every backing buffer it creates; callers only ever hold
/// [`BufferSlice`] views. First-fit over the free list, shrink in place, no
/// defragmentation and no coalescing of adjacent ranges on free. Accessed
/// only from the thread that owns the frame; call sites assume single-writer.
#[derive(Default)]
pub struct BufferAllocator {
    backing: Vec<BackingBuffer>,
    free_list: Vec<FreeRange>,
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` bytes compatible with `usage`/`memory_props`.
    /// Backing-buffer creation is synchronous from the caller's point of
    /// view: it round-trips the render thread before this returns.
    pub fn allocate(
        &mut self,
        device: &RenderDevice,
        size: u32,
        usage: BufferUsage,
        memory_props: MemoryProps,
    ) -> Result<BufferSlice> {
        self.allocate_with(size, usage, memory_props, |byte_size| {
            device.create_resources(move |factory| {
                factory.make_buffer(&BufferInfo {
                    debug_name: "suballoc backing",
                    byte_size,
                    usage,
                    memory_props,
                    initial_data: None,
                })
            })
        })
    }

    /// Allocation core, parameterized over backing-buffer creation so the
    /// free-list logic is exercisable without a live backend.
    pub fn allocate_with<F>(
        &mut self,
        size: u32,
        usage: BufferUsage,
        memory_props: MemoryProps,
        create_backing: F,
    ) -> Result<BufferSlice>
    where
        F: FnOnce(u32) -> Result<Handle<Buffer>>,
    {
        assert!(size > 0, "zero-sized allocation");

        // First fit over compatible ranges; shrink the winner in place.
        for idx in 0..self.free_list.len() {
            let range = self.free_list[idx];
            let backing = &self.backing[range.backing];
            if backing.usage != usage || backing.memory_props != memory_props {
                continue;
            }
            if range.size < size {
                continue;
            }

            let slice = BufferSlice {
                buffer: backing.handle,
                offset: range.offset,
                size,
            };
            if range.size == size {
                self.free_list.swap_remove(idx);
            } else {
                let r = &mut self.free_list[idx];
                r.offset += size;
                r.size -= size;
            }
            return Ok(slice);
        }

        // No compatible range: new backing buffer at granularity.
        let byte_size = size.max(BACKING_GRANULARITY).next_multiple_of(BACKING_GRANULARITY);
        let handle = create_backing(byte_size)?;
        debug!(
            "new {byte_size}-byte backing buffer (usage {usage:?}, props {memory_props:?})"
        );

        let backing_idx = self.backing.len();
        self.backing.push(BackingBuffer {
            handle,
            usage,
            memory_props,
            size: byte_size,
        });

        if byte_size > size {
            self.free_list.push(FreeRange {
                backing: backing_idx,
                offset: size,
                size: byte_size - size,
            });
        }

        Ok(BufferSlice {
            buffer: handle,
            offset: 0,
            size,
        })
    }

    /// Return `slice` to the free list. Adjacent free ranges are not merged.
    pub fn free(&mut self, slice: BufferSlice) {
        let Some(backing) = self
            .backing
            .iter()
            .position(|b| b.handle == slice.buffer)
        else {
            warn!(
                "free of slice with unknown backing buffer {:?}; skipped",
                slice.buffer
            );
            return;
        };

        self.free_list.push(FreeRange {
            backing,
            offset: slice.offset,
            size: slice.size,
        });

        if self.free_list.len() == FREE_LIST_NOISE_THRESHOLD {
            debug!(
                "free list reached {} ranges; fragmentation from unmerged frees is accumulating",
                self.free_list.len()
            );
        }
    }

    /// Destroy every backing buffer. Callers must have drained in-flight GPU
    /// work referencing slices of this allocator first.
    pub fn destroy(&mut self, device: &RenderDevice) -> Result<()> {
        let handles: Vec<Handle<Buffer>> = self.backing.drain(..).map(|b| b.handle).collect();
        self.free_list.clear();
        device.create_resources(move |factory| {
            for handle in handles {
                factory.destroy_buffer(handle);
            }
            Ok(())
        })
    }

    pub fn backing_count(&self) -> usize {
        self.backing.len()
    }

    pub fn free_range_count(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_backing() -> impl FnMut(u32) -> Result<Handle<Buffer>> {
        let mut next = 0u16;
        move |_| {
            next += 1;
            Ok(Handle::new(next, 0))
        }
    }

    fn alloc(
        a: &mut BufferAllocator,
        make: &mut impl FnMut(u32) -> Result<Handle<Buffer>>,
        size: u32,
    ) -> BufferSlice {
        a.allocate_with(
            size,
            BufferUsage::UNIFORM,
            MemoryProps::DEVICE_LOCAL,
            |s| make(s),
        )
        .unwrap()
    }

    #[test]
    fn small_allocations_share_one_backing_buffer() {
        let mut a = BufferAllocator::new();
        let mut make = fake_backing();

        let first = alloc(&mut a, &mut make, 10);
        let second = alloc(&mut a, &mut make, 20);

        assert_eq!(first.buffer, second.buffer);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 10);
        assert_eq!(a.backing_count(), 1);

        // The remaining free range of the 2 MiB backing starts right after.
        assert_eq!(a.free_list.len(), 1);
        assert_eq!(a.free_list[0].offset, 30);
        assert_eq!(a.free_list[0].size, BACKING_GRANULARITY - 30);
    }

    #[test]
    fn live_ranges_never_overlap() {
        let mut a = BufferAllocator::new();
        let mut make = fake_backing();

        let mut live: Vec<BufferSlice> = Vec::new();
        // Mixed alloc/free traffic with varying sizes.
        for round in 0..8 {
            for i in 0..32u32 {
                live.push(alloc(&mut a, &mut make, 16 + (i * 37) % 2048));
            }
            // Free every other slice to churn the free list.
            let mut keep = Vec::new();
            for (n, s) in live.drain(..).enumerate() {
                if (n + round) % 2 == 0 {
                    a.free(s);
                } else {
                    keep.push(s);
                }
            }
            live = keep;

            for (i, x) in live.iter().enumerate() {
                for y in live.iter().skip(i + 1) {
                    if x.buffer != y.buffer {
                        continue;
                    }
                    let disjoint =
                        x.offset + x.size <= y.offset || y.offset + y.size <= x.offset;
                    assert!(disjoint, "overlapping live ranges: {x:?} vs {y:?}");
                }
            }
        }
    }

    #[test]
    fn incompatible_usage_gets_its_own_backing() {
        let mut a = BufferAllocator::new();
        let mut next = 0u16;
        let mut make = move |_| {
            next += 1;
            Ok(Handle::<Buffer>::new(next, 0))
        };

        let uniform = a
            .allocate_with(64, BufferUsage::UNIFORM, MemoryProps::DEVICE_LOCAL, |s| {
                make(s)
            })
            .unwrap();
        let vertex = a
            .allocate_with(64, BufferUsage::VERTEX, MemoryProps::DEVICE_LOCAL, |s| {
                make(s)
            })
            .unwrap();

        assert_ne!(uniform.buffer, vertex.buffer);
        assert_eq!(a.backing_count(), 2);
    }

    #[test]
    fn freed_range_is_reused_without_coalescing() {
        let mut a = BufferAllocator::new();
        let mut make = fake_backing();

        let first = alloc(&mut a, &mut make, 100);
        let second = alloc(&mut a, &mut make, 100);
        let free_ranges_before = a.free_range_count();

        a.free(first);
        a.free(second);
        // Two new entries, not merged with each other or the tail range.
        assert_eq!(a.free_range_count(), free_ranges_before + 2);

        // First fit scans in list order: the tail range (offset 200) comes
        // first, so it is shrunk in place; the holes stay on the list.
        let again = alloc(&mut a, &mut make, 100);
        assert_eq!(again.offset, 200);
        assert_eq!(a.backing_count(), 1);
        assert_eq!(a.free_range_count(), free_ranges_before + 2);

        // Exhaust the tail, then both holes get handed back out.
        let tail_left = BACKING_GRANULARITY - 300;
        let huge = alloc(&mut a, &mut make, tail_left);
        assert_eq!(huge.offset, 300);
        let holes = [alloc(&mut a, &mut make, 100), alloc(&mut a, &mut make, 100)];
        let mut offsets: Vec<u32> = holes.iter().map(|h| h.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 100]);
        assert_eq!(a.backing_count(), 1);
    }

    #[test]
    fn oversized_request_rounds_up_to_granularity() {
        let mut a = BufferAllocator::new();
        let mut make = fake_backing();

        let big = alloc(&mut a, &mut make, BACKING_GRANULARITY + 1);
        assert_eq!(big.offset, 0);
        assert_eq!(big.size, BACKING_GRANULARITY + 1);
        // Backing is rounded to the next multiple; surplus is free.
        assert_eq!(a.free_list.len(), 1);
        assert_eq!(a.free_list[0].size, BACKING_GRANULARITY - 1);
    }
}
