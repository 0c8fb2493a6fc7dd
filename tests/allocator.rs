//! Buffer sub-allocator behavior through the real render-device path:
//! backing creation is synchronous from the caller's point of view and the
//! documented granularity/offset contract holds end to end.

mod common;

use common::MockBackend;
use sumi::gpu::*;

#[test]
fn ten_then_twenty_bytes_share_one_backing_buffer() {
    let (backend, stats) = MockBackend::new(2);
    let device = RenderDevice::new(Box::new(backend));
    let mut allocator = BufferAllocator::new();

    let first = allocator
        .allocate(
            &device,
            10,
            BufferUsage::UNIFORM,
            MemoryProps::DEVICE_LOCAL,
        )
        .unwrap();
    let second = allocator
        .allocate(
            &device,
            20,
            BufferUsage::UNIFORM,
            MemoryProps::DEVICE_LOCAL,
        )
        .unwrap();

    // Both come from the same 2 MiB backing buffer at offsets 0 and 10; one
    // backend buffer was created, synchronously.
    assert_eq!(first.buffer, second.buffer);
    assert_eq!((first.offset, second.offset), (0, 10));
    assert_eq!(stats.lock().unwrap().created_buffers, 1);
    assert_eq!(allocator.free_range_count(), 1);

    // The remaining free range starts at offset 30.
    let third = allocator
        .allocate(
            &device,
            BACKING_GRANULARITY - 30,
            BufferUsage::UNIFORM,
            MemoryProps::DEVICE_LOCAL,
        )
        .unwrap();
    assert_eq!(third.buffer, first.buffer);
    assert_eq!(third.offset, 30);
    assert_eq!(allocator.free_range_count(), 0);
}

#[test]
fn incompatible_requests_create_separate_backings_synchronously() {
    let (backend, stats) = MockBackend::new(2);
    let device = RenderDevice::new(Box::new(backend));
    let mut allocator = BufferAllocator::new();

    let a = allocator
        .allocate(
            &device,
            256,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            MemoryProps::DEVICE_LOCAL,
        )
        .unwrap();
    let b = allocator
        .allocate(
            &device,
            256,
            BufferUsage::VERTEX,
            MemoryProps::DEVICE_LOCAL,
        )
        .unwrap();
    let c = allocator
        .allocate(
            &device,
            256,
            BufferUsage::VERTEX,
            MemoryProps::HOST_VISIBLE,
        )
        .unwrap();

    assert_ne!(a.buffer, b.buffer);
    assert_ne!(b.buffer, c.buffer);
    assert_eq!(stats.lock().unwrap().created_buffers, 3);
}

#[test]
fn destroy_releases_every_backing_buffer() {
    let (backend, stats) = MockBackend::new(2);
    let device = RenderDevice::new(Box::new(backend));
    let mut allocator = BufferAllocator::new();

    for _ in 0..4 {
        allocator
            .allocate(
                &device,
                BACKING_GRANULARITY,
                BufferUsage::STORAGE,
                MemoryProps::DEVICE_LOCAL,
            )
            .unwrap();
    }
    assert_eq!(allocator.backing_count(), 4);

    allocator.destroy(&device).unwrap();
    let s = stats.lock().unwrap();
    assert_eq!(s.created_buffers, 4);
    assert_eq!(s.destroyed_buffers, 4);
}
