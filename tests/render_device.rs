//! Render-command queue semantics: synchronous factory round-trips, FIFO
//! order per producer, and clean shutdown.

mod common;

use std::sync::Arc;

use common::MockBackend;
use sumi::gpu::*;

#[test]
fn create_resources_is_synchronous_for_the_caller() {
    let (backend, stats) = MockBackend::new(2);
    let device = RenderDevice::new(Box::new(backend));

    let handle = device
        .create_resources(|f| {
            f.make_buffer(&BufferInfo {
                debug_name: "sync",
                byte_size: 64,
                ..Default::default()
            })
        })
        .unwrap();

    // The backend already ran the job by the time the call returned.
    assert_eq!(stats.lock().unwrap().created_buffers, 1);
    let _ = handle;
}

#[test]
fn per_producer_order_is_preserved() {
    let (backend, _stats) = MockBackend::new(2);
    let device = Arc::new(RenderDevice::new(Box::new(backend)));

    let mut threads = Vec::new();
    for t in 0..4u32 {
        let device = device.clone();
        threads.push(std::thread::spawn(move || {
            let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
            for i in 0..16u32 {
                let log = log.clone();
                device
                    .create_resources(move |_| {
                        log.lock().push(i);
                        Ok(())
                    })
                    .unwrap();
            }
            let seen = log.lock().clone();
            assert_eq!(seen, (0..16).collect::<Vec<_>>(), "producer {t} reordered");
        }));
    }
    for t in threads {
        t.join().unwrap();
    }
}

#[test]
fn blocked_producers_resume_when_their_job_completes() {
    let (backend, _stats) = MockBackend::new(2);
    let device = RenderDevice::new(Box::new(backend));

    // A batch of dependent round-trips; each must observe the previous one's
    // side effect because each call blocks until its job has run.
    let mut last = 0u32;
    for i in 1..=8 {
        last = device.create_resources(move |_| Ok(i)).unwrap();
        assert_eq!(last, i);
    }
    assert_eq!(last, 8);
}

#[test]
fn shutdown_aborts_the_render_loop() {
    let (backend, _stats) = MockBackend::new(2);
    let mut device = RenderDevice::new(Box::new(backend));
    device.shutdown();

    // Post-shutdown submissions surface an error instead of hanging.
    assert!(matches!(
        device.create_resources(|_| Ok(())),
        Err(GPUError::RenderThreadDown)
    ));
}
