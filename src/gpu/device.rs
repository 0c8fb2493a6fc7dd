use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use super::command::Submission;
use super::factory::ResourceFactory;
use super::queue::{BackendJob, RenderCommand};
use super::renderer::{AcquiredImage, RenderBackend};
use super::structs::{PresentInfo, SwapchainConfig};
use super::types::{Fence, Semaphore};
use super::{GPUError, Result};
use crate::utils::Handle;

const SWAP_HISTORY: usize = 32;

/// Rolling swap statistics, written by the render thread and readable from
/// producers.
#[derive(Default)]
pub struct FrameTiming {
    history: Vec<Duration>,
    next: usize,
    pub last_frame_time: Duration,
}

impl FrameTiming {
    fn record_swap(&mut self, d: Duration) {
        if self.history.len() < SWAP_HISTORY {
            self.history.push(d);
        } else {
            self.history[self.next] = d;
            self.next = (self.next + 1) % SWAP_HISTORY;
        }
    }

    pub fn rolling_swap_avg(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        self.history.iter().sum::<Duration>() / self.history.len() as u32
    }
}

/// Public front of a backend renderer. Owns the dedicated render thread and
/// the command queue feeding it; every producer thread talks to the backend
/// through this type.
///
/// Producers that need a synchronous result block on a one-shot completion
/// signal fulfilled by the render thread; that is their sole suspension
/// point. The render thread itself only blocks on queue `recv`, pacing
/// sleeps, and native driver synchronization.
pub struct RenderDevice {
    sender: flume::Sender<RenderCommand>,
    thread: Option<JoinHandle<()>>,
    timing: Arc<Mutex<FrameTiming>>,
    frame_count: usize,
    target_frame_interval: Duration,
}

impl RenderDevice {
    pub fn new(mut backend: Box<dyn RenderBackend>) -> Self {
        let frame_count = backend.frame_count();
        let (sender, receiver) = flume::unbounded::<RenderCommand>();
        let timing = Arc::new(Mutex::new(FrameTiming::default()));
        let target_frame_interval = Duration::from_micros(16_666);

        let thread_timing = timing.clone();
        let thread = std::thread::Builder::new()
            .name("sumi-render".into())
            .spawn(move || {
                render_loop(
                    backend.as_mut(),
                    receiver,
                    thread_timing,
                    target_frame_interval,
                );
            })
            .expect("failed to spawn render thread");

        Self {
            sender,
            thread: Some(thread),
            timing,
            frame_count,
            target_frame_interval,
        }
    }

    /// Frame-in-flight count (= swap image count).
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn target_frame_interval(&self) -> Duration {
        self.target_frame_interval
    }

    pub fn rolling_swap_avg(&self) -> Duration {
        self.timing.lock().rolling_swap_avg()
    }

    /// Wall-clock duration of the most recently presented frame.
    pub fn last_frame_time(&self) -> Duration {
        self.timing.lock().last_frame_time
    }

    fn send(&self, cmd: RenderCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .map_err(|_| GPUError::RenderThreadDown)
    }

    /// Run `job` on the render thread and block until it completes,
    /// returning its value.
    fn run_sync<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RenderBackend) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        let boxed: BackendJob = Box::new(move |backend| {
            let _ = tx.send(job(backend));
        });
        self.send(RenderCommand::CreateResources(boxed))?;
        rx.recv().map_err(|_| GPUError::RenderThreadDown)?
    }

    /// Enqueue `f` to run once with exclusive access to the resource
    /// factory. Synchronous from the caller's point of view.
    pub fn create_resources<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn ResourceFactory) -> Result<T> + Send + 'static,
    {
        self.run_sync(move |backend| f(backend.factory()))
    }

    /// Fire-and-forget variant used by the deferred-destruction path once a
    /// destroyer's countdown reaches zero.
    pub fn run_resource_job<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn ResourceFactory) + Send + 'static,
    {
        let boxed: BackendJob = Box::new(move |backend| f(backend.factory()));
        self.send(RenderCommand::CreateResources(boxed))
    }

    /// Submit a recorded command sequence. Asynchronous; ordering against
    /// other work is carried by the submission's semaphores and fence.
    pub fn execute(&self, submission: Submission) -> Result<()> {
        self.send(RenderCommand::ExecuteCommandBuffer(submission))
    }

    /// Present the given swap image after its wait semaphores signal.
    pub fn swap(&self, info: PresentInfo) -> Result<()> {
        self.send(RenderCommand::SwapWindow(info))
    }

    pub fn acquire_next_image(&self) -> Result<AcquiredImage> {
        self.run_sync(|backend| backend.acquire_next_image())
    }

    pub fn rebuild_swapchain(&self, config: SwapchainConfig) -> Result<()> {
        self.run_sync(move |backend| backend.rebuild_swapchain(&config))
    }

    pub fn wait_fence(&self, fence: Handle<Fence>) -> Result<()> {
        self.run_sync(move |backend| backend.wait_fence(fence))
    }

    pub fn wait_fences(&self, fences: Vec<Handle<Fence>>) -> Result<()> {
        self.run_sync(move |backend| {
            for fence in fences {
                backend.wait_fence(fence)?;
            }
            Ok(())
        })
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.run_sync(|backend| backend.wait_idle())
    }

    pub fn swapchain_views(&self) -> Result<Vec<Handle<crate::gpu::types::ImageView>>> {
        self.run_sync(|backend| Ok(backend.swapchain_views()))
    }

    pub fn swapchain_extent(&self) -> Result<crate::gpu::types::Extent2D> {
        self.run_sync(|backend| Ok(backend.swapchain_extent()))
    }

    pub fn make_semaphore(&self) -> Result<Handle<Semaphore>> {
        self.create_resources(|f| f.make_semaphore())
    }

    pub fn make_fence(&self) -> Result<Handle<Fence>> {
        self.create_resources(|f| f.make_fence())
    }

    /// Stop the render loop and join the thread.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.sender.send(RenderCommand::Abort);
            if thread.join().is_err() {
                error!("render thread panicked during shutdown");
            }
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop(
    backend: &mut dyn RenderBackend,
    receiver: flume::Receiver<RenderCommand>,
    timing: Arc<Mutex<FrameTiming>>,
    target_interval: Duration,
) {
    debug!("render thread up");
    let mut last_present: Option<Instant> = None;

    // Blocking wait; the queue never busy-polls.
    while let Ok(cmd) = receiver.recv() {
        match cmd {
            RenderCommand::Abort => {
                debug!("render thread aborting");
                break;
            }
            RenderCommand::CreateResources(job) => {
                backend.flush();
                job(backend);
                backend.flush();
            }
            RenderCommand::ExecuteCommandBuffer(submission) => {
                if let Err(e) = backend.execute(&submission) {
                    // Native submission failure has no recovery path.
                    error!("command buffer execution failed: {e}");
                    debug_assert!(false, "command buffer execution failed: {e}");
                }
            }
            RenderCommand::SwapWindow(info) => {
                // Pace against the rolling average swap time so we do not
                // oversubmit a queue that is already saturated.
                let avg = timing.lock().rolling_swap_avg();
                if let Some(last) = last_present {
                    let since = last.elapsed();
                    if since + avg < target_interval {
                        let sleep = (target_interval - since - avg).min(target_interval);
                        trace!("pacing sleep {sleep:?}");
                        std::thread::sleep(sleep);
                    }
                }

                let start = Instant::now();
                match backend.present(&info) {
                    Ok(()) => {
                        let swap_time = start.elapsed();
                        let mut t = timing.lock();
                        t.record_swap(swap_time);
                        if let Some(last) = last_present {
                            t.last_frame_time = start.duration_since(last) + swap_time;
                        }
                    }
                    Err(e) => {
                        // Stale-at-present surfaces on the next acquire; log
                        // and keep the loop alive.
                        warn!("present failed: {e}");
                    }
                }
                last_present = Some(Instant::now());
            }
        }
    }
    debug!("render thread down");
}
