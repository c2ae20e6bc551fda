use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, instrument, trace, warn};

use crate::image_pipeline::acquisition::limits::{MAX_WORKERS, MIN_WORKERS};
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::common::{FrameGeometry, ImagePlane};
use crate::image_pipeline::processing::frame::{Frame, OutputPools, ProcessedImage};
use crate::image_pipeline::processing::parameters::ProcessingParameters;
use crate::image_pipeline::processing::stage::StageFactory;
use crate::image_pipeline::processing::worker::PipelineWorker;
use crate::image_pipeline::raw::{FrameSource, RawFrame};

/// Receives the output of a [`ProcessorPool`].
///
/// Calls never overlap: the pool holds one lock across each callback, so
/// implementations need no synchronization of their own. Callbacks run on
/// worker threads and must not call back into the pool.
pub trait FrameListener: Send + Sync {
    fn on_new_frame_available(&self, frame: Frame);

    /// Fires at most once per run; the session should be stopped afterwards.
    fn on_error(&self, message: &str);
}

struct PublishState {
    last_completed: Option<usize>,
    frames_delivered: u64,
}

struct PoolShared<S: ?Sized> {
    source: Arc<S>,
    listener: Arc<dyn FrameListener>,
    running: AtomicBool,
    failed: AtomicBool,
    publish: Mutex<PublishState>,
    parameters: RwLock<ProcessingParameters>,
}

impl<S: FrameSource + ?Sized> PoolShared<S> {
    fn lock_publish(&self) -> MutexGuard<'_, PublishState> {
        self.publish.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parameters(&self) -> ProcessingParameters {
        *self.parameters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.failed.load(Ordering::Acquire)
    }

    /// Delivers `frame` unless the pool stopped or failed. Returns whether
    /// the listener saw it.
    fn publish(&self, worker: usize, frame: Frame) -> bool {
        let mut state = self.lock_publish();
        if !self.is_active() {
            trace!(worker, "dropping frame finished after stop");
            return false;
        }
        state.last_completed = Some(worker);
        state.frames_delivered += 1;
        trace!(worker, frame = state.frames_delivered, skin_ratio = frame.skin_ratio(), "delivering frame");
        self.listener.on_new_frame_available(frame);
        true
    }

    fn fail(&self, worker: usize, err: &PipelineError) {
        let _state = self.lock_publish();
        if self.is_active() {
            self.failed.store(true, Ordering::Release);
            error!(worker, error = %err, "processing failed, pool entering error state");
            self.listener.on_error(&err.to_string());
        } else {
            debug!(worker, error = %err, "suppressed error after stop or earlier failure");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_owned())
}

fn run_worker<S: FrameSource + ?Sized>(shared: &PoolShared<S>, mut worker: PipelineWorker) -> PipelineWorker {
    let index = worker.index();
    debug!(worker = index, "worker started");

    while shared.is_active() {
        let params = shared.parameters();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.process_staged(&*shared.source, &params)))
            .unwrap_or_else(|payload| {
                Err(PipelineError::StageFailed {
                    stage: "pipeline",
                    message: panic_message(&*payload),
                })
            });

        // A stop during the blocking pull surfaces as an error; not a fault.
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        match outcome {
            Ok(frame) => {
                if shared.publish(index, frame) {
                    worker.commit();
                }
            }
            Err(err) => {
                shared.fail(index, &err);
                break;
            }
        }
    }

    debug!(worker = index, "worker exiting");
    worker
}

/// Runs 1 to 4 [`PipelineWorker`]s on their own threads against one frame
/// source and serializes their results into a single listener.
///
/// Workers race for frames, so with more than one worker consecutive frames
/// may arrive out of acquisition order.
pub struct ProcessorPool<S: FrameSource + ?Sized + 'static> {
    shared: Arc<PoolShared<S>>,
    factory: Arc<dyn StageFactory>,
    geometry: FrameGeometry,
    pools: OutputPools,
    /// Worker state while stopped. Each thread owns its worker while running
    /// and hands it back through its join handle.
    workers: Vec<Option<PipelineWorker>>,
    threads: Vec<(usize, JoinHandle<PipelineWorker>)>,
}

impl<S: FrameSource + ?Sized + 'static> ProcessorPool<S> {
    pub fn new(
        source: Arc<S>,
        factory: Arc<dyn StageFactory>,
        listener: Arc<dyn FrameListener>,
        geometry: FrameGeometry,
        workers: usize,
    ) -> Self {
        let count = workers.clamp(MIN_WORKERS, MAX_WORKERS);
        if count != workers {
            warn!(requested = workers, using = count, "worker count out of range, clamping");
        }

        let pools = OutputPools::new(geometry);
        // One frame in flight per worker plus one held by the listener.
        pools.preallocate(count + 1);

        let mut pool = Self {
            shared: Arc::new(PoolShared {
                source,
                listener,
                running: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                publish: Mutex::new(PublishState {
                    last_completed: None,
                    frames_delivered: 0,
                }),
                parameters: RwLock::new(ProcessingParameters::default()),
            }),
            factory,
            geometry,
            pools,
            workers: Vec::with_capacity(count),
            threads: Vec::with_capacity(count),
        };
        for index in 0..count {
            let worker = pool.build_worker(index);
            pool.workers.push(Some(worker));
        }
        pool
    }

    fn build_worker(&self, index: usize) -> PipelineWorker {
        PipelineWorker::new(index, self.geometry, self.factory.create_worker(), self.pools.clone())
    }

    fn take_worker(&mut self, index: usize) -> PipelineWorker {
        match self.workers[index].take() {
            Some(worker) => worker,
            None => {
                warn!(worker = index, "rebuilding lost worker state");
                self.build_worker(index)
            }
        }
    }

    /// Starts the source and spawns the worker threads. No-op while running.
    #[instrument(skip_all)]
    pub fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Ok(());
        }

        {
            let _state = self.shared.lock_publish();
            self.shared.failed.store(false, Ordering::Release);
        }
        self.shared.source.start()?;
        self.shared.running.store(true, Ordering::Release);

        for index in 0..self.workers.len() {
            let worker = self.take_worker(index);
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("pipeline-worker-{index}"))
                .spawn(move || run_worker(&shared, worker));
            match spawned {
                Ok(handle) => self.threads.push((index, handle)),
                Err(err) => {
                    error!(worker = index, error = %err, "failed to spawn worker thread");
                    self.stop();
                    return Err(PipelineError::ThreadSpawn(err.to_string()));
                }
            }
        }

        info!(workers = self.threads.len(), "processor pool started");
        Ok(())
    }

    /// Stops the source, which wakes any worker blocked on it, then joins
    /// every worker. No-op while stopped.
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if !was_running && self.threads.is_empty() {
            return;
        }

        self.shared.source.stop();
        for (index, handle) in mem::take(&mut self.threads) {
            match handle.join() {
                Ok(worker) => self.workers[index] = Some(worker),
                Err(payload) => {
                    error!(worker = index, reason = %panic_message(&*payload), "worker thread panicked");
                }
            }
        }

        info!(
            frames_delivered = self.frames_delivered(),
            failed = self.has_failed(),
            "processor pool stopped"
        );
    }

    /// True between `start` and `stop`, including after a failure.
    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.shared.lock_publish().frames_delivered
    }

    /// Worker that produced the most recent frame. Kept across restarts.
    pub fn last_completed_worker(&self) -> Option<usize> {
        self.shared.lock_publish().last_completed
    }

    /// Takes effect at the start of each worker's next cycle.
    pub fn set_parameters(&self, parameters: ProcessingParameters) {
        *self.shared.parameters.write().unwrap_or_else(PoisonError::into_inner) = parameters;
    }

    pub fn parameters(&self) -> ProcessingParameters {
        self.shared.parameters()
    }

    pub fn output_pools(&self) -> &OutputPools {
        &self.pools
    }

    /// Re-renders the most recent frame with the current parameters and
    /// delivers it to the listener on the calling thread.
    pub fn reprocess(&mut self) -> Result<Frame> {
        if self.is_running() {
            return Err(PipelineError::PoolRunning);
        }
        let params = self.parameters();
        let index = self
            .shared
            .lock_publish()
            .last_completed
            .ok_or(PipelineError::NoFrameAvailable)?;
        let worker = self
            .workers
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(PipelineError::NoFrameAvailable)?;

        let frame = worker.reprocess(&params)?;
        {
            let _state = self.shared.lock_publish();
            self.shared.listener.on_new_frame_available(frame.clone());
        }
        debug!(worker = index, "reprocessed last frame");
        Ok(frame)
    }

    /// Copy of one image of a freshly reprocessed frame. Pauses the pool if
    /// it is running; a failed pool stays stopped afterwards.
    pub fn processed_image(&mut self, kind: ProcessedImage) -> Result<ImagePlane<u8>> {
        self.with_paused(|pool| {
            let frame = pool.reprocess()?;
            let image = frame.image(kind).ok_or(match kind {
                ProcessedImage::RawPreview(i) | ProcessedImage::Visual(i) => PipelineError::InvalidChannel(i),
                ProcessedImage::Composite | ProcessedImage::SkinMask => PipelineError::NoFrameAvailable,
            })?;
            Ok(image.clone())
        })
    }

    /// Copy of the raw sequence behind the most recent frame. Pauses the pool
    /// if it is running.
    pub fn raw_images(&mut self) -> Result<RawFrame> {
        self.with_paused(|pool| {
            let index = pool.last_completed_worker().ok_or(PipelineError::NoFrameAvailable)?;
            pool.workers
                .get(index)
                .and_then(Option::as_ref)
                .and_then(PipelineWorker::raw_frame)
                .cloned()
                .ok_or(PipelineError::NoFrameAvailable)
        })
    }

    /// Runs `snapshot` with the workers joined. Acquisition resumes only if
    /// it was running and had not failed.
    fn with_paused<T>(&mut self, snapshot: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let was_running = self.is_running();
        if was_running {
            self.stop();
        }
        let resume = was_running && !self.has_failed();
        let result = snapshot(self);
        if resume {
            self.start()?;
        } else if was_running {
            debug!("pool failed before snapshot, not resuming");
        }
        result
    }
}

impl<S: FrameSource + ?Sized + 'static> Drop for ProcessorPool<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
