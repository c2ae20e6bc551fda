//! Bridge from the driver's push notifications to a blocking pull.
//!
//! ```text
//! driver thread                         worker thread
//! ┌──────────────────┐                  ┌──────────────────────────┐
//! │ on_sub_frame ────┼── staging[i] ──► │ next_frame               │
//! │   (i = 0..3)     │   swap on i==3   │  ├─ wait on frame_ready  │
//! │ on_device_fault ─┼── fault slot ──► │  ├─ rethrow fault once   │
//! └──────────────────┘                  │  └─ copy completed → out │
//!                                       └──────────────────────────┘
//! ```
//!
//! At most one complete sequence is held. The fault slot, the completion flag
//! and the staging buffers share one mutex so a waiter never misses a wakeup.

use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use crate::image_pipeline::acquisition::device::AcquisitionSink;
use crate::image_pipeline::common::FrameGeometry;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::raw::{FRAMES_PER_SEQUENCE, RawFrame, SubFrame};

/// Counters since the last `start()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynchronizerStats {
    /// Sequences whose four sub-frames all arrived intact.
    pub sequences_completed: u64,
    /// Sequences dropped because one of their sub-frames was malformed.
    pub sequences_discarded: u64,
    /// Completed sequences replaced before anyone read them.
    pub sequences_overwritten: u64,
    /// Malformed sub-frames. Diagnostic only, never stops acquisition.
    pub incomplete_score: u64,
}

struct SyncState {
    armed: bool,
    /// Acquisition index (0 = dark) the next sub-frame will fill.
    next_index: usize,
    /// Set when the sequence being assembled contains a malformed sub-frame.
    tainted: bool,
    staging: RawFrame,
    completed: RawFrame,
    completed_ready: bool,
    fault: Option<PipelineError>,
    stats: SynchronizerStats,
}

pub struct FrameSynchronizer {
    geometry: FrameGeometry,
    state: Mutex<SyncState>,
    frame_ready: Condvar,
}

impl FrameSynchronizer {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            state: Mutex::new(SyncState {
                armed: false,
                next_index: 0,
                tainted: false,
                staging: RawFrame::new(geometry),
                completed: RawFrame::new(geometry),
                completed_ready: false,
                fault: None,
                stats: SynchronizerStats::default(),
            }),
            frame_ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Arms the receive path and clears everything left from a previous session.
    pub fn start(&self) {
        let mut state = self.lock();
        state.armed = true;
        state.next_index = 0;
        state.tainted = false;
        state.completed_ready = false;
        state.fault = None;
        state.stats = SynchronizerStats::default();
        debug!("frame synchronizer armed");
    }

    /// Disarms the receive path and wakes every blocked reader.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.armed {
            info!(
                completed = state.stats.sequences_completed,
                discarded = state.stats.sequences_discarded,
                incomplete_score = state.stats.incomplete_score,
                "frame synchronizer disarmed"
            );
        }
        state.armed = false;
        drop(state);
        self.frame_ready.notify_all();
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// Blocks until a complete sequence or a fault is available.
    ///
    /// A captured fault is returned once and then cleared. Returns
    /// `PipelineError::Stopped` when disarmed while waiting and
    /// `PipelineError::AcquisitionTimeout` when `timeout` elapses first.
    pub fn next_frame(&self, out: &mut RawFrame, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if let Some(fault) = state.fault.take() {
                debug!(%fault, "rethrowing device fault on reader thread");
                return Err(fault);
            }
            if state.completed_ready {
                state.completed_ready = false;
                out.copy_from(&state.completed)?;
                return Ok(());
            }
            if !state.armed {
                return Err(PipelineError::Stopped);
            }

            state = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PipelineError::AcquisitionTimeout(timeout));
                    }
                    self.frame_ready
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
                _ => self
                    .frame_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// True when a complete sequence is waiting to be read.
    pub fn has_complete_sequence(&self) -> bool {
        self.lock().completed_ready
    }

    /// Sequences that finished arriving, whether delivered or discarded.
    pub fn sequences_received(&self) -> u64 {
        let state = self.lock();
        state.stats.sequences_completed + state.stats.sequences_discarded
    }

    pub fn incomplete_score(&self) -> u64 {
        self.lock().stats.incomplete_score
    }

    pub fn stats(&self) -> SynchronizerStats {
        self.lock().stats
    }
}

impl AcquisitionSink for FrameSynchronizer {
    fn on_sub_frame(&self, sub_frame: SubFrame<'_>) {
        let mut guard = self.lock();
        if !guard.armed {
            return;
        }
        let state = &mut *guard;
        let index = state.next_index;

        let stored = sub_frame.is_well_formed(self.geometry)
            && state.staging.plane_mut(index).copy_from_slice(sub_frame.data).is_ok();
        if !stored {
            state.stats.incomplete_score += 1;
            state.tainted = true;
            debug!(
                index,
                width = sub_frame.width,
                height = sub_frame.height,
                complete = sub_frame.complete,
                score = state.stats.incomplete_score,
                "malformed sub-frame"
            );
        }

        state.next_index += 1;
        if state.next_index < FRAMES_PER_SEQUENCE {
            return;
        }
        state.next_index = 0;

        if mem::take(&mut state.tainted) {
            state.stats.sequences_discarded += 1;
            trace!("incomplete sequence discarded");
            return;
        }

        if state.completed_ready {
            state.stats.sequences_overwritten += 1;
        }
        mem::swap(&mut state.staging, &mut state.completed);
        state.completed_ready = true;
        state.stats.sequences_completed += 1;
        trace!(sequence = state.stats.sequences_completed, "sequence complete");
        drop(guard);
        self.frame_ready.notify_one();
    }

    fn on_device_fault(&self, fault: PipelineError) {
        let mut state = self.lock();
        error!(%fault, "device fault captured");
        // Keep the first fault; later ones share its root cause.
        if state.fault.is_none() {
            state.fault = Some(fault);
        }
        drop(state);
        self.frame_ready.notify_all();
    }
}
