use std::mem;

use tracing::{debug_span, trace, trace_span};

use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::common::{FrameGeometry, ImagePlane};
use crate::image_pipeline::processing::frame::{Frame, FrameImages, OutputPools};
use crate::image_pipeline::processing::parameters::ProcessingParameters;
use crate::image_pipeline::processing::stage::{Stage, StageContext, WorkerStages};
use crate::image_pipeline::raw::{FRAMES_PER_SEQUENCE, FrameSource, RawFrame};

/// Working images private to one worker. Never shared, never locked.
struct WorkBuffers {
    /// Normalized sub-frames by acquisition index (0 = dark).
    normalized: [ImagePlane<f32>; 4],
    /// Per-waveband working images, filtered in place via `scratch`.
    visual: [ImagePlane<f32>; 3],
    scratch: ImagePlane<f32>,
}

impl WorkBuffers {
    fn new(geometry: FrameGeometry) -> Self {
        Self {
            normalized: std::array::from_fn(|_| ImagePlane::gray(geometry)),
            visual: std::array::from_fn(|_| ImagePlane::gray(geometry)),
            scratch: ImagePlane::gray(geometry),
        }
    }
}

struct WorkerState {
    /// Input of the last committed frame; what `reprocess` renders.
    raw: RawFrame,
    /// Input of the frame in flight, promoted to `raw` by `commit`.
    incoming: RawFrame,
    work: WorkBuffers,
    has_frame: bool,
    staged: bool,
}

impl WorkerState {
    fn new(geometry: FrameGeometry) -> Self {
        Self {
            raw: RawFrame::new(geometry),
            incoming: RawFrame::new(geometry),
            work: WorkBuffers::new(geometry),
            has_frame: false,
            staged: false,
        }
    }
}

fn run_stage<I, O>(
    stage: &mut dyn Stage<I, O>,
    inputs: &[&ImagePlane<I>],
    output: &mut ImagePlane<O>,
    ctx: &StageContext<'_>,
) -> Result<()> {
    let _span = trace_span!("stage", name = stage.name(), channel = ?ctx.channel).entered();
    stage.apply(inputs, output, ctx).map_err(|err| match err {
        PipelineError::StageFailed { .. } => err,
        other => PipelineError::StageFailed {
            stage: stage.name(),
            message: other.to_string(),
        },
    })
}

/// Runs the fixed stage sequence over one sequence at a time.
///
/// Stage order: ingest, format conversion, raw filters, visual filters,
/// classification, result conversion.
pub struct PipelineWorker {
    index: usize,
    stages: WorkerStages,
    pools: OutputPools,
    state: WorkerState,
}

impl PipelineWorker {
    pub fn new(index: usize, geometry: FrameGeometry, stages: WorkerStages, pools: OutputPools) -> Self {
        Self {
            index,
            stages,
            pools,
            state: WorkerState::new(geometry),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw input of the last committed frame.
    pub fn raw_frame(&self) -> Option<&RawFrame> {
        self.state.has_frame.then_some(&self.state.raw)
    }

    /// Pulls the next sequence from `source` (may block), processes it and
    /// commits it as the retained input.
    pub fn process<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        params: &ProcessingParameters,
    ) -> Result<Frame> {
        let frame = self.process_staged(source, params)?;
        self.commit();
        Ok(frame)
    }

    /// Like [`process`](Self::process) but leaves the retained input alone
    /// until [`commit`](Self::commit). A staged frame that is never committed
    /// is replaced by the next pull.
    pub(crate) fn process_staged<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        params: &ProcessingParameters,
    ) -> Result<Frame> {
        self.state.staged = false;
        {
            let _span = trace_span!("ingest", worker = self.index).entered();
            source.next_frame(&mut self.state.incoming)?;
        }
        let _span = debug_span!("process", worker = self.index).entered();
        let frame = render(
            &mut self.stages,
            &self.pools,
            &mut self.state.work,
            &self.state.incoming,
            params,
            self.index,
        )?;
        self.state.staged = true;
        Ok(frame)
    }

    /// Makes the last staged input the one `reprocess` and `raw_frame` see.
    /// No-op without a staged frame.
    pub(crate) fn commit(&mut self) {
        if mem::take(&mut self.state.staged) {
            mem::swap(&mut self.state.raw, &mut self.state.incoming);
            self.state.has_frame = true;
        }
    }

    /// Re-runs every stage after ingest on the retained raw input. Gives
    /// bit-identical output for unchanged input and parameters.
    pub fn reprocess(&mut self, params: &ProcessingParameters) -> Result<Frame> {
        if !self.state.has_frame {
            return Err(PipelineError::NoFrameAvailable);
        }
        let _span = debug_span!("reprocess", worker = self.index).entered();
        render(
            &mut self.stages,
            &self.pools,
            &mut self.state.work,
            &self.state.raw,
            params,
            self.index,
        )
    }
}

fn render(
    stages: &mut WorkerStages,
    pools: &OutputPools,
    work: &mut WorkBuffers,
    raw: &RawFrame,
    params: &ProcessingParameters,
    worker: usize,
) -> Result<Frame> {
    for index in 0..FRAMES_PER_SEQUENCE {
        let ctx = StageContext { channel: Some(index), params };
        run_stage(stages.convert.as_mut(), &[raw.plane(index)], &mut work.normalized[index], &ctx)?;
    }

    for band in 0..3 {
        let ctx = StageContext { channel: Some(band), params };
        work.visual[band].copy_from(&work.normalized[band + 1])?;
        for stage in stages.raw_filters.iter_mut() {
            run_stage(
                stage.as_mut(),
                &[&work.visual[band], &work.normalized[0]],
                &mut work.scratch,
                &ctx,
            )?;
            mem::swap(&mut work.visual[band], &mut work.scratch);
        }
    }

    for band in 0..3 {
        let ctx = StageContext { channel: Some(band), params };
        for stage in stages.visual_filters.iter_mut() {
            run_stage(stage.as_mut(), &[&work.visual[band]], &mut work.scratch, &ctx)?;
            mem::swap(&mut work.visual[band], &mut work.scratch);
        }
    }

    let whole = StageContext { channel: None, params };
    let visual_inputs = [&work.visual[0], &work.visual[1], &work.visual[2]];

    let mut skin_mask = pools.acquire_gray();
    run_stage(stages.classifier.as_mut(), &visual_inputs, &mut *skin_mask, &whole)?;
    let skin_pixels = skin_mask.data.iter().filter(|&&v| v > 0).count();
    let skin_ratio = if skin_mask.is_empty() {
        0.0
    } else {
        (skin_pixels as f64 / skin_mask.len() as f64) as f32
    };

    let mut raw_previews: [_; 4] = std::array::from_fn(|_| pools.acquire_gray());
    for (index, preview) in raw_previews.iter_mut().enumerate() {
        let ctx = StageContext { channel: Some(index), params };
        run_stage(stages.preview.as_mut(), &[raw.plane(index)], &mut **preview, &ctx)?;
    }

    let mut visual: [_; 3] = std::array::from_fn(|_| pools.acquire_gray());
    for (band, display) in visual.iter_mut().enumerate() {
        let ctx = StageContext { channel: Some(band), params };
        run_stage(stages.display.as_mut(), &[&work.visual[band]], &mut **display, &ctx)?;
    }

    let mut composite = pools.acquire_rgb();
    run_stage(stages.composite.as_mut(), &visual_inputs, &mut *composite, &whole)?;

    trace!(worker, skin_ratio, "frame processed");
    Ok(Frame::new(FrameImages {
        raw_previews,
        visual,
        composite,
        skin_mask,
        skin_ratio,
        worker,
    }))
}
