//! The stage capability every numeric transform implements.

use crate::image_pipeline::common::ImagePlane;
use crate::image_pipeline::common::error::Result;
use crate::image_pipeline::processing::parameters::ProcessingParameters;

/// Per-call information handed to a stage.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Waveband (0..3) or acquisition index (0..4) being processed, if the
    /// call is per channel.
    pub channel: Option<usize>,
    pub params: &'a ProcessingParameters,
}

/// One deterministic image transform.
///
/// Instances are stateful and owned by a single worker, so `apply` takes
/// `&mut self` and needs no synchronization. `apply` must overwrite every
/// sample of `output`.
pub trait Stage<In, Out>: Send {
    fn name(&self) -> &'static str;

    fn apply(
        &mut self,
        inputs: &[&ImagePlane<In>],
        output: &mut ImagePlane<Out>,
        ctx: &StageContext<'_>,
    ) -> Result<()>;
}

pub type BoxedStage<In, Out> = Box<dyn Stage<In, Out>>;

/// The stage instances of one worker, in execution order.
pub struct WorkerStages {
    /// Raw samples to normalized intensity, applied to all four sub-frames.
    pub convert: BoxedStage<u16, f32>,
    /// Run per waveband with inputs `[channel, dark]`.
    pub raw_filters: Vec<BoxedStage<f32, f32>>,
    /// Run per waveband with inputs `[channel]`.
    pub visual_filters: Vec<BoxedStage<f32, f32>>,
    /// Inputs are the three visual channels; output is the binary mask.
    pub classifier: BoxedStage<f32, u8>,
    /// Visual channel to 8-bit display image.
    pub display: BoxedStage<f32, u8>,
    /// Three visual channels to one RGB image.
    pub composite: BoxedStage<f32, u8>,
    /// Raw sub-frame to 8-bit preview.
    pub preview: BoxedStage<u16, u8>,
}

/// Creates a fresh, independent set of stages for each worker thread.
pub trait StageFactory: Send + Sync {
    fn create_worker(&self) -> WorkerStages;
}
