//! Processing module
//!
//! A fixed stage sequence run by per-thread pipeline workers, and the pool
//! that drives them from a shared frame source and serializes result delivery.

mod frame;
mod parameters;
mod pool;
mod stage;
pub mod stages;
mod worker;


pub use frame::{Frame, OutputPools, ProcessedImage};
pub use parameters::ProcessingParameters;
pub use pool::{FrameListener, ProcessorPool};
pub use stage::{BoxedStage, Stage, StageContext, StageFactory, WorkerStages};
pub use stages::DefaultStageFactory;
pub use worker::PipelineWorker;
