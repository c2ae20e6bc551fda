//! Multispectral skin detection pipeline
//!
//! Acquisition of dark + three-waveband sequences from a triggered camera,
//! a pool of pipeline workers classifying each sequence, and TIFF export of
//! the results.

pub mod acquisition;
pub mod common;
pub mod conversions;
pub mod memory;
pub mod processing;
pub mod raw;
pub mod tiff;

pub use common::{FrameGeometry, ImagePlane, PipelineError, Result};

pub use raw::{FrameSource, RawFrame, SubFrame};

pub use acquisition::{AcquisitionConfig, CameraStatus, SequenceController};

pub use processing::{
    DefaultStageFactory, Frame, FrameListener, PipelineWorker, ProcessedImage, ProcessingParameters,
    ProcessorPool,
};

pub use memory::{BufferPool, PoolStats, Pooled};

pub use tiff::{SnapshotConfig, StandardTiffWriter, TiffCompression, TiffWriter};

pub use conversions::SnapshotExporter;
