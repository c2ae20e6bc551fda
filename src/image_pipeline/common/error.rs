use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Device fault: {0}")]
    DeviceFault(String),

    #[error("No complete sequence received within {0:?}")]
    AcquisitionTimeout(Duration),

    #[error("Acquisition stopped")]
    Stopped,

    #[error("Pipeline stage '{stage}' failed: {message}")]
    StageFailed { stage: &'static str, message: String },

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("Buffer size mismatch: expected {expected} samples, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid channel index: {0}")]
    InvalidChannel(usize),

    #[error("Operation requires a stopped processor pool")]
    PoolRunning,

    #[error("No completed frame available for reprocessing")]
    NoFrameAvailable,

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("Failed to encode TIFF image: {0}")]
    EncodeError(String),

    #[error("Failed to write output file: {0}")]
    OutputWriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Faults that end an acquisition session, as opposed to an interrupted wait.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Stopped)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
