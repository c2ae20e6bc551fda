//! Raw sequence data module
//!
//! This module holds the per-sequence raw channel buffers and the blocking
//! frame source interface the processing side pulls them from.

mod source;
pub mod types;

pub use source::FrameSource;
pub use types::{RawFrame, SubFrame, FRAMES_PER_SEQUENCE, MAX_SAMPLE_VALUE, SAMPLE_BITS, WAVEBANDS_NM};
