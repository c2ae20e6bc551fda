//! TIFF writing module
//!
//! Encodes 8-bit display images and 16-bit raw sub-frames as TIFF with
//! optional compression.

mod standard_tiff_writer;
pub mod types;
mod writer;

pub use standard_tiff_writer::StandardTiffWriter;
pub use types::{SnapshotConfig, SnapshotConfigBuilder, TiffCompression};
pub use writer::TiffWriter;
