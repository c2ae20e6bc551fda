//! Conversions module
//!
//! Exports processed images and raw sequences to TIFF files.

mod snapshot_export;

pub use snapshot_export::SnapshotExporter;
