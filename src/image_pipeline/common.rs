//! Common utilities module
//!
//! This module contains the error type and the image plane container shared
//! across acquisition and processing.

pub mod error;
pub mod image;

pub use error::{PipelineError, Result};
pub use image::{FrameGeometry, ImagePlane};
