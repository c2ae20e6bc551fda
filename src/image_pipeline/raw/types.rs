//! Raw sequence data types

use crate::image_pipeline::common::{FrameGeometry, ImagePlane};

/// Sub-frames captured per sequence: one dark reference plus three wavebands.
pub const FRAMES_PER_SEQUENCE: usize = 4;

/// Effective sensor precision. Samples are widened to `u16`.
pub const SAMPLE_BITS: u32 = 12;

pub const MAX_SAMPLE_VALUE: u16 = (1 << SAMPLE_BITS) - 1;

/// Center wavelengths of the three illuminated channels, in nanometers.
pub const WAVEBANDS_NM: [u32; 3] = [935, 1060, 1300];

/// The four sample buffers of one sequence.
///
/// Index 0 is the dark reference (no illumination), 1..=3 are the wavebands
/// in `WAVEBANDS_NM` order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub dark: ImagePlane<u16>,
    pub channels: [ImagePlane<u16>; 3],
}

impl RawFrame {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            dark: ImagePlane::gray(geometry),
            channels: [
                ImagePlane::gray(geometry),
                ImagePlane::gray(geometry),
                ImagePlane::gray(geometry),
            ],
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.dark.geometry()
    }

    /// Sub-frame by acquisition index (0 = dark).
    pub fn plane(&self, index: usize) -> &ImagePlane<u16> {
        match index {
            0 => &self.dark,
            i => &self.channels[i - 1],
        }
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut ImagePlane<u16> {
        match index {
            0 => &mut self.dark,
            i => &mut self.channels[i - 1],
        }
    }

    /// Copies all four planes from `other` without reallocating.
    pub fn copy_from(&mut self, other: &RawFrame) -> crate::image_pipeline::Result<()> {
        self.dark.copy_from(&other.dark)?;
        for (dst, src) in self.channels.iter_mut().zip(other.channels.iter()) {
            dst.copy_from(src)?;
        }
        Ok(())
    }
}

/// One sub-image as delivered by the camera driver on its notification thread.
#[derive(Debug, Clone, Copy)]
pub struct SubFrame<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u16],
    /// False when the driver reports lost packets for this image.
    pub complete: bool,
}

impl<'a> SubFrame<'a> {
    pub fn new(width: usize, height: usize, data: &'a [u16]) -> Self {
        Self { width, height, data, complete: true }
    }

    pub fn incomplete(width: usize, height: usize, data: &'a [u16]) -> Self {
        Self { width, height, data, complete: false }
    }

    /// A sub-frame is usable when it is complete and matches the sensor geometry.
    pub fn is_well_formed(&self, geometry: FrameGeometry) -> bool {
        self.complete
            && self.width == geometry.width
            && self.height == geometry.height
            && self.data.len() == geometry.pixel_count()
    }
}
