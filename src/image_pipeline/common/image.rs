//! Image plane container

use crate::image_pipeline::common::error::{PipelineError, Result};

/// Sensor resolution shared by every plane of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl FrameGeometry {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions(width, height));
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self { width: 640, height: 512 }
    }
}

/// A fixed-size image with interleaved channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlane<T> {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
    /// Samples per pixel (1 for gray, 3 for RGB)
    pub channels: usize,
    /// Pixel data, row-major, channels interleaved
    pub data: Vec<T>,
}

impl<T: Copy + Default> ImagePlane<T> {
    pub fn new(geometry: FrameGeometry, channels: usize) -> Self {
        Self {
            width: geometry.width,
            height: geometry.height,
            channels,
            data: vec![T::default(); geometry.pixel_count() * channels],
        }
    }

    pub fn gray(geometry: FrameGeometry) -> Self {
        Self::new(geometry, 1)
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry { width: self.width, height: self.height }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrites this plane with `samples` without reallocating.
    pub fn copy_from_slice(&mut self, samples: &[T]) -> Result<()> {
        if samples.len() != self.data.len() {
            return Err(PipelineError::BufferSizeMismatch {
                expected: self.data.len(),
                actual: samples.len(),
            });
        }
        self.data.copy_from_slice(samples);
        Ok(())
    }

    pub fn copy_from(&mut self, other: &ImagePlane<T>) -> Result<()> {
        self.copy_from_slice(&other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_geometry_rejected() {
        assert!(matches!(
            FrameGeometry::new(0, 10),
            Err(PipelineError::InvalidDimensions(0, 10))
        ));
    }

    #[test]
    fn test_copy_from_slice_checks_length() {
        let geometry = FrameGeometry::new(4, 2).unwrap();
        let mut plane = ImagePlane::<u16>::gray(geometry);

        assert!(plane.copy_from_slice(&[7u16; 8]).is_ok());
        assert_eq!(plane.data, vec![7u16; 8]);

        let err = plane.copy_from_slice(&[1u16; 3]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferSizeMismatch { expected: 8, actual: 3 }
        ));
    }

    #[test]
    fn test_rgb_plane_size() {
        let geometry = FrameGeometry::new(5, 3).unwrap();
        let plane = ImagePlane::<u8>::new(geometry, 3);
        assert_eq!(plane.len(), 45);
        assert_eq!(plane.geometry(), geometry);
    }
}
