//! Result frame handed to the listener.

use std::fmt;
use std::sync::Arc;

use crate::image_pipeline::common::{FrameGeometry, ImagePlane};
use crate::image_pipeline::memory::{BufferPool, PoolStats, Pooled};

pub(crate) type PooledImage = Pooled<ImagePlane<u8>>;

/// Pools backing the output images of every frame.
///
/// Shared by all workers; images return here when the last clone of the
/// `Frame` holding them is dropped.
#[derive(Clone)]
pub struct OutputPools {
    gray: BufferPool<ImagePlane<u8>>,
    rgb: BufferPool<ImagePlane<u8>>,
}

/// Gray images per frame: four raw previews, three visual channels, one mask.
const GRAY_IMAGES_PER_FRAME: usize = 8;

impl OutputPools {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            gray: BufferPool::new("gray_output", move || ImagePlane::new(geometry, 1)),
            rgb: BufferPool::new("rgb_output", move || ImagePlane::new(geometry, 3)),
        }
    }

    /// Warms the pools for `frames` frames alive at the same time.
    pub fn preallocate(&self, frames: usize) {
        self.gray.preallocate(frames * GRAY_IMAGES_PER_FRAME);
        self.rgb.preallocate(frames);
    }

    pub(crate) fn acquire_gray(&self) -> PooledImage {
        self.gray.acquire()
    }

    pub(crate) fn acquire_rgb(&self) -> PooledImage {
        self.rgb.acquire()
    }

    pub fn gray_stats(&self) -> PoolStats {
        self.gray.stats()
    }

    pub fn rgb_stats(&self) -> PoolStats {
        self.rgb.stats()
    }
}

/// Selects one image of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedImage {
    /// Raw preview by acquisition index: 0 = dark, 1..=3 = wavebands.
    RawPreview(usize),
    /// Processed waveband 0..3.
    Visual(usize),
    Composite,
    SkinMask,
}

pub(crate) struct FrameImages {
    pub raw_previews: [PooledImage; 4],
    pub visual: [PooledImage; 3],
    pub composite: PooledImage,
    pub skin_mask: PooledImage,
    pub skin_ratio: f32,
    pub worker: usize,
}

/// One processed sequence. Immutable; clones share the same images.
#[derive(Clone)]
pub struct Frame {
    images: Arc<FrameImages>,
}

impl Frame {
    pub(crate) fn new(images: FrameImages) -> Self {
        Self { images: Arc::new(images) }
    }

    pub fn raw_preview(&self, index: usize) -> Option<&ImagePlane<u8>> {
        self.images.raw_previews.get(index).map(|p| &**p)
    }

    pub fn visual_channel(&self, band: usize) -> Option<&ImagePlane<u8>> {
        self.images.visual.get(band).map(|p| &**p)
    }

    /// False-color RGB image.
    pub fn composite(&self) -> &ImagePlane<u8> {
        &self.images.composite
    }

    /// 255 where skin was detected, 0 elsewhere.
    pub fn skin_mask(&self) -> &ImagePlane<u8> {
        &self.images.skin_mask
    }

    /// Fraction of pixels classified as skin, in [0, 1].
    pub fn skin_ratio(&self) -> f32 {
        self.images.skin_ratio
    }

    /// Index of the worker that produced this frame.
    pub fn worker(&self) -> usize {
        self.images.worker
    }

    pub fn image(&self, kind: ProcessedImage) -> Option<&ImagePlane<u8>> {
        match kind {
            ProcessedImage::RawPreview(i) => self.raw_preview(i),
            ProcessedImage::Visual(i) => self.visual_channel(i),
            ProcessedImage::Composite => Some(self.composite()),
            ProcessedImage::SkinMask => Some(self.skin_mask()),
        }
    }
}

/// Frames compare by content.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&*self.images, &*other.images);
        a.skin_ratio.to_bits() == b.skin_ratio.to_bits()
            && a.raw_previews.iter().zip(&b.raw_previews).all(|(x, y)| **x == **y)
            && a.visual.iter().zip(&b.visual).all(|(x, y)| **x == **y)
            && *a.composite == *b.composite
            && *a.skin_mask == *b.skin_mask
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let geometry = self.images.composite.geometry();
        f.debug_struct("Frame")
            .field("width", &geometry.width)
            .field("height", &geometry.height)
            .field("skin_ratio", &self.images.skin_ratio)
            .field("worker", &self.images.worker)
            .finish()
    }
}
