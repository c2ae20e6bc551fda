use std::io::Write;

use crate::image_pipeline::common::ImagePlane;
use crate::image_pipeline::common::error::Result;
use crate::image_pipeline::tiff::types::SnapshotConfig;

pub trait TiffWriter {
    /// Writes a 1-channel (gray) or 3-channel (RGB) 8-bit image.
    fn write_plane(&self, image: &ImagePlane<u8>, output: &mut dyn Write, config: &SnapshotConfig) -> Result<()>;

    /// Writes a raw sub-frame as 16-bit gray.
    fn write_raw(&self, image: &ImagePlane<u16>, output: &mut dyn Write, config: &SnapshotConfig) -> Result<()>;
}
