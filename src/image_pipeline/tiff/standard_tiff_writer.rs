use std::io::{Cursor, Write};

use tiff::encoder::colortype::{ColorType, Gray8, Gray16, RGB8};
use tiff::encoder::compression::DeflateLevel;
use tiff::encoder::{Compression, TiffEncoder, TiffValue};
use tiff::tags::Predictor;
use tracing::debug;

use crate::image_pipeline::common::ImagePlane;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::tiff::types::{SnapshotConfig, TiffCompression};
use crate::image_pipeline::tiff::writer::TiffWriter;

pub struct StandardTiffWriter;

fn compression(config: &SnapshotConfig) -> Compression {
    match config.compression {
        TiffCompression::None => Compression::Uncompressed,
        TiffCompression::Lzw => Compression::Lzw,
        TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
        TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
        TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
    }
}

fn check_samples<T>(image: &ImagePlane<T>) -> Result<()> {
    if image.width == 0 || image.height == 0 {
        return Err(PipelineError::InvalidDimensions(image.width, image.height));
    }
    let expected = image.width * image.height * image.channels;
    if image.data.len() != expected {
        return Err(PipelineError::BufferSizeMismatch {
            expected,
            actual: image.data.len(),
        });
    }
    Ok(())
}

fn encode<C>(
    width: usize,
    height: usize,
    data: &[C::Inner],
    output: &mut dyn Write,
    config: &SnapshotConfig,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
{
    debug!("Encoding TIFF image: {}x{}", width, height);

    let mut buffer = Vec::new();
    let mut encoder = TiffEncoder::new(Cursor::new(&mut buffer))
        .map_err(|e| PipelineError::EncodeError(e.to_string()))?
        .with_compression(compression(config));

    if let Some(predictor_val) = config.predictor {
        let predictor = match predictor_val {
            2 => Predictor::Horizontal,
            _ => Predictor::None,
        };
        encoder = encoder.with_predictor(predictor);
    }

    encoder
        .write_image::<C>(width as u32, height as u32, data)
        .map_err(|e| PipelineError::EncodeError(e.to_string()))?;

    output.write_all(&buffer)?;

    debug!(bytes = buffer.len(), "TIFF encoding complete");
    Ok(())
}

impl TiffWriter for StandardTiffWriter {
    fn write_plane(&self, image: &ImagePlane<u8>, output: &mut dyn Write, config: &SnapshotConfig) -> Result<()> {
        check_samples(image)?;
        match image.channels {
            1 => encode::<Gray8>(image.width, image.height, &image.data, output, config),
            3 => encode::<RGB8>(image.width, image.height, &image.data, output, config),
            n => Err(PipelineError::EncodeError(format!("unsupported channel count {n}"))),
        }
    }

    fn write_raw(&self, image: &ImagePlane<u16>, output: &mut dyn Write, config: &SnapshotConfig) -> Result<()> {
        check_samples(image)?;
        if image.channels != 1 {
            return Err(PipelineError::EncodeError(format!(
                "raw planes have one channel, got {}",
                image.channels
            )));
        }
        encode::<Gray16>(image.width, image.height, &image.data, output, config)
    }
}
