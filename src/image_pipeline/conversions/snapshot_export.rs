use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::image_pipeline::common::ImagePlane;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::raw::{FRAMES_PER_SEQUENCE, RawFrame, WAVEBANDS_NM};
use crate::image_pipeline::tiff::{SnapshotConfig, StandardTiffWriter, TiffWriter};

/// Writes snapshots taken from a `ProcessorPool` to disk.
pub struct SnapshotExporter<W: TiffWriter> {
    writer: W,
    config: SnapshotConfig,
}

impl SnapshotExporter<StandardTiffWriter> {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            writer: StandardTiffWriter,
            config,
        }
    }
}

fn create_file(path: &Path) -> Result<BufWriter<std::fs::File>> {
    let _span = tracing::debug_span!("create_output_file").entered();
    std::fs::File::create(path)
        .map(BufWriter::new)
        .map_err(|e| PipelineError::OutputWriteError(format!("{}: {}", path.display(), e)))
}

fn finish(mut file: BufWriter<std::fs::File>, path: &Path) -> Result<()> {
    file.flush()
        .map_err(|e| PipelineError::OutputWriteError(format!("{}: {}", path.display(), e)))
}

/// File name suffix of each acquisition index.
fn plane_suffix(index: usize) -> String {
    match index {
        0 => "dark".to_owned(),
        i => format!("{}nm", WAVEBANDS_NM[i - 1]),
    }
}

impl<W: TiffWriter> SnapshotExporter<W> {
    pub fn with_custom(writer: W, config: SnapshotConfig) -> Self {
        Self { writer, config }
    }

    pub fn export(&self, image: &ImagePlane<u8>, output: &mut dyn Write) -> Result<()> {
        let _span = tracing::debug_span!("encode_tiff", width = image.width, height = image.height).entered();
        self.writer.write_plane(image, output, &self.config)
    }

    #[instrument(skip(self, image, path))]
    pub fn export_file<P: AsRef<Path>>(&self, image: &ImagePlane<u8>, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = create_file(path)?;
        self.export(image, &mut file)?;
        finish(file, path)?;
        info!(output = %path.display(), channels = image.channels, "Snapshot written");
        Ok(())
    }

    /// Writes the four sub-frames as `<stem>_dark.tiff`, `<stem>_935nm.tiff`
    /// and so on into `directory`. Returns the written paths in acquisition
    /// order.
    #[instrument(skip(self, raw, directory))]
    pub fn export_raw<P: AsRef<Path>>(&self, raw: &RawFrame, directory: P, stem: &str) -> Result<Vec<PathBuf>> {
        let directory = directory.as_ref();
        let mut written = Vec::with_capacity(FRAMES_PER_SEQUENCE);
        for index in 0..FRAMES_PER_SEQUENCE {
            let path = directory.join(format!("{stem}_{}.tiff", plane_suffix(index)));
            let mut file = create_file(&path)?;
            {
                let _span = tracing::debug_span!("encode_tiff", index).entered();
                self.writer.write_raw(raw.plane(index), &mut file, &self.config)?;
            }
            finish(file, &path)?;
            written.push(path);
        }
        info!(directory = %directory.display(), stem, "Raw sequence written");
        Ok(written)
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SnapshotConfig) {
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::image_pipeline::common::FrameGeometry;
    use crate::image_pipeline::tiff::TiffCompression;

    fn geometry() -> FrameGeometry {
        FrameGeometry { width: 8, height: 5 }
    }

    #[derive(Default)]
    struct MockWriter {
        planes: RefCell<Vec<usize>>,
        raw_planes: RefCell<Vec<u16>>,
    }

    impl TiffWriter for MockWriter {
        fn write_plane(&self, image: &ImagePlane<u8>, output: &mut dyn Write, _config: &SnapshotConfig) -> Result<()> {
            self.planes.borrow_mut().push(image.channels);
            output.write_all(b"mock")?;
            Ok(())
        }

        fn write_raw(&self, image: &ImagePlane<u16>, output: &mut dyn Write, _config: &SnapshotConfig) -> Result<()> {
            self.raw_planes.borrow_mut().push(image.data[0]);
            output.write_all(b"raw")?;
            Ok(())
        }
    }

    #[test]
    fn test_export_file_writes_decodable_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("composite.tiff");
        let mut image = ImagePlane::<u8>::new(geometry(), 3);
        image.data.fill(17);

        let exporter = SnapshotExporter::new(SnapshotConfig::builder().compression(TiffCompression::Lzw).build());
        exporter.export_file(&image, &path).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut decoder = tiff::decoder::Decoder::new(std::io::BufReader::new(file)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (8, 5));
        assert_eq!(decoder.colortype().unwrap(), tiff::ColorType::RGB(8));
    }

    #[test]
    fn test_export_raw_names_planes_by_waveband() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = RawFrame::new(geometry());
        for index in 0..FRAMES_PER_SEQUENCE {
            raw.plane_mut(index).data.fill(index as u16 * 1000);
        }

        let exporter = SnapshotExporter::with_custom(MockWriter::default(), SnapshotConfig::default());
        let paths = exporter.export_raw(&raw, dir.path(), "seq").unwrap();

        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["seq_dark.tiff", "seq_935nm.tiff", "seq_1060nm.tiff", "seq_1300nm.tiff"]);
        assert_eq!(*exporter.writer.raw_planes.borrow(), [0, 1000, 2000, 3000]);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"raw");
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("mask.tiff");
        let image = ImagePlane::<u8>::new(geometry(), 1);

        let exporter = SnapshotExporter::with_custom(MockWriter::default(), SnapshotConfig::default());
        let result = exporter.export_file(&image, &path);
        assert!(matches!(result, Err(PipelineError::OutputWriteError(_))));
        assert!(exporter.writer.planes.borrow().is_empty());
    }
}
