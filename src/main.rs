use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use swir_skin_rs::image_pipeline::acquisition::simulated::{SimulationControl, simulated_devices};
use swir_skin_rs::image_pipeline::{
    AcquisitionConfig, DefaultStageFactory, Frame, FrameListener, ProcessedImage, ProcessorPool,
    SequenceController, SnapshotConfig, SnapshotExporter, TiffCompression,
};
use swir_skin_rs::logger;

use tracing::{error, info};

const RUN_TIME: Duration = Duration::from_secs(3);

#[derive(Default)]
struct LoggingListener {
    frames: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl LoggingListener {
    fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl FrameListener for LoggingListener {
    fn on_new_frame_available(&self, frame: Frame) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 25 == 0 {
            info!(
                frames = count,
                worker = frame.worker(),
                skin_ratio = frame.skin_ratio(),
                "Frames delivered"
            );
        }
    }

    fn on_error(&self, message: &str) {
        error!("Acquisition failed: {}", message);
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_owned());
    }
}

fn main() -> Result<()> {
    logger::init();

    info!("Starting swir_skin...");

    let output_dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    let config = AcquisitionConfig::builder()
        .refresh_rate(25.0)
        .illumination_time(5_000)
        .workers(2)
        .build();
    let (camera, illumination) = simulated_devices(config.geometry, SimulationControl::new());
    let controller = Arc::new(SequenceController::new(camera, illumination, &config));
    let listener = Arc::new(LoggingListener::default());
    let mut pool = ProcessorPool::new(
        Arc::clone(&controller),
        Arc::new(DefaultStageFactory),
        listener.clone(),
        config.geometry,
        config.workers,
    );

    info!(
        refresh_rate_hz = controller.refresh_rate(),
        delay_us = controller.sequence_configuration().delay_us,
        workers = pool.worker_count(),
        "Simulated bench initialized"
    );

    let started = Instant::now();
    pool.start().context("failed to start acquisition")?;
    thread::sleep(RUN_TIME);

    let status = controller.camera_status();
    info!(
        temperature_c = status.sensor_temperature_c,
        packet_loss_percent = status.packet_loss_percent(),
        incomplete_sub_frames = status.incomplete_sub_frames,
        "Camera status"
    );

    let composite = pool
        .processed_image(ProcessedImage::Composite)
        .context("failed to snapshot composite image")?;
    pool.stop();
    let raw = pool.raw_images().context("failed to snapshot raw sequence")?;

    let frames = listener.frames.load(Ordering::Relaxed);
    info!(
        frames,
        frames_per_second = frames as f64 / started.elapsed().as_secs_f64(),
        "Acquisition finished"
    );
    if let Some(message) = listener.failure() {
        bail!("acquisition failed: {message}");
    }

    let exporter = SnapshotExporter::new(
        SnapshotConfig::builder()
            .compression(TiffCompression::DeflateBalanced)
            .predictor(Some(2))
            .build(),
    );
    exporter
        .export_file(&composite, output_dir.join("composite.tiff"))
        .context("failed to write composite snapshot")?;
    exporter
        .export_raw(&raw, &output_dir, "sequence")
        .context("failed to write raw sequence")?;

    info!(output = %output_dir.display(), "Snapshots written");
    Ok(())
}
