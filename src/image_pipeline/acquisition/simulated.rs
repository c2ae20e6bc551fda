//! Simulated camera and illumination controller.
//!
//! The pair shares a trigger channel: every `trigger_sequence` queues one
//! sequence, and the camera's sensor thread renders the four sub-frames with
//! the programmed timing and pushes them to the acquisition sink, the way a
//! real driver calls back from its own thread. The rendered scene is a disk of
//! skin-like reflectance on a spectrally flat background.
//!
//! Faults are scripted through [`SimulationControl`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::image_pipeline::acquisition::device::{
    AcquisitionSink, CameraDevice, CameraStatus, IlluminationController,
};
use crate::image_pipeline::acquisition::sequence::SequenceConfiguration;
use crate::image_pipeline::common::FrameGeometry;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::raw::{FRAMES_PER_SEQUENCE, MAX_SAMPLE_VALUE, SubFrame};

/// Reflectance at 935, 1060 and 1300 nm.
const SKIN_REFLECTANCE: [f32; 3] = [0.55, 0.60, 0.25];
const BACKGROUND_REFLECTANCE: [f32; 3] = [0.35, 0.35, 0.34];
const DARK_LEVEL: u16 = 180;
const FULL_SCALE_SIGNAL: f32 = 3_000.0;
const REFERENCE_EXPOSURE_US: f32 = 4_000.0;
const PACKET_BYTES: usize = 1_500;

#[derive(Debug, Default)]
struct Script {
    fault_at_sequence: Option<(u64, String)>,
    malformed: HashSet<(u64, usize)>,
    stalled: bool,
}

/// Fault injection handle shared with the simulated camera.
#[derive(Debug, Clone, Default)]
pub struct SimulationControl {
    script: Arc<Mutex<Script>>,
}

impl SimulationControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises a device fault instead of delivering sequence `sequence` (1-based).
    pub fn inject_fault_at(&self, sequence: u64, message: impl Into<String>) {
        self.lock().fault_at_sequence = Some((sequence, message.into()));
    }

    /// Delivers sub-frame `index` (0 = dark) of `sequence` as incomplete.
    pub fn corrupt_sub_frame(&self, sequence: u64, index: usize) {
        self.lock().malformed.insert((sequence, index));
    }

    /// A stalled sensor accepts triggers but never delivers.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Command {
    Sequence {
        config: SequenceConfiguration,
        channel_power: [f32; 3],
    },
    Shutdown,
}

#[derive(Debug, Default)]
struct Telemetry {
    packets_received: AtomicU64,
    packets_lost: AtomicU64,
    exposure_time_us: AtomicU32,
    gain_db_bits: AtomicU32,
}

/// Creates a connected camera and illumination controller.
pub fn simulated_devices(
    geometry: FrameGeometry,
    control: SimulationControl,
) -> (SimulatedCamera, SimulatedIllumination) {
    let (commands, receiver) = mpsc::channel();
    let camera = SimulatedCamera {
        geometry,
        control,
        commands: commands.clone(),
        receiver: Some(receiver),
        sensor: None,
        closing: Arc::new(AtomicBool::new(false)),
        telemetry: Arc::new(Telemetry::default()),
        temperature_setpoint_c: 10.0,
    };
    let illumination = SimulatedIllumination {
        commands,
        config: None,
        channel_power: [100.0; 3],
    };
    (camera, illumination)
}

pub struct SimulatedIllumination {
    commands: Sender<Command>,
    config: Option<SequenceConfiguration>,
    channel_power: [f32; 3],
}

impl SimulatedIllumination {
    pub fn configuration(&self) -> Option<SequenceConfiguration> {
        self.config
    }
}

impl IlluminationController for SimulatedIllumination {
    fn configure(&mut self, sequence: &SequenceConfiguration, channel_power: &[f32; 3]) -> Result<()> {
        self.config = Some(*sequence);
        self.channel_power = *channel_power;
        Ok(())
    }

    fn trigger_sequence(&mut self) -> Result<()> {
        let config = self
            .config
            .ok_or_else(|| PipelineError::DeviceFault("illumination controller not configured".into()))?;
        self.commands
            .send(Command::Sequence { config, channel_power: self.channel_power })
            .map_err(|_| PipelineError::DeviceFault("trigger line disconnected".into()))
    }
}

pub struct SimulatedCamera {
    geometry: FrameGeometry,
    control: SimulationControl,
    commands: Sender<Command>,
    /// Held while the stream is closed; lent to the sensor thread while open.
    receiver: Option<Receiver<Command>>,
    sensor: Option<JoinHandle<Receiver<Command>>>,
    closing: Arc<AtomicBool>,
    telemetry: Arc<Telemetry>,
    temperature_setpoint_c: f32,
}

impl CameraDevice for SimulatedCamera {
    fn open_stream(&mut self, sink: Arc<dyn AcquisitionSink>) -> Result<()> {
        if self.sensor.is_some() {
            return Ok(());
        }
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| PipelineError::DeviceFault("sensor link lost".into()))?;
        // Triggers fired while the stream was closed are stale.
        while receiver.try_recv().is_ok() {}

        self.closing.store(false, Ordering::Release);
        let sensor = Sensor {
            geometry: self.geometry,
            closing: Arc::clone(&self.closing),
            control: self.control.clone(),
            telemetry: Arc::clone(&self.telemetry),
            sink,
        };
        let handle = thread::Builder::new()
            .name("simulated-sensor".into())
            .spawn(move || sensor.run(receiver))
            .map_err(|e| PipelineError::ThreadSpawn(e.to_string()))?;
        self.sensor = Some(handle);
        debug!("simulated stream opened");
        Ok(())
    }

    fn close_stream(&mut self) {
        let Some(handle) = self.sensor.take() else {
            return;
        };
        self.closing.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        match handle.join() {
            Ok(receiver) => self.receiver = Some(receiver),
            Err(_) => error!("simulated sensor thread panicked"),
        }
        debug!("simulated stream closed");
    }

    fn set_exposure_time(&mut self, exposure_us: u32) -> Result<()> {
        self.telemetry.exposure_time_us.store(exposure_us, Ordering::Relaxed);
        Ok(())
    }

    fn set_gain(&mut self, gain_db: f32) -> Result<()> {
        self.telemetry.gain_db_bits.store(gain_db.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn set_temperature_setpoint(&mut self, celsius: f32) -> Result<()> {
        self.temperature_setpoint_c = celsius;
        Ok(())
    }

    fn status(&self) -> CameraStatus {
        CameraStatus {
            sensor_temperature_c: self.temperature_setpoint_c + 0.3,
            humidity_percent: 12.0,
            cooling_power_percent: ((25.0 - self.temperature_setpoint_c) * 1.5).clamp(0.0, 100.0),
            packets_received: self.telemetry.packets_received.load(Ordering::Relaxed),
            packets_lost: self.telemetry.packets_lost.load(Ordering::Relaxed),
            incomplete_sub_frames: 0,
        }
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.close_stream();
    }
}

struct Sensor {
    geometry: FrameGeometry,
    closing: Arc<AtomicBool>,
    control: SimulationControl,
    telemetry: Arc<Telemetry>,
    sink: Arc<dyn AcquisitionSink>,
}

impl Sensor {
    fn run(self, receiver: Receiver<Command>) -> Receiver<Command> {
        let mut samples = vec![0u16; self.geometry.pixel_count()];
        let packets_per_image = (samples.len() * 2).div_ceil(PACKET_BYTES) as u64;
        let mut sequence: u64 = 0;

        while let Ok(Command::Sequence { config, channel_power }) = receiver.recv() {
            if self.closing.load(Ordering::Acquire) {
                break;
            }
            sequence += 1;
            let (stalled, fault, malformed) = {
                let script = self.control.lock();
                let fault = match &script.fault_at_sequence {
                    Some((at, message)) if *at == sequence => Some(message.clone()),
                    _ => None,
                };
                let malformed: Vec<usize> = (0..FRAMES_PER_SEQUENCE)
                    .filter(|i| script.malformed.contains(&(sequence, *i)))
                    .collect();
                (script.stalled, fault, malformed)
            };

            if stalled {
                trace!(sequence, "sensor stalled, sequence dropped");
                continue;
            }
            if let Some(message) = fault {
                self.sink.on_device_fault(PipelineError::DeviceFault(message));
                continue;
            }

            let exposure = Duration::from_micros(u64::from(config.illumination_time_us));
            for index in 0..FRAMES_PER_SEQUENCE {
                thread::sleep(exposure);
                if self.closing.load(Ordering::Acquire) {
                    return receiver;
                }
                self.render(index, sequence, &channel_power, &mut samples);
                let (width, height) = (self.geometry.width, self.geometry.height);
                if malformed.contains(&index) {
                    self.telemetry.packets_lost.fetch_add(1, Ordering::Relaxed);
                    self.telemetry
                        .packets_received
                        .fetch_add(packets_per_image - 1, Ordering::Relaxed);
                    self.sink.on_sub_frame(SubFrame::incomplete(width, height, &samples));
                } else {
                    self.telemetry
                        .packets_received
                        .fetch_add(packets_per_image, Ordering::Relaxed);
                    self.sink.on_sub_frame(SubFrame::new(width, height, &samples));
                }
            }
            thread::sleep(Duration::from_micros(u64::from(config.delay_us)));
        }
        receiver
    }

    fn signal_scale(&self) -> f32 {
        let exposure = self.telemetry.exposure_time_us.load(Ordering::Relaxed) as f32;
        let gain_db = f32::from_bits(self.telemetry.gain_db_bits.load(Ordering::Relaxed));
        let exposure = if exposure > 0.0 { exposure } else { REFERENCE_EXPOSURE_US };
        (exposure / REFERENCE_EXPOSURE_US) * 10f32.powf(gain_db / 20.0)
    }

    /// Renders sub-frame `index` (0 = dark) into `samples`.
    fn render(&self, index: usize, sequence: u64, channel_power: &[f32; 3], samples: &mut [u16]) {
        let FrameGeometry { width, height } = self.geometry;
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius_sq = (width.min(height) as f32 / 4.0).powi(2);
        let scale = self.signal_scale();
        let mut noise = NoiseSource::new(sequence.wrapping_mul(31).wrapping_add(index as u64));

        for (i, sample) in samples.iter_mut().enumerate() {
            let (x, y) = ((i % width) as f32, (i / width) as f32);
            let dark = f32::from(DARK_LEVEL) + noise.next();
            let value = if index == 0 {
                dark
            } else {
                let band = index - 1;
                let on_skin = (x - cx).powi(2) + (y - cy).powi(2) <= radius_sq;
                let reflectance = if on_skin {
                    SKIN_REFLECTANCE[band]
                } else {
                    BACKGROUND_REFLECTANCE[band]
                };
                dark + reflectance * (channel_power[band] / 100.0) * FULL_SCALE_SIGNAL * scale
            };
            *sample = value.round().clamp(0.0, f32::from(MAX_SAMPLE_VALUE)) as u16;
        }
    }
}

/// Small noise in [-2, 2], seeded from the sequence number and sub-frame
/// index so that a given sequence always renders the same scene.
struct NoiseSource(u64);

impl NoiseSource {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 61) as f32) * 4.0 / 7.0 - 2.0
    }
}
