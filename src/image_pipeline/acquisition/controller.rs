//! Sequencing of the illumination controller and camera.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::image_pipeline::acquisition::config::AcquisitionConfig;
use crate::image_pipeline::acquisition::device::{
    AcquisitionSink, CameraDevice, CameraStatus, IlluminationController,
};
use crate::image_pipeline::acquisition::sequence::{SequenceConfiguration, SequenceTiming};
use crate::image_pipeline::acquisition::synchronizer::FrameSynchronizer;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::raw::{FrameSource, RawFrame};

struct Devices<C, L> {
    camera: C,
    illumination: L,
    timing: SequenceTiming,
    exposure_time_us: u32,
    gain_db: f32,
    temperature_setpoint_c: f32,
    channel_power: [f32; 3],
    streaming: bool,
    sequences_triggered: u64,
}

impl<C: CameraDevice, L: IlluminationController> Devices<C, L> {
    fn trigger(&mut self) -> Result<()> {
        self.illumination.trigger_sequence()?;
        self.sequences_triggered += 1;
        Ok(())
    }

    fn push_settings(&mut self) -> Result<()> {
        self.camera.set_exposure_time(self.exposure_time_us)?;
        self.camera.set_gain(self.gain_db)?;
        self.camera.set_temperature_setpoint(self.temperature_setpoint_c)?;
        self.illumination
            .configure(&self.timing.configuration(), &self.channel_power)
    }
}

/// Frame source that triggers sequence N+1 before reading sequence N.
///
/// One mutex guards both device handles, the timing parameters and the
/// trigger-then-read step, so the devices are never reconfigured in the middle
/// of a sequence. Setters therefore wait for an in-progress read to finish.
pub struct SequenceController<C, L> {
    devices: Mutex<Devices<C, L>>,
    synchronizer: Arc<FrameSynchronizer>,
    frame_timeout: Duration,
}

impl<C: CameraDevice, L: IlluminationController> SequenceController<C, L> {
    pub fn new(camera: C, illumination: L, config: &AcquisitionConfig) -> Self {
        let timing = config.timing();
        Self {
            devices: Mutex::new(Devices {
                camera,
                illumination,
                timing,
                exposure_time_us: AcquisitionConfig::clamp_exposure(
                    config.exposure_time_us,
                    timing.illumination_time(),
                ),
                gain_db: AcquisitionConfig::clamp_gain(config.gain_db),
                temperature_setpoint_c: AcquisitionConfig::clamp_temperature_setpoint(
                    config.temperature_setpoint_c,
                ),
                channel_power: config.channel_power.map(AcquisitionConfig::clamp_channel_power),
                streaming: false,
                sequences_triggered: 0,
            }),
            synchronizer: Arc::new(FrameSynchronizer::new(config.geometry)),
            frame_timeout: config.frame_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Devices<C, L>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn synchronizer(&self) -> &Arc<FrameSynchronizer> {
        &self.synchronizer
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Returns the rate actually applied after clamping.
    pub fn set_refresh_rate(&self, refresh_rate_hz: f64) -> Result<f64> {
        let mut devices = self.lock();
        let applied = devices.timing.set_refresh_rate(refresh_rate_hz);
        let sequence = devices.timing.configuration();
        let power = devices.channel_power;
        devices.illumination.configure(&sequence, &power)?;
        Ok(applied)
    }

    pub fn refresh_rate(&self) -> f64 {
        self.lock().timing.refresh_rate()
    }

    /// Returns the illumination time actually applied. May lower the refresh
    /// rate and the exposure time to keep them consistent.
    pub fn set_illumination_time(&self, illumination_time_us: u32) -> Result<u32> {
        let mut devices = self.lock();
        let applied = devices.timing.set_illumination_time(illumination_time_us);
        if devices.exposure_time_us > applied {
            devices.exposure_time_us = applied;
            devices.camera.set_exposure_time(applied)?;
        }
        let sequence = devices.timing.configuration();
        let power = devices.channel_power;
        devices.illumination.configure(&sequence, &power)?;
        Ok(applied)
    }

    pub fn illumination_time(&self) -> u32 {
        self.lock().timing.illumination_time()
    }

    pub fn sequence_configuration(&self) -> SequenceConfiguration {
        self.lock().timing.configuration()
    }

    pub fn set_exposure_time(&self, exposure_time_us: u32) -> Result<u32> {
        let mut devices = self.lock();
        let applied =
            AcquisitionConfig::clamp_exposure(exposure_time_us, devices.timing.illumination_time());
        devices.camera.set_exposure_time(applied)?;
        devices.exposure_time_us = applied;
        Ok(applied)
    }

    pub fn exposure_time(&self) -> u32 {
        self.lock().exposure_time_us
    }

    pub fn set_gain(&self, gain_db: f32) -> Result<f32> {
        let mut devices = self.lock();
        let applied = AcquisitionConfig::clamp_gain(gain_db);
        devices.camera.set_gain(applied)?;
        devices.gain_db = applied;
        Ok(applied)
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain_db
    }

    pub fn set_temperature_setpoint(&self, celsius: f32) -> Result<f32> {
        let mut devices = self.lock();
        let applied = AcquisitionConfig::clamp_temperature_setpoint(celsius);
        devices.camera.set_temperature_setpoint(applied)?;
        devices.temperature_setpoint_c = applied;
        Ok(applied)
    }

    pub fn temperature_setpoint(&self) -> f32 {
        self.lock().temperature_setpoint_c
    }

    /// Sets the light source power of one waveband (0..3).
    pub fn set_channel_power(&self, channel: usize, percent: f32) -> Result<f32> {
        let mut devices = self.lock();
        if channel >= devices.channel_power.len() {
            return Err(PipelineError::InvalidChannel(channel));
        }
        let applied = AcquisitionConfig::clamp_channel_power(percent);
        devices.channel_power[channel] = applied;
        let sequence = devices.timing.configuration();
        let power = devices.channel_power;
        devices.illumination.configure(&sequence, &power)?;
        Ok(applied)
    }

    pub fn channel_power(&self) -> [f32; 3] {
        self.lock().channel_power
    }

    /// Polls the camera telemetry.
    pub fn camera_status(&self) -> CameraStatus {
        let mut status = self.lock().camera.status();
        status.incomplete_sub_frames = self.synchronizer.incomplete_score();
        status
    }

    fn arm(&self, devices: &mut Devices<C, L>) -> Result<()> {
        devices.push_settings()?;
        let sink: Arc<dyn AcquisitionSink> = self.synchronizer.clone();
        devices.camera.open_stream(sink)?;
        devices.streaming = true;
        // Prime the pipeline so the first read already overlaps a trigger.
        devices.trigger()
    }

    fn read_timeout(&self, timing: &SequenceTiming) -> Duration {
        self.frame_timeout + timing.period() * 2
    }
}

impl<C: CameraDevice, L: IlluminationController> FrameSource for SequenceController<C, L> {
    #[instrument(skip(self))]
    fn start(&self) -> Result<()> {
        let mut devices = self.lock();
        if devices.streaming {
            return Ok(());
        }

        self.synchronizer.start();
        devices.sequences_triggered = 0;

        if let Err(err) = self.arm(&mut devices) {
            warn!(%err, "failed to start acquisition");
            self.synchronizer.stop();
            if devices.streaming {
                devices.camera.close_stream();
                devices.streaming = false;
            }
            return Err(err);
        }

        info!(
            refresh_rate_hz = devices.timing.refresh_rate(),
            illumination_time_us = devices.timing.illumination_time(),
            delay_us = devices.timing.configuration().delay_us,
            "acquisition started"
        );
        Ok(())
    }

    fn stop(&self) {
        // Wake a reader blocked under the device lock before taking the lock.
        self.synchronizer.stop();

        let mut devices = self.lock();
        if devices.streaming {
            devices.camera.close_stream();
            devices.streaming = false;
            info!(triggered = devices.sequences_triggered, "acquisition stopped");
        }
    }

    fn next_frame(&self, out: &mut RawFrame) -> Result<()> {
        let mut devices = self.lock();
        if !devices.streaming {
            return Err(PipelineError::Stopped);
        }

        // Keep one sequence in flight beyond the one about to be read. A
        // discarded sequence leaves a gap that is refilled here.
        let target: u64 = if self.synchronizer.has_complete_sequence() { 1 } else { 2 };
        let in_flight = devices
            .sequences_triggered
            .saturating_sub(self.synchronizer.sequences_received());
        for _ in 0..target.saturating_sub(in_flight).max(1) {
            devices.trigger()?;
        }

        let timeout = self.read_timeout(&devices.timing);
        let result = self.synchronizer.next_frame(out, Some(timeout));
        if let Err(err) = &result {
            debug!(%err, "sequence read failed");
        }
        result
    }
}
