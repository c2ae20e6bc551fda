//! Acquisition configuration types

use std::fmt::Debug;
use std::time::Duration;

use tracing::warn;

use crate::image_pipeline::acquisition::sequence::SequenceTiming;
use crate::image_pipeline::common::FrameGeometry;

pub const MIN_EXPOSURE_TIME_US: u32 = 50;
pub const MIN_GAIN_DB: f32 = 0.0;
pub const MAX_GAIN_DB: f32 = 24.0;
pub const MIN_TEMPERATURE_SETPOINT_C: f32 = -40.0;
pub const MAX_TEMPERATURE_SETPOINT_C: f32 = 25.0;
pub const MAX_CHANNEL_POWER_PERCENT: f32 = 100.0;
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 4;

/// Clamps `value` into `[min, max]`, logging when the request was out of range.
/// Unordered values (NaN) fall back to `min`.
pub(crate) fn clamp_with_warning<T>(name: &'static str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + Debug,
{
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    let clamped = if !(value >= min) {
        min
    } else if value > max {
        max
    } else {
        return value;
    };
    warn!(parameter = name, requested = ?value, applied = ?clamped, "parameter out of range, clamped");
    clamped
}

/// Configuration for one acquisition session
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Target sequences per second
    pub refresh_rate_hz: f64,
    /// Duration of each of the four exposures of a sequence
    pub illumination_time_us: u32,
    /// Camera exposure, at most the illumination time
    pub exposure_time_us: u32,
    pub gain_db: f32,
    /// Sensor cooling target
    pub temperature_setpoint_c: f32,
    /// Light source power per waveband, in percent
    pub channel_power: [f32; 3],
    pub geometry: FrameGeometry,
    /// Number of pipeline worker threads
    pub workers: usize,
    /// Extra time a blocked read waits beyond two sequence periods before
    /// declaring the device dead
    pub frame_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 25.0,
            illumination_time_us: 5_000,
            exposure_time_us: 4_000,
            gain_db: 0.0,
            temperature_setpoint_c: 10.0,
            channel_power: [100.0; 3],
            geometry: FrameGeometry::default(),
            workers: 2,
            frame_timeout: Duration::from_secs(2),
        }
    }
}

impl AcquisitionConfig {
    pub fn builder() -> AcquisitionConfigBuilder {
        AcquisitionConfigBuilder::default()
    }

    pub fn timing(&self) -> SequenceTiming {
        SequenceTiming::new(self.refresh_rate_hz, self.illumination_time_us)
    }

    pub(crate) fn clamp_exposure(exposure_time_us: u32, illumination_time_us: u32) -> u32 {
        clamp_with_warning(
            "exposure_time_us",
            exposure_time_us,
            MIN_EXPOSURE_TIME_US,
            illumination_time_us,
        )
    }

    pub(crate) fn clamp_gain(gain_db: f32) -> f32 {
        clamp_with_warning("gain_db", gain_db, MIN_GAIN_DB, MAX_GAIN_DB)
    }

    pub(crate) fn clamp_temperature_setpoint(celsius: f32) -> f32 {
        clamp_with_warning(
            "temperature_setpoint_c",
            celsius,
            MIN_TEMPERATURE_SETPOINT_C,
            MAX_TEMPERATURE_SETPOINT_C,
        )
    }

    pub(crate) fn clamp_channel_power(percent: f32) -> f32 {
        clamp_with_warning("channel_power", percent, 0.0, MAX_CHANNEL_POWER_PERCENT)
    }
}

/// Builder for AcquisitionConfig. `build()` clamps every field to its range.
#[derive(Default)]
pub struct AcquisitionConfigBuilder {
    refresh_rate_hz: Option<f64>,
    illumination_time_us: Option<u32>,
    exposure_time_us: Option<u32>,
    gain_db: Option<f32>,
    temperature_setpoint_c: Option<f32>,
    channel_power: Option<[f32; 3]>,
    geometry: Option<FrameGeometry>,
    workers: Option<usize>,
    frame_timeout: Option<Duration>,
}

impl AcquisitionConfigBuilder {
    pub fn refresh_rate(mut self, hz: f64) -> Self {
        self.refresh_rate_hz = Some(hz);
        self
    }

    pub fn illumination_time(mut self, us: u32) -> Self {
        self.illumination_time_us = Some(us);
        self
    }

    pub fn exposure_time(mut self, us: u32) -> Self {
        self.exposure_time_us = Some(us);
        self
    }

    pub fn gain(mut self, db: f32) -> Self {
        self.gain_db = Some(db);
        self
    }

    pub fn temperature_setpoint(mut self, celsius: f32) -> Self {
        self.temperature_setpoint_c = Some(celsius);
        self
    }

    pub fn channel_power(mut self, percent: [f32; 3]) -> Self {
        self.channel_power = Some(percent);
        self
    }

    pub fn geometry(mut self, geometry: FrameGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> AcquisitionConfig {
        let default = AcquisitionConfig::default();
        let timing = SequenceTiming::new(
            self.refresh_rate_hz.unwrap_or(default.refresh_rate_hz),
            self.illumination_time_us.unwrap_or(default.illumination_time_us),
        );
        let illumination_time_us = timing.illumination_time();
        let channel_power = self
            .channel_power
            .unwrap_or(default.channel_power)
            .map(AcquisitionConfig::clamp_channel_power);

        AcquisitionConfig {
            refresh_rate_hz: timing.refresh_rate(),
            illumination_time_us,
            exposure_time_us: AcquisitionConfig::clamp_exposure(
                self.exposure_time_us
                    .unwrap_or(default.exposure_time_us.min(illumination_time_us)),
                illumination_time_us,
            ),
            gain_db: AcquisitionConfig::clamp_gain(self.gain_db.unwrap_or(default.gain_db)),
            temperature_setpoint_c: AcquisitionConfig::clamp_temperature_setpoint(
                self.temperature_setpoint_c.unwrap_or(default.temperature_setpoint_c),
            ),
            channel_power,
            geometry: self.geometry.unwrap_or(default.geometry),
            workers: clamp_with_warning(
                "workers",
                self.workers.unwrap_or(default.workers),
                MIN_WORKERS,
                MAX_WORKERS,
            ),
            frame_timeout: self.frame_timeout.unwrap_or(default.frame_timeout),
        }
    }
}
