//! Illumination sequence timing.
//!
//! A sequence is four exposures of `illumination_time_us` each followed by
//! `delay_us` of idle time, so one sequence lasts exactly one refresh period.

use std::time::Duration;

use tracing::debug;

use crate::image_pipeline::acquisition::config::clamp_with_warning;
use crate::image_pipeline::raw::FRAMES_PER_SEQUENCE;

pub const MIN_ILLUMINATION_TIME_US: u32 = 500;
pub const MAX_ILLUMINATION_TIME_US: u32 = 50_000;
pub const MIN_REFRESH_RATE_HZ: f64 = 1.0;
pub const MAX_REFRESH_RATE_HZ: f64 = 100.0;
pub const MAX_DELAY_US: u32 = 1_000_000;

/// Timing parameters programmed into the illumination controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceConfiguration {
    pub illumination_time_us: u32,
    pub delay_us: u32,
}

impl SequenceConfiguration {
    /// Time the light sources are active during one sequence.
    pub fn illuminated_us(&self) -> u32 {
        self.illumination_time_us * FRAMES_PER_SEQUENCE as u32
    }

    pub fn sequence_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.illuminated_us()) + u64::from(self.delay_us))
    }
}

/// Refresh rate and illumination time, kept mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceTiming {
    refresh_rate_hz: f64,
    illumination_time_us: u32,
    configuration: SequenceConfiguration,
}

impl SequenceTiming {
    pub fn new(refresh_rate_hz: f64, illumination_time_us: u32) -> Self {
        let illumination_time_us = clamp_with_warning(
            "illumination_time_us",
            illumination_time_us,
            MIN_ILLUMINATION_TIME_US,
            MAX_ILLUMINATION_TIME_US,
        );
        let refresh_rate_hz = clamp_with_warning(
            "refresh_rate_hz",
            refresh_rate_hz,
            MIN_REFRESH_RATE_HZ,
            Self::max_refresh_rate_for(illumination_time_us),
        );
        Self {
            refresh_rate_hz,
            illumination_time_us,
            configuration: Self::derive(refresh_rate_hz, illumination_time_us),
        }
    }

    /// Highest rate at which four exposures still fit in one period.
    pub fn max_refresh_rate_for(illumination_time_us: u32) -> f64 {
        let illuminated = f64::from(illumination_time_us) * FRAMES_PER_SEQUENCE as f64;
        (1_000_000.0 / illuminated).min(MAX_REFRESH_RATE_HZ)
    }

    fn derive(refresh_rate_hz: f64, illumination_time_us: u32) -> SequenceConfiguration {
        let period_us = (1_000_000.0 / refresh_rate_hz).round() as u32;
        let illuminated = illumination_time_us * FRAMES_PER_SEQUENCE as u32;
        let delay_us = period_us.saturating_sub(illuminated).min(MAX_DELAY_US);
        SequenceConfiguration { illumination_time_us, delay_us }
    }

    /// Returns the rate actually applied.
    pub fn set_refresh_rate(&mut self, refresh_rate_hz: f64) -> f64 {
        *self = Self::new(refresh_rate_hz, self.illumination_time_us);
        debug!(refresh_rate_hz = self.refresh_rate_hz, delay_us = self.configuration.delay_us, "refresh rate updated");
        self.refresh_rate_hz
    }

    /// Returns the illumination time actually applied. The refresh rate is
    /// lowered if the longer exposures no longer fit in one period.
    pub fn set_illumination_time(&mut self, illumination_time_us: u32) -> u32 {
        let requested_rate = self.refresh_rate_hz;
        let illumination_time_us = clamp_with_warning(
            "illumination_time_us",
            illumination_time_us,
            MIN_ILLUMINATION_TIME_US,
            MAX_ILLUMINATION_TIME_US,
        );
        let refresh_rate_hz =
            requested_rate.min(Self::max_refresh_rate_for(illumination_time_us)).max(MIN_REFRESH_RATE_HZ);
        *self = Self {
            refresh_rate_hz,
            illumination_time_us,
            configuration: Self::derive(refresh_rate_hz, illumination_time_us),
        };
        debug!(illumination_time_us, refresh_rate_hz, "illumination time updated");
        illumination_time_us
    }

    pub fn refresh_rate(&self) -> f64 {
        self.refresh_rate_hz
    }

    pub fn illumination_time(&self) -> u32 {
        self.illumination_time_us
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz)
    }

    pub fn configuration(&self) -> SequenceConfiguration {
        self.configuration
    }
}
