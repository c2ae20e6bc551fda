//! Acquisition module
//!
//! Turns the camera driver's push notifications into a blocking per-sequence
//! pull, and drives the illumination controller so that acquiring sequence
//! N+1 overlaps with consuming sequence N.

mod config;
mod controller;
mod device;
mod sequence;
pub mod simulated;
mod synchronizer;

#[cfg(test)]
mod tests;

pub use config::{AcquisitionConfig, AcquisitionConfigBuilder};
pub use controller::SequenceController;
pub use device::{AcquisitionSink, CameraDevice, CameraStatus, IlluminationController};
pub use sequence::{SequenceConfiguration, SequenceTiming};
pub use synchronizer::{FrameSynchronizer, SynchronizerStats};

pub mod limits {
    //! Documented parameter ranges. Out-of-range requests are clamped.
    pub use super::config::{
        MAX_CHANNEL_POWER_PERCENT, MAX_GAIN_DB, MAX_TEMPERATURE_SETPOINT_C, MAX_WORKERS,
        MIN_EXPOSURE_TIME_US, MIN_GAIN_DB, MIN_TEMPERATURE_SETPOINT_C, MIN_WORKERS,
    };
    pub use super::sequence::{
        MAX_DELAY_US, MAX_ILLUMINATION_TIME_US, MAX_REFRESH_RATE_HZ, MIN_ILLUMINATION_TIME_US,
        MIN_REFRESH_RATE_HZ,
    };
}
