//! Interfaces of the external acquisition hardware.

use std::sync::Arc;

use crate::image_pipeline::acquisition::sequence::SequenceConfiguration;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::raw::SubFrame;

/// Receiver of driver notifications. Called on the driver's own thread.
pub trait AcquisitionSink: Send + Sync {
    fn on_sub_frame(&self, sub_frame: SubFrame<'_>);

    /// A driver or hardware level fault. Ends the acquisition session.
    fn on_device_fault(&self, fault: PipelineError);
}

/// Camera handle. Not reentrant; callers serialize access.
pub trait CameraDevice: Send {
    /// Starts delivering sub-frames to `sink` until `close_stream`.
    fn open_stream(&mut self, sink: Arc<dyn AcquisitionSink>) -> Result<()>;

    fn close_stream(&mut self);

    fn set_exposure_time(&mut self, exposure_us: u32) -> Result<()>;

    fn set_gain(&mut self, gain_db: f32) -> Result<()>;

    fn set_temperature_setpoint(&mut self, celsius: f32) -> Result<()>;

    fn status(&self) -> CameraStatus;
}

/// Illumination controller that fires the light sources and triggers the camera.
pub trait IlluminationController: Send {
    fn configure(&mut self, sequence: &SequenceConfiguration, channel_power: &[f32; 3]) -> Result<()>;

    /// Starts one full sequence (dark + three illuminated exposures).
    fn trigger_sequence(&mut self) -> Result<()>;
}

/// Read-only camera telemetry snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraStatus {
    pub sensor_temperature_c: f32,
    pub humidity_percent: f32,
    pub cooling_power_percent: f32,
    pub packets_received: u64,
    pub packets_lost: u64,
    /// Malformed sub-frames seen since the last start.
    pub incomplete_sub_frames: u64,
}

impl CameraStatus {
    pub fn packet_loss_percent(&self) -> f64 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            return 0.0;
        }
        self.packets_lost as f64 * 100.0 / total as f64
    }
}
