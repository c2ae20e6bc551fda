/// Parameters read by the filter and classifier stages.
///
/// Changing them does not require a new acquisition: stop the pool and call
/// `ProcessorPool::reprocess` to re-render the last frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingParameters {
    /// Box blur radius in pixels applied to the dark-corrected channels. 0 disables.
    pub blur_radius: usize,
    /// Display gain per waveband.
    pub channel_gain: [f32; 3],
    /// Accepted range of the normalized difference between the 1060 nm and
    /// 1300 nm channels for a skin pixel.
    pub ndi_min: f32,
    pub ndi_max: f32,
    /// Minimum 1060 nm intensity (normalized) for a pixel to be classified.
    pub min_intensity: f32,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            blur_radius: 1,
            channel_gain: [1.0; 3],
            ndi_min: 0.15,
            ndi_max: 0.8,
            min_intensity: 0.05,
        }
    }
}
