//! Default numeric stages for skin classification.
//!
//! Skin has a strong water absorption band near 1300 nm while most other
//! materials reflect 1060 nm and 1300 nm about equally, so the normalized
//! difference of those two channels separates skin from background.

use crate::image_pipeline::common::ImagePlane;
use crate::image_pipeline::common::error::{PipelineError, Result};
use crate::image_pipeline::processing::stage::{Stage, StageContext, StageFactory, WorkerStages};
use crate::image_pipeline::raw::{MAX_SAMPLE_VALUE, SAMPLE_BITS};

const NDI_EPSILON: f32 = 1e-6;

fn input<'a, T>(stage: &'static str, inputs: &[&'a ImagePlane<T>], index: usize) -> Result<&'a ImagePlane<T>> {
    inputs.get(index).copied().ok_or_else(|| PipelineError::StageFailed {
        stage,
        message: format!("missing input {index}"),
    })
}

fn check_len<I, O>(stage: &'static str, input: &ImagePlane<I>, output: &ImagePlane<O>, channels: usize) -> Result<()> {
    let expected = input.data.len() * channels;
    if output.data.len() != expected {
        return Err(PipelineError::StageFailed {
            stage,
            message: format!("output holds {} samples, expected {}", output.data.len(), expected),
        });
    }
    Ok(())
}

fn to_display(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Scales raw samples to [0, 1].
pub struct NormalizeSamples;

impl Stage<u16, f32> for NormalizeSamples {
    fn name(&self) -> &'static str {
        "normalize_samples"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<u16>], output: &mut ImagePlane<f32>, _ctx: &StageContext<'_>) -> Result<()> {
        let raw = input(self.name(), inputs, 0)?;
        check_len(self.name(), raw, output, 1)?;
        let full_scale = f32::from(MAX_SAMPLE_VALUE);
        for (dst, &src) in output.data.iter_mut().zip(&raw.data) {
            *dst = (f32::from(src) / full_scale).min(1.0);
        }
        Ok(())
    }
}

/// Removes ambient light using the dark reference. Inputs: `[channel, dark]`.
pub struct SubtractDark;

impl Stage<f32, f32> for SubtractDark {
    fn name(&self) -> &'static str {
        "subtract_dark"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<f32>, _ctx: &StageContext<'_>) -> Result<()> {
        let channel = input(self.name(), inputs, 0)?;
        let dark = input(self.name(), inputs, 1)?;
        check_len(self.name(), channel, output, 1)?;
        check_len(self.name(), dark, output, 1)?;
        for ((dst, &c), &d) in output.data.iter_mut().zip(&channel.data).zip(&dark.data) {
            *dst = (c - d).max(0.0);
        }
        Ok(())
    }
}

/// Separable box blur with edge-clamped windows. Keeps its intermediate row
/// pass between calls.
#[derive(Default)]
pub struct BoxBlur {
    row_pass: Vec<f32>,
}

impl BoxBlur {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage<f32, f32> for BoxBlur {
    fn name(&self) -> &'static str {
        "box_blur"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<f32>, ctx: &StageContext<'_>) -> Result<()> {
        let src = input(self.name(), inputs, 0)?;
        check_len(self.name(), src, output, 1)?;
        let radius = ctx.params.blur_radius;
        if radius == 0 {
            output.data.copy_from_slice(&src.data);
            return Ok(());
        }

        let (width, height) = (src.width, src.height);
        self.row_pass.resize(src.len(), 0.0);

        for y in 0..height {
            let row = &src.data[y * width..(y + 1) * width];
            for x in 0..width {
                let lo = x.saturating_sub(radius);
                let hi = (x + radius).min(width - 1);
                let sum: f32 = row[lo..=hi].iter().sum();
                self.row_pass[y * width + x] = sum / (hi - lo + 1) as f32;
            }
        }

        for x in 0..width {
            for y in 0..height {
                let lo = y.saturating_sub(radius);
                let hi = (y + radius).min(height - 1);
                let sum: f32 = (lo..=hi).map(|yy| self.row_pass[yy * width + x]).sum();
                output.data[y * width + x] = sum / (hi - lo + 1) as f32;
            }
        }
        Ok(())
    }
}

/// Per-waveband display gain.
pub struct ChannelGain;

impl Stage<f32, f32> for ChannelGain {
    fn name(&self) -> &'static str {
        "channel_gain"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<f32>, ctx: &StageContext<'_>) -> Result<()> {
        let src = input(self.name(), inputs, 0)?;
        check_len(self.name(), src, output, 1)?;
        let channel = ctx.channel.unwrap_or(0);
        let gain = ctx
            .params
            .channel_gain
            .get(channel)
            .copied()
            .ok_or(PipelineError::InvalidChannel(channel))?;
        for (dst, &v) in output.data.iter_mut().zip(&src.data) {
            *dst = (v * gain).clamp(0.0, 1.0);
        }
        Ok(())
    }
}

/// Normalized-difference skin classifier. Inputs: the 935, 1060 and 1300 nm
/// channels. Writes 255 for skin, 0 otherwise.
pub struct NdiSkinClassifier;

impl Stage<f32, u8> for NdiSkinClassifier {
    fn name(&self) -> &'static str {
        "ndi_skin_classifier"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<u8>, ctx: &StageContext<'_>) -> Result<()> {
        let mid = input(self.name(), inputs, 1)?;
        let long = input(self.name(), inputs, 2)?;
        check_len(self.name(), mid, output, 1)?;
        check_len(self.name(), long, output, 1)?;
        let p = ctx.params;

        for ((dst, &m), &l) in output.data.iter_mut().zip(&mid.data).zip(&long.data) {
            let ndi = (m - l) / (m + l + NDI_EPSILON);
            let skin = m >= p.min_intensity && ndi >= p.ndi_min && ndi <= p.ndi_max;
            *dst = if skin { 255 } else { 0 };
        }
        Ok(())
    }
}

/// Normalized intensity to 8-bit gray.
pub struct DisplayConversion;

impl Stage<f32, u8> for DisplayConversion {
    fn name(&self) -> &'static str {
        "display_conversion"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<u8>, _ctx: &StageContext<'_>) -> Result<()> {
        let src = input(self.name(), inputs, 0)?;
        check_len(self.name(), src, output, 1)?;
        for (dst, &v) in output.data.iter_mut().zip(&src.data) {
            *dst = to_display(v);
        }
        Ok(())
    }
}

/// False-color composite: red = 1300 nm, green = 1060 nm, blue = 935 nm.
pub struct FalseColorComposite;

impl Stage<f32, u8> for FalseColorComposite {
    fn name(&self) -> &'static str {
        "false_color_composite"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<f32>], output: &mut ImagePlane<u8>, _ctx: &StageContext<'_>) -> Result<()> {
        let short = input(self.name(), inputs, 0)?;
        let mid = input(self.name(), inputs, 1)?;
        let long = input(self.name(), inputs, 2)?;
        check_len(self.name(), short, output, 3)?;
        check_len(self.name(), mid, output, 3)?;
        check_len(self.name(), long, output, 3)?;

        for (i, rgb) in output.data.chunks_exact_mut(3).enumerate() {
            rgb[0] = to_display(long.data[i]);
            rgb[1] = to_display(mid.data[i]);
            rgb[2] = to_display(short.data[i]);
        }
        Ok(())
    }
}

/// Raw sample to 8-bit preview by dropping the low bits.
pub struct RawPreview;

impl Stage<u16, u8> for RawPreview {
    fn name(&self) -> &'static str {
        "raw_preview"
    }

    fn apply(&mut self, inputs: &[&ImagePlane<u16>], output: &mut ImagePlane<u8>, _ctx: &StageContext<'_>) -> Result<()> {
        let raw = input(self.name(), inputs, 0)?;
        check_len(self.name(), raw, output, 1)?;
        for (dst, &v) in output.data.iter_mut().zip(&raw.data) {
            *dst = (v.min(MAX_SAMPLE_VALUE) >> (SAMPLE_BITS - 8)) as u8;
        }
        Ok(())
    }
}

/// Builds the standard stage sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStageFactory;

impl StageFactory for DefaultStageFactory {
    fn create_worker(&self) -> WorkerStages {
        WorkerStages {
            convert: Box::new(NormalizeSamples),
            raw_filters: vec![Box::new(SubtractDark), Box::new(BoxBlur::new())],
            visual_filters: vec![Box::new(ChannelGain)],
            classifier: Box::new(NdiSkinClassifier),
            display: Box::new(DisplayConversion),
            composite: Box::new(FalseColorComposite),
            preview: Box::new(RawPreview),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::common::FrameGeometry;
    use crate::image_pipeline::processing::parameters::ProcessingParameters;

    fn plane(width: usize, height: usize, data: Vec<f32>) -> ImagePlane<f32> {
        ImagePlane { width, height, channels: 1, data }
    }

    fn ctx(params: &ProcessingParameters) -> StageContext<'_> {
        StageContext { channel: Some(0), params }
    }

    #[test]
    fn test_normalize_scales_to_unit_range() {
        let params = ProcessingParameters::default();
        let raw = ImagePlane { width: 3, height: 1, channels: 1, data: vec![0u16, MAX_SAMPLE_VALUE, u16::MAX] };
        let mut out = ImagePlane::<f32>::gray(FrameGeometry::new(3, 1).unwrap());

        NormalizeSamples.apply(&[&raw], &mut out, &ctx(&params)).unwrap();
        assert_eq!(out.data, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_subtract_dark_clamps_at_zero() {
        let params = ProcessingParameters::default();
        let channel = plane(3, 1, vec![0.5, 0.25, 0.75]);
        let dark = plane(3, 1, vec![0.125, 0.5, 0.25]);
        let mut out = plane(3, 1, vec![9.0; 3]);

        SubtractDark.apply(&[&channel, &dark], &mut out, &ctx(&params)).unwrap();
        assert_eq!(out.data, vec![0.375, 0.0, 0.5]);
    }

    #[test]
    fn test_stages_reject_mismatched_output() {
        let params = ProcessingParameters::default();
        let channel = plane(3, 1, vec![0.5; 3]);
        let mut short = plane(2, 1, vec![0.0; 2]);
        let err = BoxBlur::new().apply(&[&channel], &mut short, &ctx(&params)).unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage: "box_blur", .. }));

        let mut gray = ImagePlane::<u8>::gray(FrameGeometry::new(3, 1).unwrap());
        let err = FalseColorComposite
            .apply(&[&channel, &channel, &channel], &mut gray, &ctx(&params))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage: "false_color_composite", .. }));
    }

    #[test]
    fn test_subtract_dark_requires_dark_input() {
        let params = ProcessingParameters::default();
        let channel = plane(2, 1, vec![0.5, 0.2]);
        let mut out = plane(2, 1, vec![0.0; 2]);

        let err = SubtractDark.apply(&[&channel], &mut out, &ctx(&params)).unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage: "subtract_dark", .. }));
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let params = ProcessingParameters { blur_radius: 2, ..Default::default() };
        let src = plane(5, 4, vec![0.25; 20]);
        let mut out = plane(5, 4, vec![0.0; 20]);

        BoxBlur::new().apply(&[&src], &mut out, &ctx(&params)).unwrap();
        for v in out.data {
            assert!((v - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_blur_radius_zero_copies() {
        let params = ProcessingParameters { blur_radius: 0, ..Default::default() };
        let src = plane(3, 1, vec![0.1, 0.7, 0.3]);
        let mut out = plane(3, 1, vec![0.0; 3]);

        BoxBlur::new().apply(&[&src], &mut out, &ctx(&params)).unwrap();
        assert_eq!(out.data, src.data);
    }

    #[test]
    fn test_blur_spreads_impulse() {
        let params = ProcessingParameters { blur_radius: 1, ..Default::default() };
        let mut data = vec![0.0; 9];
        data[4] = 0.9;
        let src = plane(3, 3, data);
        let mut out = plane(3, 3, vec![0.0; 9]);

        BoxBlur::new().apply(&[&src], &mut out, &ctx(&params)).unwrap();
        assert!((out.data[4] - 0.1).abs() < 1e-6);
        // Corner window is 2x2.
        assert!((out.data[0] - 0.225).abs() < 1e-6);
    }

    #[test]
    fn test_classifier_separates_skin() {
        let params = ProcessingParameters::default();
        let short = plane(2, 1, vec![0.4, 0.3]);
        let mid = plane(2, 1, vec![0.44, 0.26]);
        let long = plane(2, 1, vec![0.18, 0.25]);
        let mut mask = ImagePlane::<u8>::gray(FrameGeometry::new(2, 1).unwrap());

        NdiSkinClassifier
            .apply(&[&short, &mid, &long], &mut mask, &ctx(&params))
            .unwrap();
        assert_eq!(mask.data, vec![255, 0]);
    }

    #[test]
    fn test_classifier_ignores_dark_pixels() {
        let params = ProcessingParameters::default();
        let short = plane(1, 1, vec![0.01]);
        let mid = plane(1, 1, vec![0.02]);
        let long = plane(1, 1, vec![0.005]);
        let mut mask = ImagePlane::<u8>::gray(FrameGeometry::new(1, 1).unwrap());

        NdiSkinClassifier
            .apply(&[&short, &mid, &long], &mut mask, &ctx(&params))
            .unwrap();
        assert_eq!(mask.data, vec![0]);
    }

    #[test]
    fn test_composite_channel_order() {
        let params = ProcessingParameters::default();
        let short = plane(1, 1, vec![0.0]);
        let mid = plane(1, 1, vec![0.5]);
        let long = plane(1, 1, vec![1.0]);
        let mut rgb = ImagePlane::<u8>::new(FrameGeometry::new(1, 1).unwrap(), 3);

        FalseColorComposite
            .apply(&[&short, &mid, &long], &mut rgb, &ctx(&params))
            .unwrap();
        assert_eq!(rgb.data, vec![255, 128, 0]);
    }

    #[test]
    fn test_raw_preview_drops_low_bits() {
        let params = ProcessingParameters::default();
        let raw = ImagePlane { width: 3, height: 1, channels: 1, data: vec![0u16, 16, MAX_SAMPLE_VALUE] };
        let mut out = ImagePlane::<u8>::gray(FrameGeometry::new(3, 1).unwrap());

        RawPreview.apply(&[&raw], &mut out, &ctx(&params)).unwrap();
        assert_eq!(out.data, vec![0, 1, 255]);
    }

    #[test]
    fn test_channel_gain_uses_context_channel() {
        let params = ProcessingParameters { channel_gain: [1.0, 2.0, 0.5], ..Default::default() };
        let src = plane(2, 1, vec![0.2, 0.8]);
        let mut out = plane(2, 1, vec![0.0; 2]);

        let ctx = StageContext { channel: Some(1), params: &params };
        ChannelGain.apply(&[&src], &mut out, &ctx).unwrap();
        assert_eq!(out.data, vec![0.4, 1.0]);
    }
}
