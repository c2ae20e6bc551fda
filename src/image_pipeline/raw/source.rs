use crate::image_pipeline::common::error::Result;
use crate::image_pipeline::raw::types::RawFrame;

/// Blocking pull interface for complete sequences.
///
/// Implementations are shared by every pipeline worker, so all methods take
/// `&self` and synchronize internally.
pub trait FrameSource: Send + Sync {
    fn start(&self) -> Result<()>;

    /// Must wake any thread blocked in `next_frame`, which then returns
    /// `PipelineError::Stopped`.
    fn stop(&self);

    /// Blocks until a complete sequence is available and copies it into `out`.
    fn next_frame(&self, out: &mut RawFrame) -> Result<()>;
}
