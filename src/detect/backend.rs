use anyhow::Result;

use crate::detect::result::Proposal;
use crate::frame::Frame;

/// Square network input edge. Frames are resized to this and scaled by
/// 1/255 before the forward pass.
pub const NETWORK_INPUT_SIZE: u32 = 416;

/// Inference backend trait.
///
/// A backend owns the loaded network and turns a canonical frame into raw
/// proposals with the argmax class score already taken. Confidence
/// filtering, coordinate conversion and non-max suppression stay in the
/// engine so every backend is post-processed identically.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run a forward pass. Proposals use normalized center/extent
    /// coordinates in `0..=1`.
    fn forward(&mut self, frame: &Frame) -> Result<Vec<Proposal>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
