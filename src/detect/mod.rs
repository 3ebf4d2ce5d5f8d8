mod backend;
mod backends;
mod engine;
mod nms;
mod result;

pub use backend::{InferenceBackend, NETWORK_INPUT_SIZE};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{DetectionEngine, CONFIDENCE_THRESHOLD, IOU_THRESHOLD};
pub use nms::non_max_suppression;
pub use result::{Detection, DetectionResult, Proposal};
