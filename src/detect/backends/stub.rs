use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::Proposal;

/// Scripted backend for tests and model-less deployments (`stub://`
/// model paths).
///
/// Behaves like a network that "sees" whatever the script says: each
/// forward pass pops the next proposal set. A repeating stub returns the
/// same set every frame; an exhausted script returns no proposals.
pub struct StubBackend {
    script: VecDeque<Vec<Proposal>>,
    repeat: Option<Vec<Proposal>>,
}

impl StubBackend {
    /// A backend that never proposes anything.
    pub fn empty() -> Self {
        Self {
            script: VecDeque::new(),
            repeat: None,
        }
    }

    /// One proposal set per forward pass, in order; empty afterwards.
    pub fn scripted(frames: Vec<Vec<Proposal>>) -> Self {
        Self {
            script: frames.into(),
            repeat: None,
        }
    }

    /// The same proposal set on every forward pass.
    pub fn repeating(proposals: Vec<Proposal>) -> Self {
        Self {
            script: VecDeque::new(),
            repeat: Some(proposals),
        }
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn forward(&mut self, _frame: &crate::frame::Frame) -> Result<Vec<Proposal>> {
        if let Some(repeat) = &self.repeat {
            return Ok(repeat.clone());
        }
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::Rgb;

    fn proposal(confidence: f32) -> Proposal {
        Proposal {
            class_id: 0,
            confidence,
            cx: 0.5,
            cy: 0.5,
            w: 0.2,
            h: 0.2,
        }
    }

    #[test]
    fn scripted_backend_drains_then_goes_quiet() -> Result<()> {
        let frame = Frame::filled(Rgb([0, 0, 0]));
        let mut backend = StubBackend::scripted(vec![vec![proposal(0.9)], vec![]]);

        assert_eq!(backend.forward(&frame)?.len(), 1);
        assert_eq!(backend.forward(&frame)?.len(), 0);
        assert_eq!(backend.forward(&frame)?.len(), 0);
        Ok(())
    }

    #[test]
    fn repeating_backend_proposes_every_frame() -> Result<()> {
        let frame = Frame::filled(Rgb([0, 0, 0]));
        let mut backend = StubBackend::repeating(vec![proposal(0.8), proposal(0.7)]);

        for _ in 0..5 {
            assert_eq!(backend.forward(&frame)?.len(), 2);
        }
        Ok(())
    }
}
