//! Process-lifetime threat statistics.
//!
//! `ThreatStats` is a pure data holder. It is initialized once at process
//! start, mutated only by the stream loop's detection step (one increment
//! per frame with at least one surviving detection), and never reset
//! during normal operation.
//!
//! Reads are lock-free so `stats()` never blocks on, or serializes with,
//! the frame loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Aggregate threat counter + last-detection timestamp.
pub struct ThreatStats {
    threat_count: AtomicU64,
    /// Epoch milliseconds of the last qualifying frame; 0 = no detection yet.
    last_detection_ms: AtomicU64,
}

impl ThreatStats {
    pub fn new() -> Self {
        Self {
            threat_count: AtomicU64::new(0),
            last_detection_ms: AtomicU64::new(0),
        }
    }

    /// Record a frame that produced at least one surviving detection.
    ///
    /// Counts once per qualifying frame, never once per detection. A
    /// stationary object therefore keeps incrementing the tally across
    /// consecutive frames; this is the intended "alerts fired" semantic.
    pub fn record_threat_frame(&self) {
        self.threat_count.fetch_add(1, Ordering::Relaxed);
        self.last_detection_ms
            .store(now_epoch_ms(), Ordering::Relaxed);
    }

    pub fn threat_count(&self) -> u64 {
        self.threat_count.load(Ordering::Relaxed)
    }

    /// Time since the last qualifying frame, or `None` before the first.
    pub fn last_detection_age(&self) -> Option<Duration> {
        let at = self.last_detection_ms.load(Ordering::Relaxed);
        if at == 0 {
            return None;
        }
        Some(Duration::from_millis(now_epoch_ms().saturating_sub(at)))
    }
}

impl Default for ThreatStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot returned by `StreamController::stats()` and served
/// by the transport as JSON.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub threat_count: u64,
    pub active: bool,
    /// Wall-clock time, `HH:MM:SS`.
    pub time: String,
    /// Last session-scoped stream error, if the previous session ended on one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_once_per_recorded_frame() {
        let stats = ThreatStats::new();
        assert_eq!(stats.threat_count(), 0);

        stats.record_threat_frame();
        stats.record_threat_frame();
        stats.record_threat_frame();
        assert_eq!(stats.threat_count(), 3);
    }

    #[test]
    fn last_detection_age_is_none_until_first_detection() {
        let stats = ThreatStats::new();
        assert!(stats.last_detection_age().is_none());

        stats.record_threat_frame();
        let age = stats.last_detection_age().expect("age after detection");
        assert!(age < Duration::from_secs(1));
    }
}
