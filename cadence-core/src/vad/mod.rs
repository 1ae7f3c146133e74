//! Voice activity detection over externally scored frames.
//!
//! `SpeechDetector` is the stateful core: it turns per-frame class posteriors
//! and raw samples into speech segment boundaries. `WindowDetector` is the
//! hysteresis filter it uses to debounce raw frame classifications.

pub mod config;
pub mod detector;
pub mod window;

pub use config::{DetectMode, VadConfig};
pub use detector::SpeechDetector;
pub use window::WindowDetector;

use serde::{Deserialize, Serialize};

/// Raw per-frame decision, before smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClassification {
    /// No usable measurement for the frame (missing samples or scores).
    Invalid,
    Silence,
    Speech,
}

/// Debounced transition reported by the `WindowDetector` for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Sil2Sil,
    Sil2Speech,
    Speech2Sil,
    Speech2Speech,
}

/// Phase of the current detection episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMachineState {
    StartNotDetected,
    InSpeechSegment,
    EndPointDetected,
}

/// A speech region reported to the caller, in ms from the stream start.
///
/// Batch mode always fills both bounds. Online mode reports a segment twice:
/// first with only `begin_ms` when its start is confirmed, then with only
/// `end_ms` when it closes. A segment that starts and closes within one call
/// is reported once with both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub begin_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl TimeWindow {
    pub fn closed(begin_ms: u64, end_ms: u64) -> Self {
        Self {
            begin_ms: Some(begin_ms),
            end_ms: Some(end_ms),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.begin_ms.is_some() && self.end_ms.is_some()
    }
}

/// Per-frame scorer diagnostics, recorded when `emit_frame_probs` is on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameProbability {
    pub frame: usize,
    pub speech_prob: f64,
    pub noise_prob: f64,
    /// `1 - sum(silence class probabilities)`.
    pub score: f64,
}
