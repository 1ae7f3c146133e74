//! Tuning knobs for the speech detector.
//!
//! Defaults match the reference FSMN VAD post-processing configuration
//! (16 kHz audio, 25 ms frames every 10 ms, one silence class at index 0).
//! Every field is optional in the serialized form; missing keys take the
//! default value.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Whether the detector keeps looking for new segments after one ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectMode {
    /// Stop at the first end point; the detector stays terminal until reset.
    SingleUtterance,
    /// Reset the episode after every end point so the next segment can start.
    MultipleUtterance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Analysis window of one frame, in ms.
    pub frame_length_ms: u64,
    /// Hop between consecutive frames, in ms. All frame-denominated
    /// durations below are divided by this value.
    pub frame_shift_ms: u64,
    /// Frames quieter than this (dB) are silence regardless of the scorer.
    pub decibel_threshold: f64,
    /// Minimum frame level above the tracked noise floor (dB) for speech.
    pub snr_threshold: f64,
    /// Required margin between speech and noise probability.
    pub speech_noise_margin: f64,
    /// Scale applied to ln(silence mass) before comparison.
    pub speech_to_noise_ratio: f64,
    /// Class indices in the score tensor that denote silence.
    pub silence_class_ids: Vec<usize>,
    /// Expected number of silence classes; must agree with `silence_class_ids`.
    pub silence_class_count: usize,
    /// Length of the smoothing window in ms.
    pub window_ms: u64,
    /// Speech frames (as ms) inside the window needed to declare a start.
    pub sil_to_speech_ms: u64,
    /// Speech frames (as ms) inside the window at or below which speech ends.
    pub speech_to_sil_ms: u64,
    /// Longest segment before an end point is forced.
    pub max_segment_ms: u64,
    /// Leading silence tolerated in single-utterance mode.
    pub max_start_silence_ms: u64,
    /// Trailing silence tolerated before a segment is closed. Per-call
    /// override available on `SpeechDetector::process`.
    pub max_end_silence_ms: u64,
    /// Enables look-back at start points and look-ahead at end points.
    pub extend: bool,
    pub lookback_start_ms: u64,
    pub lookahead_end_ms: u64,
    /// Number of silence frames averaged into the noise floor estimate.
    pub noise_window_frames: u32,
    pub detect_mode: DetectMode,
    /// Record per-frame speech/noise probabilities for debugging.
    pub emit_frame_probs: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_length_ms: 25,
            frame_shift_ms: 10,
            decibel_threshold: -100.0,
            snr_threshold: -100.0,
            speech_noise_margin: 0.6,
            speech_to_noise_ratio: 1.0,
            silence_class_ids: vec![0],
            silence_class_count: 1,
            window_ms: 200,
            sil_to_speech_ms: 150,
            speech_to_sil_ms: 150,
            max_segment_ms: 60_000,
            max_start_silence_ms: 3_000,
            max_end_silence_ms: 800,
            extend: true,
            lookback_start_ms: 200,
            lookahead_end_ms: 100,
            noise_window_frames: 100,
            detect_mode: DetectMode::MultipleUtterance,
            emit_frame_probs: false,
        }
    }
}

impl VadConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject parameter combinations the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CadenceError::invalid_config("sample_rate", "must be positive"));
        }
        if self.frame_shift_ms == 0 {
            return Err(CadenceError::invalid_config(
                "frame_shift_ms",
                "must be positive",
            ));
        }
        if self.frame_length_ms < self.frame_shift_ms {
            return Err(CadenceError::invalid_config(
                "frame_length_ms",
                format!(
                    "{} ms is shorter than the {} ms frame shift",
                    self.frame_length_ms, self.frame_shift_ms
                ),
            ));
        }
        if self.frame_shift_samples() == 0 {
            return Err(CadenceError::invalid_config(
                "frame_shift_ms",
                "frame shift covers no samples at this sample rate",
            ));
        }
        if self.window_frames() == 0 {
            return Err(CadenceError::invalid_config(
                "window_ms",
                "window must span at least one frame",
            ));
        }
        if self.sil_to_speech_ms > self.window_ms {
            return Err(CadenceError::invalid_config(
                "sil_to_speech_ms",
                "cannot exceed the window length, speech would never be confirmed",
            ));
        }
        if self.silence_class_ids.is_empty() {
            return Err(CadenceError::invalid_config(
                "silence_class_ids",
                "at least one silence class is required",
            ));
        }
        if self.silence_class_ids.len() != self.silence_class_count {
            return Err(CadenceError::invalid_config(
                "silence_class_count",
                format!(
                    "expected {} silence classes, {} configured",
                    self.silence_class_count,
                    self.silence_class_ids.len()
                ),
            ));
        }
        if self.noise_window_frames == 0 {
            return Err(CadenceError::invalid_config(
                "noise_window_frames",
                "must be at least 1",
            ));
        }
        if self.max_segment_ms < self.frame_shift_ms {
            return Err(CadenceError::invalid_config(
                "max_segment_ms",
                "must cover at least one frame",
            ));
        }
        Ok(())
    }

    /// Samples between the starts of consecutive frames.
    pub fn frame_shift_samples(&self) -> usize {
        (self.frame_shift_ms * u64::from(self.sample_rate) / 1000) as usize
    }

    /// Samples covered by one analysis frame.
    pub fn frame_length_samples(&self) -> usize {
        (self.frame_length_ms * u64::from(self.sample_rate) / 1000) as usize
    }

    pub fn window_frames(&self) -> usize {
        (self.window_ms / self.frame_shift_ms) as usize
    }

    pub fn max_segment_frames(&self) -> usize {
        (self.max_segment_ms / self.frame_shift_ms) as usize
    }

    pub fn lookahead_end_frames(&self) -> usize {
        (self.lookahead_end_ms / self.frame_shift_ms) as usize
    }

    /// Frames between the true onset and the frame at which a start is
    /// confirmed: the smoothing window plus the optional look-back.
    pub fn start_latency_frames(&self) -> usize {
        let mut latency = self.window_frames();
        if self.extend {
            latency += (self.lookback_start_ms / self.frame_shift_ms) as usize;
        }
        latency
    }
}
