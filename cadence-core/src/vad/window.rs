//! Hysteresis filter over raw frame classifications.
//!
//! ## Algorithm
//!
//! 1. Keep the last `window_frames` classifications in a circular buffer and
//!    a running count of how many of them are speech.
//! 2. While in silence, declare `Sil2Speech` once the count reaches the
//!    silence→speech threshold.
//! 3. While in speech, declare `Speech2Sil` once the count falls to the
//!    speech→silence threshold.
//! 4. Otherwise report the steady state (`Sil2Sil` / `Speech2Speech`).
//!
//! A frame flickering on and off never accumulates enough votes to cross
//! either threshold.

use tracing::trace;

use super::{ChangeEvent, FrameClassification, VadConfig};

#[derive(Debug, Clone)]
pub struct WindowDetector {
    votes: Vec<bool>,
    cursor: usize,
    speech_votes: usize,
    sil_to_speech_frames: usize,
    speech_to_sil_frames: usize,
    in_speech: bool,
}

impl WindowDetector {
    /// Create a detector whose window spans `window_ms` and whose thresholds
    /// are the two confirmation durations, all divided by `frame_ms`.
    ///
    /// `window_ms` must cover at least one frame; `VadConfig::validate`
    /// guarantees this for detectors built from a config.
    pub fn new(window_ms: u64, sil_to_speech_ms: u64, speech_to_sil_ms: u64, frame_ms: u64) -> Self {
        let window_frames = ((window_ms / frame_ms) as usize).max(1);
        Self {
            votes: vec![false; window_frames],
            cursor: 0,
            speech_votes: 0,
            sil_to_speech_frames: (sil_to_speech_ms / frame_ms) as usize,
            speech_to_sil_frames: (speech_to_sil_ms / frame_ms) as usize,
            in_speech: false,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.window_ms,
            config.sil_to_speech_ms,
            config.speech_to_sil_ms,
            config.frame_shift_ms,
        )
    }

    pub fn window_frames(&self) -> usize {
        self.votes.len()
    }

    /// Feed one classification and report the debounced state change.
    ///
    /// `Invalid` frames abstain: they leave the window untouched and yield
    /// `None`.
    pub fn detect_one_frame(
        &mut self,
        classification: FrameClassification,
        frame_index: usize,
    ) -> Option<ChangeEvent> {
        let vote = match classification {
            FrameClassification::Speech => true,
            FrameClassification::Silence => false,
            FrameClassification::Invalid => return None,
        };

        if self.votes[self.cursor] {
            self.speech_votes -= 1;
        }
        if vote {
            self.speech_votes += 1;
        }
        self.votes[self.cursor] = vote;
        self.cursor = (self.cursor + 1) % self.votes.len();

        if !self.in_speech && self.speech_votes >= self.sil_to_speech_frames {
            self.in_speech = true;
            trace!(frame_index, votes = self.speech_votes, "silence -> speech");
            return Some(ChangeEvent::Sil2Speech);
        }
        if self.in_speech && self.speech_votes <= self.speech_to_sil_frames {
            self.in_speech = false;
            trace!(frame_index, votes = self.speech_votes, "speech -> silence");
            return Some(ChangeEvent::Speech2Sil);
        }

        Some(if self.in_speech {
            ChangeEvent::Speech2Speech
        } else {
            ChangeEvent::Sil2Sil
        })
    }

    pub fn reset(&mut self) {
        self.votes.iter_mut().for_each(|v| *v = false);
        self.cursor = 0;
        self.speech_votes = 0;
        self.in_speech = false;
    }
}
