//! Level-based frame scorer.
//!
//! ## Algorithm
//!
//! 1. Split the chunk into analysis frames (`frame_length`, every `shift`).
//! 2. Measure each frame's RMS level in dBFS.
//! 3. Map the level through a logistic curve centred on `midpoint_db` to a
//!    speech probability; the silence probability is its complement.
//!
//! Output classes are `[silence, speech]`, so the default detector config
//! (silence class `0`) reads it directly.

use ndarray::Array3;

use super::FrameScorer;
use crate::error::Result;
use crate::vad::VadConfig;

/// Lowest level reported for digital silence.
const LEVEL_FLOOR_DB: f32 = -120.0;

#[derive(Debug, Clone)]
pub struct EnergyScorer {
    frame_length: usize,
    frame_shift: usize,
    /// Level (dBFS) scored as 50 % speech.
    midpoint_db: f32,
    /// Steepness of the curve, per dB.
    slope: f32,
}

impl EnergyScorer {
    pub fn new(config: &VadConfig, midpoint_db: f32, slope: f32) -> Self {
        Self {
            frame_length: config.frame_length_samples(),
            frame_shift: config.frame_shift_samples().max(1),
            midpoint_db,
            slope,
        }
    }

    /// -40 dBFS midpoint, 0.5 per dB.
    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config, -40.0, 0.5)
    }

    fn level_db(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return LEVEL_FLOOR_DB;
        }
        let mean_sq = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        (10.0 * mean_sq.log10()).max(LEVEL_FLOOR_DB)
    }

    fn speech_probability(&self, level_db: f32) -> f32 {
        1.0 / (1.0 + (-self.slope * (level_db - self.midpoint_db)).exp())
    }
}

impl FrameScorer for EnergyScorer {
    fn score(&mut self, samples: &[f32]) -> Result<Array3<f32>> {
        let frames = if samples.len() < self.frame_length {
            0
        } else {
            (samples.len() - self.frame_length) / self.frame_shift + 1
        };

        let mut scores = Array3::<f32>::zeros((1, frames, 2));
        for (k, frame) in samples
            .windows(self.frame_length.max(1))
            .step_by(self.frame_shift)
            .take(frames)
            .enumerate()
        {
            let speech = self.speech_probability(Self::level_db(frame));
            scores[[0, k, 0]] = 1.0 - speech;
            scores[[0, k, 1]] = speech;
        }
        Ok(scores)
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn scorer() -> EnergyScorer {
        EnergyScorer::from_config(&VadConfig::default())
    }

    #[test]
    fn frame_count_matches_detector_framing() {
        let mut s = scorer();
        assert_eq!(s.score(&[0.0; 399]).unwrap().dim(), (1, 0, 2));
        assert_eq!(s.score(&[0.0; 400]).unwrap().dim(), (1, 1, 2));
        assert_eq!(s.score(&vec![0.0; 99 * 160 + 400]).unwrap().dim(), (1, 100, 2));
    }

    #[test]
    fn silence_and_tone_land_on_opposite_sides() {
        let mut s = scorer();
        let quiet = s.score(&[0.0; 400]).unwrap();
        assert!(quiet[[0, 0, 0]] > 0.99);

        let loud: Vec<f32> = (0..400).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect();
        let scores = s.score(&loud).unwrap();
        assert!(scores[[0, 0, 1]] > 0.99);
    }

    #[test]
    fn classes_sum_to_one() {
        let mut s = scorer();
        let samples: Vec<f32> = (0..2_000).map(|i| (i as f32 * 0.01).sin() * 0.01).collect();
        let scores = s.score(&samples).unwrap();
        for k in 0..scores.dim().1 {
            assert_relative_eq!(scores[[0, k, 0]] + scores[[0, k, 1]], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn midpoint_scores_one_half() {
        let s = scorer();
        assert_relative_eq!(s.speech_probability(-40.0), 0.5);
    }
}
