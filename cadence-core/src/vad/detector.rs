//! Streaming speech detector.
//!
//! ## Algorithm
//!
//! For every frame of a chunk:
//!
//! 1. Measure the frame level in dB over its raw samples.
//! 2. Classify it: quiet frames are silence outright; otherwise the scorer's
//!    silence-class mass is compared against the speech mass with a margin,
//!    gated by an adaptive noise floor (SNR).
//! 3. Debounce the classification through the `WindowDetector`.
//! 4. Drive the start/end state machine, which confirms frames into the
//!    `FrameBuffer`. Confirmed starts are pulled back by the smoothing
//!    latency (plus look-back); confirmed ends trail the last speech by the
//!    look-ahead.
//!
//! In multi-utterance mode the episode resets right after each end point, so
//! one stream yields any number of segments.

use ndarray::{ArrayView1, ArrayView3, Axis};
use tracing::{debug, warn};

use crate::buffering::FrameBuffer;
use crate::error::{CadenceError, Result};

use super::{
    ChangeEvent, DetectMode, FrameClassification, FrameProbability, TimeWindow, VadConfig,
    VadMachineState, WindowDetector,
};

/// Noise floor assumed before the first silence frame has been measured.
const INITIAL_NOISE_DB: f64 = -100.0;

/// Added to the frame energy before taking the log.
const ENERGY_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct SpeechDetector {
    config: VadConfig,
    window: WindowDetector,
    buffer: FrameBuffer,
    state: VadMachineState,
    confirmed_start_frame: Option<usize>,
    confirmed_end_frame: Option<usize>,
    continuous_silence_frames: usize,
    latest_confirmed_speech_frame: usize,
    latest_confirmed_silence_frame: Option<usize>,
    end_points_detected: usize,
    noise_average_db: Option<f64>,
    /// Frames consumed since the last full reset; the global index of the
    /// next chunk's first frame.
    frame_cursor: usize,
    frame_probs: Vec<FrameProbability>,
    start_latency_frames: usize,
    max_segment_frames: usize,
    lookahead_end_frames: usize,
}

impl SpeechDetector {
    pub fn new(config: VadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: WindowDetector::from_config(&config),
            buffer: FrameBuffer::new(&config),
            state: VadMachineState::StartNotDetected,
            confirmed_start_frame: None,
            confirmed_end_frame: None,
            continuous_silence_frames: 0,
            latest_confirmed_speech_frame: 0,
            latest_confirmed_silence_frame: None,
            end_points_detected: 0,
            noise_average_db: None,
            frame_cursor: 0,
            frame_probs: Vec::new(),
            start_latency_frames: config.start_latency_frames(),
            max_segment_frames: config.max_segment_frames(),
            lookahead_end_frames: config.lookahead_end_frames(),
            config,
        })
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn state(&self) -> VadMachineState {
        self.state
    }

    /// Global index of the next frame to be processed.
    pub fn frames_processed(&self) -> usize {
        self.frame_cursor
    }

    /// Frame probabilities recorded in the current episode. Always empty
    /// unless `emit_frame_probs` is set.
    pub fn frame_probs(&self) -> &[FrameProbability] {
        &self.frame_probs
    }

    /// Sample bookkeeping shortfalls clamped since the last full reset.
    pub fn clamp_count(&self) -> usize {
        self.buffer.clamp_count()
    }

    /// Consume one chunk of scores and its raw samples.
    ///
    /// `scores` has shape `(1, frames, classes)`; `waveform` holds the
    /// samples those frames were computed from. `max_end_silence_ms`
    /// overrides the configured trailing-silence budget for this call. With
    /// `is_final` the open segment is closed, every remaining window is
    /// returned, and the detector is reset for a new stream.
    ///
    /// Shape errors are reported before any state changes.
    pub fn process(
        &mut self,
        scores: ArrayView3<'_, f32>,
        waveform: &[f32],
        is_final: bool,
        max_end_silence_ms: u64,
        online: bool,
    ) -> Result<Vec<TimeWindow>> {
        let (batch, frames, classes) = scores.dim();
        if batch != 1 {
            return Err(CadenceError::UnsupportedBatch(batch));
        }
        if let Some(&index) = self
            .config
            .silence_class_ids
            .iter()
            .find(|&&id| id >= classes)
        {
            return Err(CadenceError::SilenceClassOutOfRange { index, classes });
        }

        let decibels = self.frame_decibels(waveform);
        if decibels.len() != frames {
            debug!(
                scored = frames,
                measured = decibels.len(),
                "score and waveform frame counts differ"
            );
        }
        let scores = scores.index_axis(Axis(0), 0);

        self.buffer.append_samples(waveform.len());
        let chunk_start = self.frame_cursor;
        if self.state == VadMachineState::EndPointDetected {
            debug!(chunk_start, frames, "end point already detected; skipping chunk");
        } else {
            for k in 0..frames {
                let frame = chunk_start + k;
                let classification = match decibels.get(k) {
                    Some(&db) => self.classify_frame(frame, db, scores.row(k)),
                    None => FrameClassification::Invalid,
                };
                self.detect_one_frame(
                    frame,
                    classification,
                    is_final && k + 1 == frames,
                    max_end_silence_ms,
                );
            }
        }

        Ok(self.finish_chunk(frames, is_final, online))
    }

    /// Advance over a chunk the scorer could not score.
    ///
    /// Every frame is `Invalid`, so no boundary decisions are made, but the
    /// frame clock and sample accounting stay aligned with the audio.
    pub fn advance_unscored(
        &mut self,
        waveform: &[f32],
        is_final: bool,
        max_end_silence_ms: u64,
        online: bool,
    ) -> Vec<TimeWindow> {
        let frames = self.frame_decibels(waveform).len();
        self.buffer.append_samples(waveform.len());
        if self.state != VadMachineState::EndPointDetected {
            let chunk_start = self.frame_cursor;
            for k in 0..frames {
                self.detect_one_frame(
                    chunk_start + k,
                    FrameClassification::Invalid,
                    is_final && k + 1 == frames,
                    max_end_silence_ms,
                );
            }
        }
        self.finish_chunk(frames, is_final, online)
    }

    /// Return to the freshly constructed state.
    pub fn reset(&mut self) {
        self.reset_episode();
        self.buffer.clear();
        self.end_points_detected = 0;
        self.noise_average_db = None;
        self.frame_cursor = 0;
    }

    fn finish_chunk(&mut self, frames: usize, is_final: bool, online: bool) -> Vec<TimeWindow> {
        self.frame_cursor += frames;
        if is_final {
            if let Some(last) = self.frame_cursor.checked_sub(1) {
                self.end_stream_at(last);
            }
        }

        let windows = self.buffer.take_windows(is_final, online);
        debug!(
            frames,
            cursor = self.frame_cursor,
            windows = windows.len(),
            is_final,
            "chunk processed"
        );
        if is_final {
            self.reset();
        }
        windows
    }

    /// Apply the end-of-stream rules at `last` when the final chunk did not
    /// reach them itself: it held no frames, or its last frame abstained.
    fn end_stream_at(&mut self, last: usize) {
        match self.state {
            VadMachineState::StartNotDetected if self.end_points_detected == 0 => {
                debug!(last, "stream ended before any speech");
                self.silence_before_start(last, true);
            }
            VadMachineState::InSpeechSegment => {
                debug!(last, "stream ended inside speech; closing open segment");
                if self.buffer.low_water_mark() > last {
                    // The last frame is already confirmed; seal the segment there.
                    self.confirmed_end_frame.get_or_insert(last);
                    self.buffer.close_last_segment();
                    self.end_points_detected += 1;
                } else {
                    self.on_voice_end(last, false, true);
                }
                self.state = VadMachineState::EndPointDetected;
            }
            _ => {}
        }
    }

    fn reset_episode(&mut self) {
        self.window.reset();
        self.state = VadMachineState::StartNotDetected;
        self.confirmed_start_frame = None;
        self.confirmed_end_frame = None;
        self.continuous_silence_frames = 0;
        self.latest_confirmed_speech_frame = 0;
        self.latest_confirmed_silence_frame = None;
        self.frame_probs.clear();
    }

    fn frame_decibels(&self, waveform: &[f32]) -> Vec<f64> {
        let frame_len = self.config.frame_length_samples();
        let shift = self.config.frame_shift_samples();
        if waveform.len() < frame_len {
            return Vec::new();
        }
        waveform
            .windows(frame_len)
            .step_by(shift)
            .map(|frame| {
                let energy: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
                10.0 * (energy + ENERGY_FLOOR).log10()
            })
            .collect()
    }

    fn classify_frame(
        &mut self,
        frame: usize,
        decibel: f64,
        scores: ArrayView1<'_, f32>,
    ) -> FrameClassification {
        let cfg = &self.config;
        if decibel < cfg.decibel_threshold {
            return FrameClassification::Silence;
        }

        let silence_mass: f64 = cfg
            .silence_class_ids
            .iter()
            .map(|&id| f64::from(scores[id]))
            .sum();
        let noise_prob = silence_mass.ln() * cfg.speech_to_noise_ratio;
        let speech_prob = (1.0 - silence_mass).ln();
        if cfg.emit_frame_probs {
            self.frame_probs.push(FrameProbability {
                frame,
                speech_prob,
                noise_prob,
                score: 1.0 - silence_mass,
            });
        }

        if speech_prob.exp() >= noise_prob.exp() + cfg.speech_noise_margin {
            let snr = decibel - self.noise_average_db.unwrap_or(INITIAL_NOISE_DB);
            if snr >= cfg.snr_threshold && decibel >= cfg.decibel_threshold {
                FrameClassification::Speech
            } else {
                FrameClassification::Silence
            }
        } else {
            let n = f64::from(cfg.noise_window_frames);
            self.noise_average_db = Some(match self.noise_average_db {
                None => decibel,
                Some(avg) => (decibel + avg * (n - 1.0)) / n,
            });
            FrameClassification::Silence
        }
    }

    fn detect_one_frame(
        &mut self,
        frame: usize,
        classification: FrameClassification,
        final_frame: bool,
        max_end_silence_ms: u64,
    ) {
        let Some(event) = self.window.detect_one_frame(classification, frame) else {
            return;
        };

        match (event, self.state) {
            (ChangeEvent::Sil2Speech, VadMachineState::StartNotDetected) => {
                self.continuous_silence_frames = 0;
                let start = self
                    .buffer
                    .low_water_mark()
                    .max(frame.saturating_sub(self.start_latency_frames));
                self.on_voice_start(start);
                self.state = VadMachineState::InSpeechSegment;
                for t in start + 1..=frame {
                    self.on_voice_detected(t);
                }
            }
            (
                ChangeEvent::Sil2Speech | ChangeEvent::Speech2Speech,
                VadMachineState::InSpeechSegment,
            ) => {
                self.continuous_silence_frames = 0;
                for t in self.latest_confirmed_speech_frame + 1..frame {
                    self.on_voice_detected(t);
                }
                self.continue_segment(frame, final_frame);
            }
            (ChangeEvent::Speech2Sil, VadMachineState::InSpeechSegment) => {
                self.continuous_silence_frames = 0;
                self.continue_segment(frame, final_frame);
            }
            (ChangeEvent::Sil2Sil, VadMachineState::StartNotDetected) => {
                self.continuous_silence_frames += 1;
                self.silence_before_start(frame, final_frame);
            }
            (ChangeEvent::Sil2Sil, VadMachineState::InSpeechSegment) => {
                self.continuous_silence_frames += 1;
                self.silence_in_segment(frame, final_frame, max_end_silence_ms);
            }
            (ChangeEvent::Sil2Sil, _) => self.continuous_silence_frames += 1,
            (ChangeEvent::Sil2Speech | ChangeEvent::Speech2Speech | ChangeEvent::Speech2Sil, _) => {
                self.continuous_silence_frames = 0;
            }
        }

        if self.state == VadMachineState::EndPointDetected
            && self.config.detect_mode == DetectMode::MultipleUtterance
        {
            self.reset_episode();
        }
    }

    /// Speech (or a not yet confirmed silence) inside an open segment.
    fn continue_segment(&mut self, frame: usize, final_frame: bool) {
        if self.exceeds_max_segment(frame) {
            self.on_voice_end(frame, false, false);
            self.state = VadMachineState::EndPointDetected;
        } else if !final_frame {
            self.on_voice_detected(frame);
        } else {
            self.end_on_final_frame(frame, final_frame);
        }
    }

    fn silence_before_start(&mut self, frame: usize, final_frame: bool) {
        let start_timed_out = self.config.detect_mode == DetectMode::SingleUtterance
            && self.continuous_silence_frames as u64 * self.config.frame_shift_ms
                > self.config.max_start_silence_ms;
        if start_timed_out || (final_frame && self.end_points_detected == 0) {
            let first = self.latest_confirmed_silence_frame.map_or(0, |f| f + 1);
            for t in first..frame {
                self.on_silence_detected(t);
            }
            debug!(frame, start_timed_out, "no speech found; emitting empty segment");
            self.confirmed_start_frame = Some(0);
            self.buffer.open_empty_segment(0);
            self.on_voice_end(0, true, false);
            self.buffer.close_last_segment();
            self.state = VadMachineState::EndPointDetected;
        } else if frame >= self.start_latency_frames {
            self.on_silence_detected(frame - self.start_latency_frames);
        }
    }

    fn silence_in_segment(&mut self, frame: usize, final_frame: bool, max_end_silence_ms: u64) {
        let frame_ms = self.config.frame_shift_ms as i64;
        let budget_ms = max_end_silence_ms as i64 - self.config.speech_to_sil_ms as i64;
        if self.continuous_silence_frames as i64 * frame_ms >= budget_ms {
            let mut lookback = budget_ms / frame_ms;
            if self.config.extend {
                lookback -= self.lookahead_end_frames as i64 + 1;
            }
            let lookback = lookback.max(0) as usize;
            self.on_voice_end(frame.saturating_sub(lookback), false, false);
            self.state = VadMachineState::EndPointDetected;
        } else if self.exceeds_max_segment(frame) {
            self.on_voice_end(frame, false, false);
            self.state = VadMachineState::EndPointDetected;
        } else if self.config.extend && !final_frame {
            if self.continuous_silence_frames <= self.lookahead_end_frames {
                self.on_voice_detected(frame);
            }
        } else {
            self.end_on_final_frame(frame, final_frame);
        }
    }

    fn exceeds_max_segment(&self, frame: usize) -> bool {
        self.confirmed_start_frame
            .is_some_and(|start| (frame + 1).saturating_sub(start) > self.max_segment_frames)
    }

    fn end_on_final_frame(&mut self, frame: usize, final_frame: bool) {
        if final_frame {
            self.on_voice_end(frame, false, true);
            self.state = VadMachineState::EndPointDetected;
        }
    }

    fn on_voice_start(&mut self, start_frame: usize) {
        if let Some(existing) = self.confirmed_start_frame {
            warn!(existing, start_frame, "segment start confirmed twice; keeping the first");
        } else {
            self.confirmed_start_frame = Some(start_frame);
        }
        let start = self.confirmed_start_frame.unwrap_or(start_frame);
        self.buffer.confirm_frames(start, 1, true, false, false);
    }

    fn on_voice_detected(&mut self, frame: usize) {
        self.latest_confirmed_speech_frame = frame;
        self.buffer.confirm_frames(frame, 1, false, false, false);
    }

    /// Close the segment at `end_frame`. A synthetic end only advances the
    /// end-point counter; the caller owns the segment it belongs to.
    fn on_voice_end(&mut self, end_frame: usize, synthetic: bool, last_frame: bool) {
        for t in self.latest_confirmed_speech_frame + 1..end_frame {
            self.on_voice_detected(t);
        }
        let end_frame = match self.confirmed_start_frame {
            Some(start) if end_frame < start => {
                debug!(start, end_frame, "end point precedes start; clamping");
                start
            }
            _ => end_frame,
        };
        if let Some(existing) = self.confirmed_end_frame {
            warn!(existing, end_frame, "segment end confirmed twice; keeping the first");
        } else {
            self.confirmed_end_frame = Some(end_frame);
        }
        if !synthetic {
            self.buffer
                .confirm_frames(end_frame, 1, false, true, last_frame);
        }
        self.end_points_detected += 1;
    }

    fn on_silence_detected(&mut self, frame: usize) {
        self.latest_confirmed_silence_frame = Some(frame);
        if self.state == VadMachineState::StartNotDetected {
            self.buffer.pop_till_frame(frame);
        }
    }
}
