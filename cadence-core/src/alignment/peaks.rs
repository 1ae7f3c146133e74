//! Firing positions to per-token time windows.

use tracing::warn;

use super::TokenWindow;
use crate::error::{CadenceError, Result};

/// Duration of one peak frame (10 ms features, 6x frame stacking, 3x
/// predictor upsampling).
pub const PEAK_FRAME_MS: i64 = 20;

/// A frame fires when its peak value exceeds this.
const FIRE_THRESHOLD: f32 = 1.0 - 1e-4;

/// The predictor fires one frame after the token it marks.
const FIRE_LATENCY_FRAMES: i64 = 1;

/// Leading or trailing gaps longer than this many frames are silence.
const START_END_THRESHOLD: i64 = 5;

/// Longest span, in frames, a single token may cover.
const MAX_TOKEN_FRAMES: i64 = 30;

const END_OF_SENTENCE: &str = "</s>";

/// Frame indices where the peak signal fires, latency-corrected.
/// May contain `-1` when the first frame fires.
pub fn fire_positions(peaks: &[f32]) -> Vec<i64> {
    peaks
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > FIRE_THRESHOLD)
        .map(|(i, _)| i as i64 - FIRE_LATENCY_FRAMES)
        .collect()
}

struct Span {
    begin_ms: i64,
    end_ms: i64,
    /// `None` for silence.
    token: Option<usize>,
}

/// Assign each token the span between its firing position and the next.
///
/// A token whose span would exceed 30 frames keeps the first 30 and the
/// rest becomes silence. The last token runs to the end of the signal, or to
/// the midpoint of the tail when the tail is longer than 5 frames. Silence
/// spans are dropped from the result.
///
/// # Errors
/// `AlignmentMismatch` when there are fewer tokens than firing intervals.
/// Surplus tokens are dropped with a warning.
pub fn token_windows<S: AsRef<str>>(
    peaks: &[f32],
    tokens: &[S],
    begin_offset_ms: u64,
) -> Result<Vec<TokenWindow>> {
    let fires = fire_positions(peaks);
    if fires.len() < 2 {
        warn!(fires = fires.len(), "peak signal fires fewer than twice; no alignment");
        return Ok(Vec::new());
    }

    let tokens = match tokens.split_last() {
        Some((last, rest)) if last.as_ref() == END_OF_SENTENCE => rest,
        _ => tokens,
    };
    let intervals = fires.len() - 1;
    if tokens.len() < intervals {
        return Err(CadenceError::AlignmentMismatch {
            tokens: tokens.len(),
            windows: intervals,
        });
    }
    if tokens.len() > intervals {
        warn!(
            tokens = tokens.len(),
            windows = intervals,
            "more tokens than firing intervals; dropping the surplus"
        );
    }

    let mut spans = Vec::with_capacity(intervals + 2);
    if fires[0] > START_END_THRESHOLD {
        spans.push(Span {
            begin_ms: 0,
            end_ms: fires[0] * PEAK_FRAME_MS,
            token: None,
        });
    }
    for i in 0..intervals {
        let (current, next) = (fires[i], fires[i + 1]);
        if i + 1 == intervals || next - current < MAX_TOKEN_FRAMES {
            spans.push(Span {
                begin_ms: current * PEAK_FRAME_MS,
                end_ms: next * PEAK_FRAME_MS,
                token: Some(i),
            });
        } else {
            let split = current + MAX_TOKEN_FRAMES;
            spans.push(Span {
                begin_ms: current * PEAK_FRAME_MS,
                end_ms: split * PEAK_FRAME_MS,
                token: Some(i),
            });
            spans.push(Span {
                begin_ms: split * PEAK_FRAME_MS,
                end_ms: next * PEAK_FRAME_MS,
                token: None,
            });
        }
    }

    let total_frames = peaks.len() as i64;
    let last_fire = fires[intervals];
    let signal_end_ms = total_frames * PEAK_FRAME_MS;
    let last_end_ms = if total_frames - last_fire > START_END_THRESHOLD {
        // Midpoint of the tail, in ms.
        (total_frames + last_fire) * PEAK_FRAME_MS / 2
    } else {
        signal_end_ms
    };
    if let Some(last) = spans.last_mut() {
        last.end_ms = last_end_ms;
    }

    let offset = begin_offset_ms as i64;
    let to_ms = |ms: i64| (ms + offset).max(0) as u64;
    Ok(spans
        .into_iter()
        .filter_map(|span| {
            span.token.map(|i| TokenWindow {
                token: tokens[i].as_ref().to_string(),
                begin_ms: to_ms(span.begin_ms),
                end_ms: to_ms(span.end_ms),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaks_at(frames: usize, fires: &[usize]) -> Vec<f32> {
        let mut peaks = vec![0.0; frames];
        for &f in fires {
            peaks[f] = 1.0;
        }
        peaks
    }

    fn bounds(windows: &[TokenWindow]) -> Vec<(u64, u64)> {
        windows.iter().map(|w| (w.begin_ms, w.end_ms)).collect()
    }

    #[test]
    fn fire_positions_are_shifted_one_frame() {
        let peaks = peaks_at(20, &[0, 5, 9]);
        assert_eq!(fire_positions(&peaks), vec![-1, 4, 8]);
    }

    #[test]
    fn near_one_counts_as_firing() {
        assert_eq!(fire_positions(&[0.99995, 0.999]), vec![-1]);
    }

    #[test]
    fn windows_follow_consecutive_fires() {
        // Fires at 3, 7, 11 after the shift; tail of 9 frames is split.
        let peaks = peaks_at(20, &[4, 8, 12]);
        let windows = token_windows(&peaks, &["a", "b"], 0).unwrap();
        assert_eq!(bounds(&windows), vec![(60, 140), (140, 310)]);
        assert_eq!(windows[1].token, "b");
    }

    #[test]
    fn short_tail_stretches_last_token_to_the_end() {
        let peaks = peaks_at(15, &[4, 8, 12]);
        let windows = token_windows(&peaks, &["a", "b"], 0).unwrap();
        assert_eq!(windows[1].end_ms, 300);
    }

    #[test]
    fn long_token_is_capped() {
        let peaks = peaks_at(100, &[4, 60, 70]);
        let windows = token_windows(&peaks, &["a", "b"], 0).unwrap();
        assert_eq!(bounds(&windows)[0], (60, 660));
        assert_eq!(windows[1].begin_ms, 1180);
    }

    #[test]
    fn offset_and_negative_clamp() {
        let peaks = peaks_at(10, &[0, 4, 8]);
        let plain = token_windows(&peaks, &["a", "b"], 0).unwrap();
        assert_eq!(plain[0].begin_ms, 0);

        let shifted = token_windows(&peaks, &["a", "b"], 1_000).unwrap();
        assert_eq!(shifted[0].begin_ms, 980);
        assert_eq!(shifted[1].begin_ms, plain[1].begin_ms + 1_000);
    }

    #[test]
    fn end_of_sentence_token_is_ignored() {
        let peaks = peaks_at(20, &[4, 8, 12]);
        let windows = token_windows(&peaks, &["a", "b", "</s>"], 0).unwrap();
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn missing_tokens_are_an_error() {
        let peaks = peaks_at(20, &[4, 8, 12]);
        let err = token_windows(&peaks, &["a"], 0).unwrap_err();
        assert!(matches!(
            err,
            CadenceError::AlignmentMismatch {
                tokens: 1,
                windows: 2
            }
        ));
    }

    #[test]
    fn surplus_tokens_are_dropped() {
        let peaks = peaks_at(20, &[4, 8, 12]);
        let windows = token_windows(&peaks, &["a", "b", "c"], 0).unwrap();
        assert_eq!(windows.len(), 2);
    }
}
