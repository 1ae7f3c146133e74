//! Sample bookkeeping and the ordered list of confirmed speech segments.
//!
//! The detector confirms frames one at a time (or in short runs). Each
//! confirmation extends the open `SpeechSegment` and advances the low-water
//! mark: the first frame whose samples may still be needed. Samples are not
//! copied; only their counts are tracked, so a shortfall is a bookkeeping
//! inconsistency rather than a data error and is clamped.

use tracing::{debug, warn};

use crate::vad::{TimeWindow, VadConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub contains_start: bool,
    pub contains_end: bool,
}

impl SpeechSegment {
    fn open_at(ms: u64) -> Self {
        Self {
            start_ms: ms,
            end_ms: ms,
            contains_start: false,
            contains_end: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.contains_start && self.contains_end
    }
}

#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frame_ms: u64,
    frame_shift_samples: usize,
    /// Samples a closing frame needs beyond its shift (`frame_length - shift`).
    frame_tail_samples: usize,
    total_samples: usize,
    /// Low-water mark, in frames.
    start_frame: usize,
    segments: Vec<SpeechSegment>,
    read_offset: usize,
    /// Online mode: the next emission starts a new segment.
    awaiting_next_segment: bool,
    clamps: usize,
}

impl FrameBuffer {
    pub fn new(config: &VadConfig) -> Self {
        let frame_shift_samples = config.frame_shift_samples();
        Self {
            frame_ms: config.frame_shift_ms,
            frame_shift_samples,
            frame_tail_samples: config
                .frame_length_samples()
                .saturating_sub(frame_shift_samples),
            total_samples: 0,
            start_frame: 0,
            segments: Vec::new(),
            read_offset: 0,
            awaiting_next_segment: true,
            clamps: 0,
        }
    }

    pub fn append_samples(&mut self, count: usize) {
        self.total_samples += count;
    }

    pub fn low_water_mark(&self) -> usize {
        self.start_frame
    }

    pub fn available_samples(&self) -> usize {
        self.total_samples
            .saturating_sub(self.start_frame * self.frame_shift_samples)
    }

    pub fn segments(&self) -> &[SpeechSegment] {
        &self.segments
    }

    /// Number of bookkeeping shortfalls clamped since the last `clear`.
    pub fn clamp_count(&self) -> usize {
        self.clamps
    }

    /// Release frames before `frame`. Stops early, with a warning, if the
    /// buffered samples run out.
    pub fn pop_till_frame(&mut self, frame: usize) {
        while self.start_frame < frame {
            if self.available_samples() < self.frame_shift_samples {
                self.clamps += 1;
                warn!(
                    low_water_mark = self.start_frame,
                    target_frame = frame,
                    available = self.available_samples(),
                    "buffered samples exhausted before target frame; clamping low-water mark"
                );
                break;
            }
            self.start_frame += 1;
        }
    }

    /// Confirm `frame_count` frames starting at `start_frame` as speech.
    ///
    /// `opens_segment` starts a new segment at `start_frame`; `closes_segment`
    /// marks the end point. `ends_stream` lets the closing frame claim every
    /// remaining buffered sample.
    pub fn confirm_frames(
        &mut self,
        start_frame: usize,
        frame_count: usize,
        opens_segment: bool,
        closes_segment: bool,
        ends_stream: bool,
    ) {
        self.pop_till_frame(start_frame);

        let mut expected = frame_count * self.frame_shift_samples;
        if closes_segment {
            expected += self.frame_tail_samples;
        }
        let available = self.available_samples();
        if ends_stream {
            expected = expected.max(available);
        }
        if available < expected {
            self.clamps += 1;
            warn!(
                start_frame,
                expected, available, "fewer buffered samples than confirmed frames need; clamping"
            );
        }

        let frame_begin_ms = start_frame as u64 * self.frame_ms;
        if opens_segment || self.segments.is_empty() {
            self.segments.push(SpeechSegment::open_at(frame_begin_ms));
        }
        let frame_ms = self.frame_ms;
        let Some(segment) = self.segments.last_mut() else {
            return;
        };
        if segment.contains_end {
            warn!(start_frame, "frame confirmed after its segment closed; ignoring");
            return;
        }
        if segment.end_ms != frame_begin_ms {
            debug!(
                start_frame,
                segment_end_ms = segment.end_ms,
                "confirmed frame does not continue the open segment"
            );
        }

        self.start_frame += frame_count;
        segment.end_ms = segment
            .end_ms
            .max((start_frame + frame_count) as u64 * frame_ms);
        if opens_segment {
            segment.contains_start = true;
        }
        if closes_segment {
            segment.contains_end = true;
        }
    }

    /// Record a zero-length segment at `frame`, start only.
    pub fn open_empty_segment(&mut self, frame: usize) {
        let mut segment = SpeechSegment::open_at(frame as u64 * self.frame_ms);
        segment.contains_start = true;
        self.segments.push(segment);
    }

    /// Mark the newest segment as ended without moving its end. Returns
    /// `false` when there is no open segment.
    pub fn close_last_segment(&mut self) -> bool {
        match self.segments.last_mut() {
            Some(segment) if !segment.contains_end => {
                segment.contains_end = true;
                true
            }
            _ => false,
        }
    }

    /// Read out segments not yet reported.
    ///
    /// Batch mode reports only complete segments, except on the final call
    /// which also flushes the open one. Online mode reports a segment's start
    /// as soon as it exists and its end once it closes.
    pub fn take_windows(&mut self, is_final: bool, online: bool) -> Vec<TimeWindow> {
        let mut windows = Vec::new();
        for i in self.read_offset..self.segments.len() {
            let segment = self.segments[i];
            if online {
                if !segment.contains_start {
                    continue;
                }
                if !self.awaiting_next_segment && !segment.contains_end {
                    continue;
                }
                let begin_ms = self.awaiting_next_segment.then_some(segment.start_ms);
                let end_ms = if segment.contains_end {
                    self.awaiting_next_segment = true;
                    self.read_offset += 1;
                    Some(segment.end_ms)
                } else {
                    self.awaiting_next_segment = false;
                    None
                };
                windows.push(TimeWindow { begin_ms, end_ms });
            } else {
                if !is_final && !segment.is_complete() {
                    continue;
                }
                windows.push(TimeWindow::closed(segment.start_ms, segment.end_ms));
                self.read_offset += 1;
            }
        }
        windows
    }

    pub fn clear(&mut self) {
        self.total_samples = 0;
        self.start_frame = 0;
        self.segments.clear();
        self.read_offset = 0;
        self.awaiting_next_segment = true;
        self.clamps = 0;
    }
}
