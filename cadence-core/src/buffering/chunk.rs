//! Frame-aligned chunking of a sample stream.

use crate::vad::VadConfig;

/// A contiguous block of mono PCM samples, frame-aligned to the stream.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
}

/// Cuts an arbitrary stream of samples into chunks of a fixed number of
/// frames.
///
/// Each full chunk holds `(chunk_frames - 1) * shift + frame_length`
/// samples. Consecutive chunks overlap by `frame_length - shift` samples, so
/// frame `k` of chunk `n` is global frame `n * chunk_frames + k` and no frame
/// straddles a chunk boundary.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    frame_samples: usize,
    shift_samples: usize,
    chunk_samples: usize,
    advance_samples: usize,
    pending: Vec<f32>,
}

impl ChunkAssembler {
    /// `chunk_frames` is clamped to at least one frame.
    pub fn new(config: &VadConfig, chunk_frames: usize) -> Self {
        let chunk_frames = chunk_frames.max(1);
        let shift = config.frame_shift_samples();
        let chunk_samples = (chunk_frames - 1) * shift + config.frame_length_samples();
        Self {
            frame_samples: config.frame_length_samples(),
            shift_samples: shift,
            chunk_samples,
            advance_samples: chunk_frames * shift,
            pending: Vec::with_capacity(chunk_samples * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Whole frames the pending samples would yield if flushed now.
    pub fn pending_frames(&self) -> usize {
        match self.pending.len().checked_sub(self.frame_samples) {
            Some(extra) => extra / self.shift_samples + 1,
            None => 0,
        }
    }

    /// Take the next full chunk, if enough samples are pending.
    pub fn next_chunk(&mut self) -> Option<AudioChunk> {
        if self.pending.len() < self.chunk_samples {
            return None;
        }
        let samples = self.pending[..self.chunk_samples].to_vec();
        self.pending.drain(..self.advance_samples);
        Some(AudioChunk { samples })
    }

    /// Drain whatever is left as the final, possibly short or empty, chunk.
    pub fn finish(&mut self) -> AudioChunk {
        AudioChunk {
            samples: std::mem::take(&mut self.pending),
        }
    }

    /// Take the next chunk of a stream whose samples have all been pushed,
    /// together with whether it is the last chunk that carries frames.
    ///
    /// A full chunk is reported as last when the samples behind it cannot
    /// form another frame; that sub-frame remainder is dropped. Otherwise
    /// the remainder is returned as the last chunk.
    pub fn next_chunk_of_stream(&mut self) -> Option<(AudioChunk, bool)> {
        if let Some(chunk) = self.next_chunk() {
            let last = self.pending_frames() == 0;
            if last {
                self.pending.clear();
            }
            return Some((chunk, last));
        }
        if self.pending.is_empty() {
            return None;
        }
        Some((self.finish(), true))
    }
}
