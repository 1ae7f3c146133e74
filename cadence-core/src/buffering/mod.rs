//! Audio buffering.
//!
//! - a lock-free SPSC ring (`ringbuf::HeapRb<f32>`) that carries raw samples
//!   from the caller into the streaming pipeline,
//! - `ChunkAssembler`, which cuts the sample stream into frame-aligned chunks,
//! - `FrameBuffer`, the detector's record of confirmed speech frames.

pub mod chunk;
pub mod frames;

use ringbuf::{traits::Split, HeapRb};

pub use chunk::{AudioChunk, ChunkAssembler};
pub use frames::{FrameBuffer, SpeechSegment};
pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by whoever feeds audio into a running engine.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the pipeline thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^21 samples, a little over two minutes at 16 kHz.
pub const RING_CAPACITY: usize = 1 << 21;

pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_carries_samples_in_order() {
        let (mut producer, mut consumer) = create_audio_ring();
        assert_eq!(producer.push_slice(&[0.1, 0.2, 0.3]), 3);

        let mut out = [0.0f32; 8];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(&out[..n], &[0.1, 0.2, 0.3]);
        assert!(consumer.is_empty());
    }
}
