//! Offline segmentation of a whole utterance.

use tracing::{debug, warn};

use crate::{
    buffering::ChunkAssembler,
    engine::EngineConfig,
    error::Result,
    inference::FrameScorer,
    vad::{SpeechDetector, TimeWindow},
};

/// Segment `samples` chunk by chunk in batch mode.
///
/// The last chunk that carries frames is marked final, so every segment in
/// the result is closed. A chunk the scorer rejects contributes no decisions; the
/// remaining chunks are still processed with correct timing.
///
/// # Errors
/// Fails on an invalid config, or when the scorer returns a tensor the
/// detector cannot read (wrong batch size, too few classes).
pub fn segment_waveform<S: FrameScorer + ?Sized>(
    config: &EngineConfig,
    scorer: &mut S,
    samples: &[f32],
) -> Result<Vec<TimeWindow>> {
    config.validate()?;
    let mut detector = SpeechDetector::new(config.vad.clone())?;
    let mut assembler = ChunkAssembler::new(&config.vad, config.chunk_frames);
    assembler.push(samples);

    let mut windows = Vec::new();
    let mut chunks = 0usize;
    while let Some((chunk, is_final)) = assembler.next_chunk_of_stream() {
        windows.extend(run_chunk(&mut detector, scorer, &chunk.samples, is_final)?);
        chunks += 1;
    }

    debug!(
        samples = samples.len(),
        chunks,
        segments = windows.len(),
        "offline segmentation finished"
    );
    Ok(windows)
}

fn run_chunk<S: FrameScorer + ?Sized>(
    detector: &mut SpeechDetector,
    scorer: &mut S,
    samples: &[f32],
    is_final: bool,
) -> Result<Vec<TimeWindow>> {
    let max_end_silence_ms = detector.config().max_end_silence_ms;
    match scorer.score(samples) {
        Ok(scores) => detector.process(scores.view(), samples, is_final, max_end_silence_ms, false),
        Err(e) => {
            warn!(error = %e, samples = samples.len(), "chunk could not be scored; skipping decisions");
            Ok(detector.advance_unscored(samples, is_final, max_end_silence_ms, false))
        }
    }
}
