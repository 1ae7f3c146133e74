//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → scratch slice
//! 2. Feed the ChunkAssembler; take every full chunk
//! 3. Score the chunk (FrameScorer), or mark it unscored on failure
//! 4. Run the SpeechDetector in online mode
//! 5. Broadcast one SegmentEvent per reported window
//! ```
//!
//! On stop the ring is drained, the remainder is flushed as the final chunk
//! (closing any open segment), and `Stopped` is reported.
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for I/O.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::{AudioChunk, AudioConsumer, ChunkAssembler, Consumer},
    engine::EngineConfig,
    events::{EngineStatus, EngineStatusEvent, SegmentEvent},
    inference::ScorerHandle,
    vad::{SpeechDetector, TimeWindow},
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub chunks_scored: AtomicUsize,
    pub frames_scored: AtomicUsize,
    pub scoring_errors: AtomicUsize,
    pub segments_emitted: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.chunks_scored.store(0, Ordering::Relaxed);
        self.frames_scored.store(0, Ordering::Relaxed);
        self.scoring_errors.store(0, Ordering::Relaxed);
        self.segments_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            chunks_scored: self.chunks_scored.load(Ordering::Relaxed),
            frames_scored: self.frames_scored.load(Ordering::Relaxed),
            scoring_errors: self.scoring_errors.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub chunks_scored: usize,
    pub frames_scored: usize,
    pub scoring_errors: usize,
    pub segments_emitted: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub scorer: ScorerHandle,
    pub detector: SpeechDetector,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub segment_tx: broadcast::Sender<SegmentEvent>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    /// Set by the engine when the session starts; cleared once this loop
    /// has flushed and reported `Stopped`.
    pub active: Arc<AtomicBool>,
}

/// Clears the session's `active` flag when the loop exits, even by panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Samples drained from the ring per iteration (100 ms at 16 kHz).
const DRAIN_CHUNK: usize = 1_600;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false, then flush.
pub fn run(mut ctx: PipelineContext) {
    let _active = ActiveGuard(Arc::clone(&ctx.active));
    info!(chunk_frames = ctx.config.chunk_frames, "pipeline started");

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut assembler = ChunkAssembler::new(&ctx.config.vad, ctx.config.chunk_frames);

    while ctx.running.load(Ordering::Relaxed) {
        if !drain_once(&mut ctx, &mut raw, &mut assembler) {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
        }
    }

    // Audio pushed before stop() still belongs to this stream.
    while drain_once(&mut ctx, &mut raw, &mut assembler) {}
    let tail = assembler.finish();
    debug!(samples = tail.samples.len(), "flushing final chunk");
    process_chunk(&mut ctx, &tail, true);
    ctx.scorer.0.lock().reset();

    *ctx.status.lock() = EngineStatus::Stopped;
    let _ = ctx.status_tx.send(EngineStatusEvent {
        status: EngineStatus::Stopped,
        detail: None,
    });

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        chunks_scored = snap.chunks_scored,
        frames_scored = snap.frames_scored,
        scoring_errors = snap.scoring_errors,
        segments_emitted = snap.segments_emitted,
        "pipeline stopped, diagnostics"
    );
}

/// Move one batch of samples from the ring into the assembler and process
/// every chunk that became complete. Returns `false` when the ring was empty.
fn drain_once(ctx: &mut PipelineContext, raw: &mut [f32], assembler: &mut ChunkAssembler) -> bool {
    let n = ctx.consumer.pop_slice(raw);
    if n == 0 {
        return false;
    }
    ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);
    assembler.push(&raw[..n]);
    while let Some(chunk) = assembler.next_chunk() {
        process_chunk(ctx, &chunk, false);
    }
    true
}

fn process_chunk(ctx: &mut PipelineContext, chunk: &AudioChunk, is_final: bool) {
    let max_end_silence_ms = ctx.config.vad.max_end_silence_ms;
    let scored = ctx.scorer.0.lock().score(&chunk.samples);

    let windows = match scored.and_then(|scores| {
        ctx.diagnostics.chunks_scored.fetch_add(1, Ordering::Relaxed);
        ctx.diagnostics
            .frames_scored
            .fetch_add(scores.dim().1, Ordering::Relaxed);
        ctx.detector.process(
            scores.view(),
            &chunk.samples,
            is_final,
            max_end_silence_ms,
            true,
        )
    }) {
        Ok(windows) => windows,
        Err(e) => {
            ctx.diagnostics
                .scoring_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %e,
                samples = chunk.samples.len(),
                "chunk could not be scored; no boundary decisions for it"
            );
            ctx.detector
                .advance_unscored(&chunk.samples, is_final, max_end_silence_ms, true)
        }
    };

    debug!(
        samples = chunk.samples.len(),
        windows = windows.len(),
        is_final,
        "processed chunk"
    );
    for window in windows {
        emit_segment(ctx, window);
    }
}

fn emit_segment(ctx: &mut PipelineContext, window: TimeWindow) {
    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let event = SegmentEvent::from_window(seq, window);
    debug!(
        seq,
        begin_ms = ?event.begin_ms,
        end_ms = ?event.end_ms,
        "segment boundary"
    );
    let _ = ctx.segment_tx.send(event);
    ctx.diagnostics
        .segments_emitted
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use ndarray::Array3;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::buffering::{create_audio_ring, Producer};
    use crate::error::{CadenceError, Result};
    use crate::inference::{EnergyScorer, FrameScorer};
    use crate::vad::VadConfig;

    /// Scorer that fails every call.
    struct BrokenScorer {
        calls: Arc<AtomicUsize>,
    }

    impl FrameScorer for BrokenScorer {
        fn score(&mut self, _samples: &[f32]) -> Result<Array3<f32>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(CadenceError::Scoring("intentional test failure".into()))
        }

        fn reset(&mut self) {}
    }

    fn silence(ms: usize) -> Vec<f32> {
        vec![0.0; ms * 16]
    }

    fn tone(ms: usize) -> Vec<f32> {
        (0..ms * 16)
            .map(|i| if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect()
    }

    fn context(
        scorer: ScorerHandle,
        running: Arc<AtomicBool>,
    ) -> (
        PipelineContext,
        crate::buffering::AudioProducer,
        broadcast::Receiver<SegmentEvent>,
        broadcast::Receiver<EngineStatusEvent>,
    ) {
        let (producer, consumer) = create_audio_ring();
        let (segment_tx, segment_rx) = broadcast::channel(16);
        let (status_tx, status_rx) = broadcast::channel(8);
        let config = EngineConfig::default();
        let ctx = PipelineContext {
            detector: SpeechDetector::new(config.vad.clone()).expect("valid config"),
            config,
            scorer,
            consumer,
            running,
            segment_tx,
            status_tx,
            status: Arc::new(Mutex::new(EngineStatus::Listening)),
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            active: Arc::new(AtomicBool::new(true)),
        };
        (ctx, producer, segment_rx, status_rx)
    }

    fn energy_scorer() -> ScorerHandle {
        ScorerHandle::new(EnergyScorer::from_config(&VadConfig::default()))
    }

    fn recv_event_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("channel closed unexpectedly"),
            }
        }
    }

    fn wait_for_stopped(rx: &mut broadcast::Receiver<EngineStatusEvent>) {
        loop {
            let ev = recv_event_with_timeout(rx, Duration::from_secs(2));
            if ev.status == EngineStatus::Stopped {
                return;
            }
        }
    }

    #[test]
    fn run_reports_start_then_end_while_listening() {
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut producer, mut segment_rx, _status_rx) =
            context(energy_scorer(), Arc::clone(&running));
        producer.push_slice(&silence(1_000));
        producer.push_slice(&tone(2_000));
        producer.push_slice(&silence(1_500));

        let handle = thread::spawn(move || run(ctx));

        let first = recv_event_with_timeout(&mut segment_rx, Duration::from_secs(2));
        let second = recv_event_with_timeout(&mut segment_rx, Duration::from_secs(2));

        running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert_eq!(first.seq, 0);
        assert_eq!(first.begin_ms, Some(720));
        assert_eq!(first.end_ms, None);
        assert_eq!(second.seq, 1);
        assert_eq!(second.begin_ms, None);
        assert_eq!(second.end_ms, Some(3_160));
    }

    #[test]
    fn stop_flushes_open_segment_as_final() {
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut producer, mut segment_rx, mut status_rx) =
            context(energy_scorer(), Arc::clone(&running));
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let status = Arc::clone(&ctx.status);
        producer.push_slice(&silence(1_000));
        producer.push_slice(&tone(1_000));

        running.store(false, Ordering::SeqCst);
        let handle = thread::spawn(move || run(ctx));
        wait_for_stopped(&mut status_rx);
        handle.join().expect("pipeline thread panicked");

        let event = recv_event_with_timeout(&mut segment_rx, Duration::from_millis(200));
        assert_eq!(event.begin_ms, Some(720));
        assert_eq!(event.end_ms, Some(1_980));
        assert!(matches!(segment_rx.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(*status.lock(), EngineStatus::Stopped);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.samples_in, 32_000);
        assert_eq!(snap.frames_scored, 198);
        assert_eq!(snap.segments_emitted, 1);
        assert_eq!(snap.scoring_errors, 0);
    }

    #[test]
    fn scoring_failures_skip_decisions_but_keep_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scorer = ScorerHandle::new(BrokenScorer {
            calls: Arc::clone(&calls),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut producer, mut segment_rx, mut status_rx) =
            context(scorer, Arc::clone(&running));
        let diagnostics = Arc::clone(&ctx.diagnostics);
        producer.push_slice(&tone(3_000));

        running.store(false, Ordering::SeqCst);
        let handle = thread::spawn(move || run(ctx));
        wait_for_stopped(&mut status_rx);
        handle.join().expect("pipeline thread panicked");

        // No frame was ever classified, so the stream ends without speech.
        let event = recv_event_with_timeout(&mut segment_rx, Duration::from_millis(200));
        assert_eq!((event.begin_ms, event.end_ms), (Some(0), Some(0)));
        assert!(matches!(segment_rx.try_recv(), Err(TryRecvError::Empty)));
        let snap = diagnostics.snapshot();
        assert_eq!(snap.scoring_errors, calls.load(Ordering::Relaxed));
        assert!(snap.scoring_errors >= 3);
        assert_eq!(snap.chunks_scored, 0);
    }

    #[test]
    fn session_is_inactive_only_after_stopped_is_reported() {
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut producer, _segment_rx, mut status_rx) =
            context(energy_scorer(), Arc::clone(&running));
        let active = Arc::clone(&ctx.active);
        producer.push_slice(&tone(500));

        let handle = thread::spawn(move || run(ctx));
        thread::sleep(Duration::from_millis(20));
        assert!(active.load(Ordering::SeqCst));

        running.store(false, Ordering::SeqCst);
        wait_for_stopped(&mut status_rx);
        handle.join().expect("pipeline thread panicked");
        assert!(!active.load(Ordering::SeqCst));
    }
}
