//! `SegmentationEngine`: streaming lifecycle around a `SpeechDetector`.
//!
//! ## Lifecycle
//!
//! ```text
//! SegmentationEngine::new()
//!     └─► warm_up()          → scorer ready
//!         └─► start()        → ring + pipeline spawned, status = Listening
//!             └─► stop()     → running=false; the pipeline drains the ring,
//!                              flushes the tail as final, status = Stopped
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than
//! panicking. Offline use does not need an engine; see `segment_waveform`.

pub mod batch;
pub mod pipeline;

pub use batch::segment_waveform;

use std::fs;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    buffering::{create_audio_ring, AudioProducer},
    error::{CadenceError, Result},
    events::{EngineStatus, EngineStatusEvent, SegmentEvent},
    inference::ScorerHandle,
    vad::{SpeechDetector, VadConfig},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Detector settings plus how the sample stream is chunked for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub vad: VadConfig,
    /// Frames scored per chunk. Larger chunks mean fewer scorer calls and
    /// later online boundaries. Default: 100 (1 s at a 10 ms shift).
    pub chunk_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            chunk_frames: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.vad.validate()?;
        if self.chunk_frames == 0 {
            return Err(CadenceError::invalid_config(
                "chunk_frames",
                "a chunk must hold at least one frame",
            ));
        }
        Ok(())
    }
}

/// The top-level streaming handle.
///
/// `SegmentationEngine` is `Send + Sync`; all fields use interior mutability.
pub struct SegmentationEngine {
    config: EngineConfig,
    scorer: ScorerHandle,
    /// `true` while the pipeline accepts audio.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    segment_tx: broadcast::Sender<SegmentEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    /// `true` from `start()` until the pipeline has flushed and reported
    /// `Stopped`; outlives `running` by the final flush.
    pipeline_active: Arc<AtomicBool>,
}

impl SegmentationEngine {
    /// Create an idle engine. Fails on an invalid config.
    pub fn new(config: EngineConfig, scorer: ScorerHandle) -> Result<Self> {
        config.validate()?;
        let (segment_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config,
            scorer,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            segment_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            pipeline_active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepare the scorer. Optional; call before `start()`.
    pub fn warm_up(&self) -> Result<()> {
        info!("warming up frame scorer");
        if let Err(e) = self.scorer.0.lock().warm_up() {
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        info!("frame scorer ready");
        Ok(())
    }

    /// Spawn the pipeline and return the producer that feeds it.
    ///
    /// Must be called from within a Tokio runtime; the pipeline runs on the
    /// runtime's blocking pool.
    ///
    /// # Errors
    /// - `CadenceError::AlreadyRunning` if already started, or while the
    ///   previous session is still flushing after `stop()`.
    /// - `CadenceError::Other` when no Tokio runtime is available.
    pub fn start(&self) -> Result<AudioProducer> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CadenceError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CadenceError::Other(anyhow::anyhow!("no tokio runtime: {e}")))?;
        let detector = SpeechDetector::new(self.config.vad.clone())?;

        if self
            .pipeline_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous session has not finished flushing");
            return Err(CadenceError::AlreadyRunning);
        }
        let (producer, consumer) = create_audio_ring();

        self.diagnostics.reset();
        self.seq.store(0, Ordering::SeqCst);
        self.scorer.0.lock().reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Listening, None);

        let ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            scorer: self.scorer.clone(),
            detector,
            consumer,
            running: Arc::clone(&self.running),
            segment_tx: self.segment_tx.clone(),
            status_tx: self.status_tx.clone(),
            status: Arc::clone(&self.status),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
            active: Arc::clone(&self.pipeline_active),
        };
        runtime.spawn_blocking(move || pipeline::run(ctx));

        info!(
            chunk_frames = self.config.chunk_frames,
            sample_rate = self.config.vad.sample_rate,
            "engine started, listening"
        );
        Ok(producer)
    }

    /// Ask the pipeline to finish. Audio already in the ring is still
    /// processed; `Stopped` is reported once the final chunk is flushed, and
    /// only then can the engine be started again.
    ///
    /// # Errors
    /// - `CadenceError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(CadenceError::NotRunning);
        }
        info!("engine stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentEvent> {
        self.segment_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl std::fmt::Debug for SegmentationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationEngine")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
