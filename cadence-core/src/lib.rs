//! # cadence-core
//!
//! Streaming speech segmentation and subtitle alignment.
//!
//! ## Architecture
//!
//! ```text
//! samples → ChunkAssembler → FrameScorer::score → (1, frames, classes)
//!                                                        │
//!                                   SpeechDetector: dB + posterior → frame class
//!                                                        │
//!                                            WindowDetector (hysteresis)
//!                                                        │
//!                                      start / end state machine → FrameBuffer
//!                                                        │
//!                                                 Vec<TimeWindow>
//! ```
//!
//! Offline callers use `segment_waveform`; live callers start a
//! `SegmentationEngine`, push samples into its ring and subscribe to
//! `SegmentEvent`s. Independently, `alignment::align` turns a token peak
//! signal into timed subtitles.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod alignment;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod inference;
pub mod vad;

// Convenience re-exports for downstream crates
pub use alignment::{align, greedy_decode, Subtitle, TokenWindow};
pub use engine::{segment_waveform, EngineConfig, SegmentationEngine};
pub use error::{CadenceError, Result};
pub use events::{EngineStatus, EngineStatusEvent, SegmentEvent};
pub use inference::{EnergyScorer, FrameScorer, ScorerHandle};
pub use vad::{DetectMode, SpeechDetector, TimeWindow, VadConfig};
