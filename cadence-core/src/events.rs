//! Events broadcast by a running `SegmentationEngine`.
//!
//! All payloads serialize with camelCase field names so they can be
//! forwarded as JSON unchanged.

use serde::{Deserialize, Serialize};

use crate::vad::TimeWindow;

/// A segment boundary confirmed by the streaming detector.
///
/// Streaming runs in online mode: a segment is usually announced twice,
/// first with `begin_ms` once its start is confirmed and then with `end_ms`
/// once it closes. A segment confirmed within a single chunk carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub begin_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl SegmentEvent {
    pub fn from_window(seq: u64, window: TimeWindow) -> Self {
        Self {
            seq,
            begin_ms: window.begin_ms,
            end_ms: window.end_ms,
        }
    }
}

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Created, `start()` not yet called.
    Idle,
    /// Pipeline running and accepting audio.
    Listening,
    /// Pipeline drained and finished; the engine may be restarted.
    Stopped,
    /// The scorer or pipeline failed to start.
    Error,
}
