//! Frame scoring seam.
//!
//! The detector never runs a model itself. A `FrameScorer` turns raw samples
//! into a `(1, frames, classes)` posterior tensor, one row per analysis frame,
//! and the detector only reads the configured silence classes from it.
//!
//! `&mut self` on `score` lets backends carry streaming state (feature
//! caches, recurrent memory). Sharing goes through `ScorerHandle`'s
//! `parking_lot::Mutex`.

pub mod energy;

pub use energy::EnergyScorer;

use std::sync::Arc;

use ndarray::Array3;
use parking_lot::Mutex;

use crate::error::Result;

/// Contract for per-frame acoustic scorers.
pub trait FrameScorer: Send + 'static {
    /// One-time preparation before the first chunk. Defaults to a no-op.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be initialised.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Score one chunk of mono samples.
    ///
    /// Frame `k` of the result must cover samples
    /// `[k * shift, k * shift + frame_length)` of `samples`.
    fn score(&mut self, samples: &[f32]) -> Result<Array3<f32>>;

    /// Drop any streaming state, e.g. between independent streams.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `FrameScorer` implementor.
#[derive(Clone)]
pub struct ScorerHandle(pub Arc<Mutex<dyn FrameScorer>>);

impl ScorerHandle {
    pub fn new<S: FrameScorer>(scorer: S) -> Self {
        Self(Arc::new(Mutex::new(scorer)))
    }
}

impl std::fmt::Debug for ScorerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorerHandle").finish_non_exhaustive()
    }
}
