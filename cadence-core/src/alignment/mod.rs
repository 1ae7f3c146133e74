//! Token timing and subtitle grouping.
//!
//! A continuous-integrate-and-fire predictor emits a peak signal in which a
//! value at (or next to) `1.0` marks the frame where a token "fires".
//! `token_windows` turns those firing positions plus the decoded tokens into
//! per-token time windows; `group_subtitles` merges the windows into
//! subtitle-sized spans by splitting at unusually long pauses.

pub mod decode;
pub mod peaks;
pub mod subtitle;

pub use decode::greedy_decode;
pub use peaks::{fire_positions, token_windows};
pub use subtitle::group_subtitles;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One decoded token and the time span it covers, in ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenWindow {
    pub token: String,
    pub begin_ms: u64,
    pub end_ms: u64,
}

/// A run of tokens shown together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub text: String,
    pub begin_ms: u64,
    pub end_ms: u64,
}

/// Align `tokens` against a peak signal and group them into subtitles.
///
/// `begin_offset_ms` shifts every boundary, e.g. to the start of the speech
/// segment the peaks were computed for. The result depends only on the
/// inputs.
pub fn align<S: AsRef<str>>(
    peaks: &[f32],
    tokens: &[S],
    begin_offset_ms: u64,
) -> Result<Vec<Subtitle>> {
    let windows = token_windows(peaks, tokens, begin_offset_ms)?;
    Ok(group_subtitles(&windows))
}
