//! Grouping token windows into subtitles.
//!
//! ## Algorithm
//!
//! 1. Measure the pause before every token after the first.
//! 2. Split wherever the pause exceeds twice the mean pause.
//! 3. Drop splits that would leave a single token on its own: at the start,
//!    at the end, or between two adjacent splits.
//! 4. Break any group longer than 30 tokens into runs of 15. Groups of
//!    16 to 30 tokens are left whole.

use super::{Subtitle, TokenWindow};

/// Groups longer than this are broken up.
const MAX_GROUP_TOKENS: usize = 30;

/// Size of the pieces an over-long group is broken into.
const SPLIT_GROUP_TOKENS: usize = 15;

/// Marker for a sub-word piece that continues into the next token.
const CONTINUATION_MARKER: &str = "@@";

pub fn group_subtitles(windows: &[TokenWindow]) -> Vec<Subtitle> {
    match windows.len() {
        0 => return Vec::new(),
        1 => return vec![subtitle(windows, 0, 1)],
        _ => {}
    }

    let pauses: Vec<f64> = windows
        .windows(2)
        .map(|pair| pair[1].begin_ms as f64 - pair[0].end_ms as f64)
        .collect();
    let threshold = pauses.iter().sum::<f64>() / pauses.len() as f64 * 2.0;

    let mut splits: Vec<usize> = pauses
        .iter()
        .enumerate()
        .filter(|(_, &pause)| pause > threshold)
        .map(|(j, _)| j + 1)
        .collect();
    if splits.first() == Some(&1) {
        splits.remove(0);
    }
    if splits.last() == Some(&pauses.len()) {
        splits.pop();
    }

    let mut j = 0;
    while j + 1 < splits.len() {
        let mut gap = splits[j + 1] - splits[j];
        if gap == 1 {
            splits.remove(j + 1);
            continue;
        }
        if gap > MAX_GROUP_TOKENS {
            while gap > SPLIT_GROUP_TOKENS {
                splits.insert(j + 1, splits[j] + SPLIT_GROUP_TOKENS);
                gap -= SPLIT_GROUP_TOKENS;
                j += 1;
            }
        }
        j += 1;
    }

    let mut bounds = Vec::with_capacity(splits.len() + 2);
    bounds.push(0);
    bounds.extend(splits);
    bounds.push(windows.len());
    bounds
        .windows(2)
        .map(|pair| subtitle(windows, pair[0], pair[1]))
        .collect()
}

/// The subtitle covering `windows[begin..end]`; the range is never empty.
fn subtitle(windows: &[TokenWindow], begin: usize, end: usize) -> Subtitle {
    let group = &windows[begin..end];
    let text: String = group
        .iter()
        .map(|w| w.token.replace(CONTINUATION_MARKER, ""))
        .collect();
    Subtitle {
        text,
        begin_ms: group[0].begin_ms,
        end_ms: group[group.len() - 1].end_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tokens of `token_ms` each, separated by the given pauses.
    fn windows_with_pauses(pauses: &[u64], token_ms: u64) -> Vec<TokenWindow> {
        let mut windows = Vec::new();
        let mut t = 0;
        for i in 0..=pauses.len() {
            windows.push(TokenWindow {
                token: format!("t{i}"),
                begin_ms: t,
                end_ms: t + token_ms,
            });
            t += token_ms + pauses.get(i).copied().unwrap_or(0);
        }
        windows
    }

    fn group_sizes(subs: &[Subtitle], windows: &[TokenWindow]) -> Vec<usize> {
        subs.iter()
            .map(|s| {
                windows
                    .iter()
                    .filter(|w| w.begin_ms >= s.begin_ms && w.end_ms <= s.end_ms)
                    .count()
            })
            .collect()
    }

    #[test]
    fn one_long_pause_gives_two_groups() {
        let windows = windows_with_pauses(&[10, 10, 10, 200, 10, 10], 50);
        let subs = group_subtitles(&windows);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].text, "t0t1t2t3");
        assert_eq!(subs[1].text, "t4t5t6");
        assert_eq!(subs[0].end_ms, windows[3].end_ms);
        assert_eq!(subs[1].begin_ms, windows[4].begin_ms);
        assert_eq!(subs[1].end_ms, windows[6].end_ms);
    }

    #[test]
    fn even_pauses_stay_together() {
        let windows = windows_with_pauses(&[20; 9], 40);
        let subs = group_subtitles(&windows);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].begin_ms, 0);
        assert_eq!(subs[0].end_ms, windows[9].end_ms);
    }

    #[test]
    fn lone_leading_or_trailing_token_is_not_split_off() {
        let windows = windows_with_pauses(&[300, 10, 10, 10, 10], 50);
        assert_eq!(group_subtitles(&windows).len(), 1);

        let windows = windows_with_pauses(&[10, 10, 10, 10, 300], 50);
        assert_eq!(group_subtitles(&windows).len(), 1);
    }

    #[test]
    fn lone_middle_token_is_merged() {
        let windows = windows_with_pauses(&[10, 10, 300, 300, 10, 10], 50);
        let subs = group_subtitles(&windows);
        assert_eq!(subs.len(), 2);
        assert_eq!(group_sizes(&subs, &windows), vec![3, 4]);
    }

    #[test]
    fn over_long_group_is_broken_into_fifteens() {
        let mut pauses = vec![10; 49];
        pauses[4] = 500;
        pauses[44] = 500;
        let windows = windows_with_pauses(&pauses, 50);
        let subs = group_subtitles(&windows);
        assert_eq!(group_sizes(&subs, &windows), vec![5, 15, 15, 10, 5]);
    }

    #[test]
    fn mid_sized_group_is_kept_whole() {
        let mut pauses = vec![10; 39];
        pauses[4] = 500;
        pauses[34] = 500;
        let windows = windows_with_pauses(&pauses, 50);
        let subs = group_subtitles(&windows);
        assert_eq!(group_sizes(&subs, &windows), vec![5, 30, 5]);
    }

    #[test]
    fn continuation_markers_are_removed() {
        let windows = vec![
            TokenWindow {
                token: "hel@@".into(),
                begin_ms: 0,
                end_ms: 100,
            },
            TokenWindow {
                token: "lo".into(),
                begin_ms: 100,
                end_ms: 200,
            },
        ];
        let subs = group_subtitles(&windows);
        assert_eq!(subs[0].text, "hello");
    }

    #[test]
    fn single_and_empty_inputs() {
        assert!(group_subtitles(&[]).is_empty());
        let one = vec![TokenWindow {
            token: "x".into(),
            begin_ms: 10,
            end_ms: 30,
        }];
        assert_eq!(
            group_subtitles(&one),
            vec![Subtitle {
                text: "x".into(),
                begin_ms: 10,
                end_ms: 30
            }]
        );
    }
}
