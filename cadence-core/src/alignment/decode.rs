//! Greedy decoding of acoustic-model token scores.

use ndarray::ArrayView2;

const BLANK_ID: usize = 0;
const END_OF_SENTENCE_ID: usize = 2;
const UNKNOWN_TOKEN: &str = "<unk>";

/// Pick the best-scoring token id at every step and map ids to strings.
///
/// `am_scores` has shape `(steps, vocabulary)`. Blank and end-of-sentence ids
/// are dropped, the sequence is cut to `valid_token_count - predictor_bias`
/// tokens, and ids outside `token_list` become `<unk>`.
pub fn greedy_decode<S: AsRef<str>>(
    am_scores: ArrayView2<'_, f32>,
    valid_token_count: usize,
    predictor_bias: usize,
    token_list: &[S],
) -> Vec<String> {
    let keep = valid_token_count.saturating_sub(predictor_bias);
    am_scores
        .rows()
        .into_iter()
        .filter_map(|row| {
            let mut best = 0;
            for (id, &score) in row.iter().enumerate().skip(1) {
                if score > row[best] {
                    best = id;
                }
            }
            (!row.is_empty()).then_some(best)
        })
        .filter(|&id| id != BLANK_ID && id != END_OF_SENTENCE_ID)
        .take(keep)
        .map(|id| {
            token_list
                .get(id)
                .map_or(UNKNOWN_TOKEN, |t| t.as_ref())
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    const VOCAB: [&str; 6] = ["<blank>", "<s>", "</s>", "a", "b", "c"];

    #[test]
    fn argmax_skips_blank_and_eos() {
        let scores = array![
            [0.1, 0.0, 0.0, 0.9, 0.0, 0.0],
            [0.9, 0.0, 0.0, 0.1, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.8, 0.2],
            [0.0, 0.0, 0.9, 0.0, 0.0, 0.1],
        ];
        let tokens = greedy_decode(scores.view(), 10, 0, &VOCAB);
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[test]
    fn output_is_cut_to_valid_count_minus_bias() {
        let scores = array![
            [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(greedy_decode(scores.view(), 3, 1, &VOCAB), vec!["a", "b"]);
        assert!(greedy_decode(scores.view(), 1, 1, &VOCAB).is_empty());
    }

    #[test]
    fn ties_pick_the_lowest_id() {
        let scores = array![[0.0, 0.0, 0.0, 0.5, 0.5, 0.0]];
        assert_eq!(greedy_decode(scores.view(), 1, 0, &VOCAB), vec!["a"]);
    }

    #[test]
    fn ids_outside_the_vocabulary_are_unknown() {
        let scores = array![[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]];
        assert_eq!(greedy_decode(scores.view(), 1, 0, &VOCAB), vec!["<unk>"]);
    }
}
