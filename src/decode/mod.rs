pub mod beam;
pub mod greedy;

pub use beam::{beam_search, BeamOutcome, BeamSearchConfig, ScoredPath};
pub use greedy::{greedy_decode, greedy_path};

use crate::alphabet::Alphabet;

/// A per-step symbol path collapsed into runs, plus the blank-free label
/// codes they spell.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSequence {
    /// Consecutive (code, run-length) pairs, blanks included.
    pub runs: Vec<(i64, usize)>,
    /// Collapsed label codes: repeats merged, blanks dropped. A repeat
    /// separated by a blank run survives as two symbols.
    pub codes: Vec<i64>,
}

/// CTC collapsing: merge consecutive duplicates into runs, then drop blank
/// runs. Applied only to finalized paths.
pub fn collapse_path(path: &[i64], blank: i64) -> DecodedSequence {
    let mut runs: Vec<(i64, usize)> = Vec::new();
    for &code in path {
        match runs.last_mut() {
            Some((last, count)) if *last == code => *count += 1,
            _ => runs.push((code, 1)),
        }
    }
    let codes = runs
        .iter()
        .filter(|(code, _)| *code != blank)
        .map(|(code, _)| *code)
        .collect();
    DecodedSequence { runs, codes }
}

/// Render collapsed code sequences as strings through the decode-side
/// alphabet. Each element's length is simply how many symbols it decoded to;
/// nothing is re-derived from image widths.
pub fn words_from_codes(sequences: &[Vec<i64>], alphabet: &Alphabet) -> Vec<String> {
    sequences.iter().map(|codes| alphabet.decode(codes)).collect()
}

#[cfg(test)]
mod tests {
    use crate::alphabet::{Alphabet, AlphabetPreset};

    use super::*;

    const BLANK: i64 = 10;

    #[test]
    fn collapse_merges_repeats_and_drops_blanks() {
        let seq = collapse_path(&[1, 1, BLANK, BLANK, 2, 2, 2, BLANK], BLANK);
        assert_eq!(seq.runs, vec![(1, 2), (BLANK, 2), (2, 3), (BLANK, 1)]);
        assert_eq!(seq.codes, vec![1, 2]);
    }

    #[test]
    fn blank_separated_repeat_survives_collapsing() {
        let seq = collapse_path(&[3, BLANK, 3], BLANK);
        assert_eq!(seq.codes, vec![3, 3]);
        let merged = collapse_path(&[3, 3], BLANK);
        assert_eq!(merged.codes, vec![3]);
    }

    #[test]
    fn empty_and_all_blank_paths_decode_to_nothing() {
        assert!(collapse_path(&[], BLANK).codes.is_empty());
        assert!(collapse_path(&[BLANK, BLANK], BLANK).codes.is_empty());
    }

    #[test]
    fn words_render_through_the_decode_alphabet() {
        let alphabet = Alphabet::from_preset(AlphabetPreset::DigitsOnly);
        let words = words_from_codes(&[vec![1, 2, 3], vec![]], &alphabet);
        assert_eq!(words, vec!["123".to_string(), String::new()]);
    }
}
