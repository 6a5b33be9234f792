use crate::decode::{collapse_path, DecodedSequence};

/// Per-step argmax over classes for one batch element's `(time, classes)`
/// log-probabilities. Cheap diagnostic, not the served prediction.
pub fn greedy_path(log_probs: &[Vec<f32>]) -> Vec<i64> {
    log_probs
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i as i64)
                .unwrap_or(0)
        })
        .collect()
}

/// Greedy best-path decoding: argmax per step, then collapse repeats and
/// drop blanks.
pub fn greedy_decode(log_probs: &[Vec<f32>], blank: i64) -> DecodedSequence {
    collapse_path(&greedy_path(log_probs), blank)
}

/// Cumulative log-probability of a raw path, used to compare decoding
/// strategies.
pub fn path_log_prob(log_probs: &[Vec<f32>], path: &[i64]) -> f32 {
    log_probs
        .iter()
        .zip(path)
        .map(|(row, &code)| row[code as usize])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_picks_argmax_then_collapses() {
        let log_probs = vec![
            vec![-0.1, -3.0, -3.0], // 0
            vec![-0.1, -3.0, -3.0], // 0
            vec![-3.0, -3.0, -0.1], // blank (2)
            vec![-3.0, -0.1, -3.0], // 1
        ];
        let decoded = greedy_decode(&log_probs, 2);
        assert_eq!(decoded.codes, vec![0, 1]);
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        let decoded = greedy_decode(&[], 0);
        assert!(decoded.codes.is_empty());
        assert!(decoded.runs.is_empty());
    }
}
