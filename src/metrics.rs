//! Streaming evaluation metrics: character error rate and word accuracy.

/// Running mean across evaluation steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingMean {
    sum: f64,
    count: u64,
}

impl StreamingMean {
    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Levenshtein distance between two code sequences.
pub fn edit_distance(a: &[i64], b: &[i64]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Edit distance normalized by the target length. Symbol-exact: both sides
/// must be input-alphabet codes, before any decode-side folding.
pub fn normalized_edit_distance(pred: &[i64], target: &[i64]) -> f64 {
    edit_distance(pred, target) as f64 / target.len().max(1) as f64
}

/// Running character error rate and word accuracy over evaluation batches.
#[derive(Debug, Default)]
pub struct EvalMetrics {
    cer: StreamingMean,
    word_accuracy: StreamingMean,
}

impl EvalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch. Code sequences are input-alphabet codes; words are
    /// both rendered through the decode-side alphabet.
    pub fn record(
        &mut self,
        pred_codes: &[Vec<i64>],
        target_codes: &[Vec<i64>],
        pred_words: &[String],
        target_words: &[String],
    ) {
        for (pred, target) in pred_codes.iter().zip(target_codes) {
            self.cer.update(normalized_edit_distance(pred, target));
        }
        for (pred, target) in pred_words.iter().zip(target_words) {
            self.word_accuracy.update(f64::from(pred == target));
        }
    }

    pub fn character_error_rate(&self) -> f64 {
        self.cer.value()
    }

    pub fn word_accuracy(&self) -> f64 {
        self.word_accuracy.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance(&[], &[]), 0);
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 3]), 1); // deletion
        assert_eq!(edit_distance(&[1, 2], &[1, 2, 3]), 1); // insertion
        assert_eq!(edit_distance(&[1, 2, 3], &[1, 9, 3]), 1); // substitution
        assert_eq!(edit_distance(&[], &[5, 6]), 2);
    }

    #[test]
    fn streaming_mean_accumulates_across_steps() {
        let mut mean = StreamingMean::default();
        assert_eq!(mean.value(), 0.0);
        mean.update(1.0);
        mean.update(0.0);
        mean.update(0.5);
        assert!((mean.value() - 0.5).abs() < 1e-12);
        assert_eq!(mean.count(), 3);
    }

    #[test]
    fn metrics_stream_across_batches() {
        let mut metrics = EvalMetrics::new();
        metrics.record(
            &[vec![1, 2, 3]],
            &[vec![1, 2, 3]],
            &["abc".into()],
            &["abc".into()],
        );
        metrics.record(
            &[vec![1, 2]],
            &[vec![1, 2, 3, 4]],
            &["ab".into()],
            &["abcd".into()],
        );
        // CER: (0 + 2/4) / 2, accuracy: (1 + 0) / 2.
        assert!((metrics.character_error_rate() - 0.25).abs() < 1e-12);
        assert!((metrics.word_accuracy() - 0.5).abs() < 1e-12);
    }
}
