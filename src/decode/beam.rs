use crate::decode::{collapse_path, DecodedSequence};

#[derive(Debug, Clone)]
pub struct BeamSearchConfig {
    pub beam_width: usize,
    pub top_paths: usize,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam_width: 100,
            top_paths: 2,
        }
    }
}

/// A finalized beam: the collapsed decoding of the best raw path it
/// represents, with that path's cumulative log-probability.
#[derive(Debug, Clone)]
pub struct ScoredPath {
    pub decoded: DecodedSequence,
    pub log_prob: f32,
}

/// Outcome of a beam search over one batch element: up to `top_paths` paths,
/// best first, and the confidence gap between the two best.
#[derive(Debug, Clone)]
pub struct BeamOutcome {
    pub paths: Vec<ScoredPath>,
    /// log-prob(best) - log-prob(second best). Large and positive when one
    /// path dominates; near zero when the top two are tied.
    pub score: f32,
}

/// Beam search over raw per-step symbol paths. Repeated symbols are *not*
/// merged during the search; collapsing happens only once a path is
/// finalized. Only the best path is served, the runner-up exists to produce
/// the confidence gap.
pub fn beam_search(
    log_probs: &[Vec<f32>],
    blank: i64,
    config: &BeamSearchConfig,
) -> BeamOutcome {
    // (raw path, cumulative log prob), best first.
    let mut beams: Vec<(Vec<i64>, f32)> = vec![(Vec::new(), 0.0)];

    for row in log_probs {
        let mut candidates: Vec<(usize, i64, f32)> =
            Vec::with_capacity(beams.len() * row.len());
        for (beam_idx, (_, score)) in beams.iter().enumerate() {
            for (class, &lp) in row.iter().enumerate() {
                candidates.push((beam_idx, class as i64, score + lp));
            }
        }
        candidates.sort_unstable_by(|a, b| {
            b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(config.beam_width);

        beams = candidates
            .into_iter()
            .map(|(beam_idx, class, score)| {
                let mut path = beams[beam_idx].0.clone();
                path.push(class);
                (path, score)
            })
            .collect();
    }

    let second_best = beams.get(1).map(|(_, score)| *score);
    let best_score = beams.first().map(|(_, score)| *score).unwrap_or(0.0);
    let score = match second_best {
        Some(second) => best_score - second,
        None => 0.0,
    };

    let paths = beams
        .into_iter()
        .take(config.top_paths)
        .map(|(path, log_prob)| ScoredPath {
            decoded: collapse_path(&path, blank),
            log_prob,
        })
        .collect();

    BeamOutcome { paths, score }
}

#[cfg(test)]
mod tests {
    use crate::decode::greedy::{greedy_path, path_log_prob};

    use super::*;

    const BLANK: i64 = 2;

    fn sharp(rows: &[usize]) -> Vec<Vec<f32>> {
        rows.iter()
            .map(|&hot| {
                (0..3)
                    .map(|c| if c == hot { -0.01 } else { -6.0 })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn beam_and_greedy_agree_on_unambiguous_input() {
        let log_probs = sharp(&[0, 0, 2, 1]);
        let outcome = beam_search(&log_probs, BLANK, &BeamSearchConfig::default());
        let greedy = greedy_path(&log_probs);

        assert_eq!(outcome.paths[0].decoded.codes, vec![0, 1]);
        assert_eq!(
            outcome.paths[0].decoded,
            collapse_path(&greedy, BLANK)
        );
    }

    #[test]
    fn best_beam_never_scores_below_the_greedy_path() {
        // Mildly ambiguous distributions.
        let log_probs = vec![
            vec![-0.9, -1.2, -1.1],
            vec![-1.0, -0.8, -1.4],
            vec![-1.3, -1.1, -0.7],
            vec![-0.6, -1.5, -1.2],
        ];
        let outcome = beam_search(&log_probs, BLANK, &BeamSearchConfig::default());
        let greedy_lp = path_log_prob(&log_probs, &greedy_path(&log_probs));
        assert!(outcome.paths[0].log_prob >= greedy_lp - 1e-6);
    }

    #[test]
    fn confidence_is_large_when_one_path_dominates() {
        let outcome = beam_search(&sharp(&[0, 2, 1]), BLANK, &BeamSearchConfig::default());
        assert!(outcome.score > 1.0);
    }

    #[test]
    fn confidence_approaches_zero_for_tied_hypotheses() {
        // Top-2 classes exactly tied at every step.
        let log_probs = vec![vec![-0.7, -0.7, -6.0]; 3];
        let outcome = beam_search(&log_probs, BLANK, &BeamSearchConfig::default());
        assert!(outcome.score.abs() < 1e-6);
    }

    #[test]
    fn narrow_beam_still_returns_requested_paths() {
        let config = BeamSearchConfig {
            beam_width: 2,
            top_paths: 2,
        };
        let outcome = beam_search(&sharp(&[0, 1]), BLANK, &config);
        assert_eq!(outcome.paths.len(), 2);
        assert!(outcome.paths[0].log_prob >= outcome.paths[1].log_prob);
    }

    #[test]
    fn empty_input_yields_an_empty_best_path() {
        let outcome = beam_search(&[], BLANK, &BeamSearchConfig::default());
        assert_eq!(outcome.paths.len(), 1);
        assert!(outcome.paths[0].decoded.codes.is_empty());
        assert_eq!(outcome.score, 0.0);
    }
}
