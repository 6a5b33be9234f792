use candle_core::D;
use candle_nn::ops::log_softmax;

use crate::alphabet::AlphabetPair;
use crate::decode::{beam_search, words_from_codes, BeamSearchConfig};
use crate::error::OcrError;
use crate::loss::ctc_loss;
use crate::metrics::EvalMetrics;
use crate::model::Crnn;
use crate::train::per_element_rows;
use crate::types::LabeledBatch;

#[derive(Debug, Clone)]
pub struct EvalStepStats {
    pub loss: f32,
    pub oversized_targets: usize,
}

/// Streaming evaluation over labeled batches: loss in inference mode (frozen
/// batch-norm statistics, no dropout), beam decoding, and running
/// character-error-rate / word-accuracy. Character errors are measured on
/// input-alphabet codes; words are compared after rendering both sides
/// through the decode-side alphabet.
pub struct Evaluator<'a> {
    model: &'a Crnn,
    alphabets: &'a AlphabetPair,
    beam: BeamSearchConfig,
    metrics: EvalMetrics,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a Crnn, alphabets: &'a AlphabetPair) -> Self {
        Self {
            model,
            alphabets,
            beam: BeamSearchConfig::default(),
            metrics: EvalMetrics::new(),
        }
    }

    pub fn with_beam(mut self, beam: BeamSearchConfig) -> Self {
        self.beam = beam;
        self
    }

    pub fn eval_step(&mut self, batch: &LabeledBatch) -> Result<EvalStepStats, OcrError> {
        let targets: Vec<Vec<i64>> = batch
            .labels
            .iter()
            .map(|label| self.alphabets.input.encode_checked(label))
            .collect::<Result<_, _>>()?;

        let out = self.model.forward_t(&batch.images, false)?;
        let lengths = Crnn::sequence_lengths(batch.images.widths());
        let blank = self.alphabets.input.blank_code();
        let ctc = ctc_loss(&out.logits, &targets, &lengths, blank)?;
        let loss = ctc
            .loss
            .to_scalar::<f32>()
            .map_err(|e| OcrError::tensor("loss to host", e))?;

        let log_probs = log_softmax(&out.logits, D::Minus1)
            .map_err(|e| OcrError::tensor("log softmax", e))?;
        let rows = per_element_rows(&log_probs, &lengths)?;
        let pred_codes: Vec<Vec<i64>> = rows
            .iter()
            .map(|element| {
                let outcome = beam_search(element, blank, &self.beam);
                outcome.paths[0].decoded.codes.clone()
            })
            .collect();

        let decoding = self.alphabets.decoding();
        let pred_words = words_from_codes(&pred_codes, decoding);
        let target_words = words_from_codes(&targets, decoding);
        self.metrics
            .record(&pred_codes, &targets, &pred_words, &target_words);

        tracing::debug!(
            loss,
            cer = self.metrics.character_error_rate(),
            word_accuracy = self.metrics.word_accuracy(),
            "eval step"
        );
        Ok(EvalStepStats {
            loss,
            oversized_targets: ctc.oversized_targets,
        })
    }

    pub fn metrics(&self) -> &EvalMetrics {
        &self.metrics
    }

    /// Log the accumulated metrics and hand them back, consuming the
    /// evaluator.
    pub fn finish(self) -> EvalMetrics {
        tracing::info!(
            cer = self.metrics.character_error_rate(),
            word_accuracy = self.metrics.word_accuracy(),
            "evaluation finished"
        );
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    use crate::alphabet::{Alphabet, AlphabetPreset};
    use crate::types::{ImageBatch, LabeledBatch};

    use super::*;

    fn digit_model() -> (VarMap, Crnn) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Crnn::new(1, 32, 11, vb).unwrap();
        (varmap, model)
    }

    #[test]
    fn eval_streams_loss_and_metrics() {
        let (_varmap, model) = digit_model();
        let alphabets = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::DigitsOnly));
        let mut evaluator = Evaluator::new(&model, &alphabets);

        let images = Tensor::zeros((2, 1, 32, 64), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![64, 48]).unwrap();
        let batch =
            LabeledBatch::new(batch, vec!["12".to_string(), "3".to_string()], None).unwrap();

        let stats = evaluator.eval_step(&batch).unwrap();
        assert!(stats.loss.is_finite());
        assert!(stats.loss >= 0.0);
        assert_eq!(stats.oversized_targets, 0);

        let metrics = evaluator.finish();
        // Two elements recorded, whatever the untrained model predicted.
        assert!(metrics.character_error_rate() >= 0.0);
        assert!(metrics.word_accuracy() >= 0.0);
        assert!(metrics.word_accuracy() <= 1.0);
    }

    #[test]
    fn eval_is_deterministic_in_inference_mode() {
        let (_varmap, model) = digit_model();
        let alphabets = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::DigitsOnly));

        let images = Tensor::ones((1, 1, 32, 64), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![64]).unwrap();
        let batch = LabeledBatch::new(batch, vec!["7".to_string()], None).unwrap();

        let mut first = Evaluator::new(&model, &alphabets);
        let mut second = Evaluator::new(&model, &alphabets);
        let a = first.eval_step(&batch).unwrap();
        let b = second.eval_step(&batch).unwrap();
        // Dropout is disabled and batch-norm statistics are frozen.
        assert_eq!(a.loss, b.loss);
    }
}
