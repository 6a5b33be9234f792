use candle_core::D;
use candle_nn::ops::log_softmax;

use crate::alphabet::AlphabetPair;
use crate::decode::{beam_search, BeamSearchConfig};
use crate::error::OcrError;
use crate::model::Crnn;
use crate::train::per_element_rows;
use crate::types::{ImageBatch, Predictions};

/// Narrowest image the serving path accepts without padding. Narrower inputs
/// are zero-padded up to this width so the extractor always emits at least a
/// couple of time steps.
pub const DEFAULT_MIN_WIDTH: usize = 10;

/// Inference driver: pads undersized inputs, runs the model in inference
/// mode and serves the beam-search decoding with per-element confidence.
pub struct Predictor<'a> {
    model: &'a Crnn,
    alphabets: &'a AlphabetPair,
    beam: BeamSearchConfig,
    min_width: usize,
}

impl<'a> Predictor<'a> {
    pub fn new(model: &'a Crnn, alphabets: &'a AlphabetPair) -> Self {
        Self {
            model,
            alphabets,
            beam: BeamSearchConfig::default(),
            min_width: DEFAULT_MIN_WIDTH,
        }
    }

    pub fn with_beam(mut self, beam: BeamSearchConfig) -> Self {
        self.beam = beam;
        self
    }

    pub fn with_min_width(mut self, min_width: usize) -> Self {
        self.min_width = min_width;
        self
    }

    pub fn min_width(&self) -> usize {
        self.min_width
    }

    pub fn predict(
        &self,
        batch: &ImageBatch,
        filenames: Option<Vec<String>>,
    ) -> Result<Predictions, OcrError> {
        if let Some(names) = &filenames {
            if names.len() != batch.len() {
                return Err(OcrError::invalid_input(format!(
                    "{} filenames for a batch of {} images",
                    names.len(),
                    batch.len()
                )));
            }
        }

        let batch = self.pad_to_min_width(batch)?;
        let out = self.model.forward_t(&batch, false)?;
        let lengths = Crnn::sequence_lengths(batch.widths());
        let blank = self.alphabets.input.blank_code();

        let prob = per_element_rows(&out.logits, &lengths)?;
        let log_probs = log_softmax(&out.logits, D::Minus1)
            .map_err(|e| OcrError::tensor("log softmax", e))?;
        let decode_rows = per_element_rows(&log_probs, &lengths)?;

        let raw_host = out
            .raw_predictions
            .to_vec2::<u32>()
            .map_err(|e| OcrError::tensor("raw predictions to host", e))?;
        let raw_predictions: Vec<Vec<i64>> = raw_host
            .iter()
            .zip(&lengths)
            .map(|(row, &len)| row.iter().take(len).map(|&c| i64::from(c)).collect())
            .collect();

        let decoding = self.alphabets.decoding();
        let mut words = Vec::with_capacity(batch.len());
        let mut scores = Vec::with_capacity(batch.len());
        for element in &decode_rows {
            let outcome = beam_search(element, blank, &self.beam);
            words.push(decoding.decode(&outcome.paths[0].decoded.codes));
            scores.push(outcome.score);
        }

        tracing::debug!(batch = batch.len(), "predicted batch");
        Ok(Predictions {
            prob,
            raw_predictions,
            words,
            scores,
            filenames,
        })
    }

    /// Bump every true width up to the serving minimum, zero-padding the
    /// tensor on the right if the padded width itself falls short.
    fn pad_to_min_width(&self, batch: &ImageBatch) -> Result<ImageBatch, OcrError> {
        if batch.widths().iter().all(|&w| w >= self.min_width) {
            return Ok(batch.clone());
        }
        let (_, _, _, padded_width) = batch
            .images()
            .dims4()
            .map_err(|e| OcrError::tensor("image batch shape", e))?;
        let widths: Vec<usize> = batch
            .widths()
            .iter()
            .map(|&w| w.max(self.min_width))
            .collect();
        let images = if padded_width < self.min_width {
            batch
                .images()
                .pad_with_zeros(3, 0, self.min_width - padded_width)
                .map_err(|e| OcrError::tensor("pad to min width", e))?
        } else {
            batch.images().clone()
        };
        ImageBatch::new(images, widths)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    use crate::alphabet::{Alphabet, AlphabetPreset};

    use super::*;

    fn digit_setup() -> (VarMap, Crnn, AlphabetPair) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Crnn::new(1, 32, 11, vb).unwrap();
        let alphabets = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::DigitsOnly));
        (varmap, model, alphabets)
    }

    #[test]
    fn predictions_carry_one_entry_per_element() {
        let (_varmap, model, alphabets) = digit_setup();
        let predictor = Predictor::new(&model, &alphabets);

        let images = Tensor::zeros((2, 1, 32, 64), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![64, 48]).unwrap();
        let names = vec!["a.png".to_string(), "b.png".to_string()];
        let out = predictor.predict(&batch, Some(names.clone())).unwrap();

        assert_eq!(out.words.len(), 2);
        assert_eq!(out.scores.len(), 2);
        assert_eq!(out.filenames.as_deref(), Some(names.as_slice()));
        // Sequence lengths follow the true widths, not the padded tensor.
        assert_eq!(out.prob[0].len(), 15);
        assert_eq!(out.prob[1].len(), 11);
        assert_eq!(out.raw_predictions[0].len(), 15);
        assert_eq!(out.raw_predictions[1].len(), 11);
        // Each step scores all classes including the blank.
        assert_eq!(out.prob[0][0].len(), 11);
    }

    #[test]
    fn undersized_images_are_padded_to_the_serving_minimum() {
        let (_varmap, model, alphabets) = digit_setup();
        let predictor = Predictor::new(&model, &alphabets).with_min_width(16);

        let images = Tensor::zeros((1, 1, 32, 8), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![8]).unwrap();
        let out = predictor.predict(&batch, None).unwrap();

        // 16 / 4 - 1 steps, not the single step an 8-wide image would give.
        assert_eq!(out.prob[0].len(), 3);
    }

    #[test]
    fn filename_count_must_match_the_batch() {
        let (_varmap, model, alphabets) = digit_setup();
        let predictor = Predictor::new(&model, &alphabets);

        let images = Tensor::zeros((2, 1, 32, 32), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![32, 32]).unwrap();
        assert!(predictor
            .predict(&batch, Some(vec!["only-one.png".to_string()]))
            .is_err());
    }

    #[test]
    fn served_words_stay_inside_the_decode_alphabet() {
        let (_varmap, model, alphabets) = digit_setup();
        let predictor = Predictor::new(&model, &alphabets);

        let images = Tensor::ones((1, 1, 32, 48), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![48]).unwrap();
        let out = predictor.predict(&batch, None).unwrap();
        assert!(out.words[0].chars().all(|c| c.is_ascii_digit()));
    }
}
