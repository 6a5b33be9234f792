use candle_core::Tensor;

use crate::error::OcrError;

/// A batch of same-height images padded to a common width, `(batch, channels,
/// height, width)`, each tagged with its true pixel width before padding.
/// Padding is trailing zero-fill along the width axis.
#[derive(Debug, Clone)]
pub struct ImageBatch {
    images: Tensor,
    widths: Vec<usize>,
}

impl ImageBatch {
    pub fn new(images: Tensor, widths: Vec<usize>) -> Result<Self, OcrError> {
        let (batch, _channels, _height, padded_width) = images
            .dims4()
            .map_err(|e| OcrError::tensor("image batch shape", e))?;
        if widths.len() != batch {
            return Err(OcrError::invalid_input(format!(
                "{} widths for a batch of {batch} images",
                widths.len()
            )));
        }
        if let Some(&w) = widths.iter().find(|&&w| w == 0 || w > padded_width) {
            return Err(OcrError::invalid_input(format!(
                "true width {w} outside (0, {padded_width}]"
            )));
        }
        Ok(Self { images, widths })
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }
}

/// One training/evaluation batch as supplied by the external data pipeline:
/// images plus unaligned label strings, already in the alphabet's character
/// set, and an optional filename per element for passthrough.
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    pub images: ImageBatch,
    pub labels: Vec<String>,
    pub filenames: Option<Vec<String>>,
}

impl LabeledBatch {
    pub fn new(
        images: ImageBatch,
        labels: Vec<String>,
        filenames: Option<Vec<String>>,
    ) -> Result<Self, OcrError> {
        if labels.len() != images.len() {
            return Err(OcrError::invalid_input(format!(
                "{} labels for a batch of {} images",
                labels.len(),
                images.len()
            )));
        }
        if let Some(names) = &filenames {
            if names.len() != images.len() {
                return Err(OcrError::invalid_input(format!(
                    "{} filenames for a batch of {} images",
                    names.len(),
                    images.len()
                )));
            }
        }
        Ok(Self {
            images,
            labels,
            filenames,
        })
    }
}

/// Inference output for one batch, mirroring the exported serving contract.
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Raw per-step logits, one `(time, classes)` matrix per element,
    /// truncated to that element's sequence length.
    pub prob: Vec<Vec<Vec<f32>>>,
    /// Greedy per-step argmax codes, uncollapsed. Diagnostic only.
    pub raw_predictions: Vec<Vec<i64>>,
    /// Beam-search best path rendered through the decode-side alphabet.
    pub words: Vec<String>,
    /// Log-probability gap between the two best beam paths; larger means
    /// more confident.
    pub scores: Vec<f32>,
    pub filenames: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    #[test]
    fn image_batch_rejects_mismatched_widths() {
        let images = Tensor::zeros((2, 1, 32, 64), DType::F32, &Device::Cpu).unwrap();
        assert!(ImageBatch::new(images.clone(), vec![64]).is_err());
        assert!(ImageBatch::new(images.clone(), vec![64, 70]).is_err());
        assert!(ImageBatch::new(images.clone(), vec![64, 0]).is_err());
        assert!(ImageBatch::new(images, vec![64, 48]).is_ok());
    }

    #[test]
    fn labeled_batch_requires_one_label_per_image() {
        let images = Tensor::zeros((2, 1, 32, 64), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![64, 64]).unwrap();
        assert!(LabeledBatch::new(batch.clone(), vec!["a".into()], None).is_err());
        assert!(
            LabeledBatch::new(batch.clone(), vec!["a".into(), "b".into()], None).is_ok()
        );
        assert!(LabeledBatch::new(
            batch,
            vec!["a".into(), "b".into()],
            Some(vec!["x.png".into()])
        )
        .is_err());
    }
}
