use candle_nn::VarBuilder;

use crate::error::OcrError;
use crate::model::encoder::{EncoderOutput, SequenceEncoder};
use crate::model::feature_extractor::{FeatureExtractor, LAST_STAGE_CHANNELS};
use crate::model::registry::ParamRegistry;
use crate::types::ImageBatch;

/// The full convolutional-recurrent model: feature extractor over the image,
/// bidirectional recurrent encoder over the resulting horizontal sequence.
pub struct Crnn {
    extractor: FeatureExtractor,
    encoder: SequenceEncoder,
    input_channels: usize,
    input_height: usize,
    n_classes: usize,
}

impl Crnn {
    pub fn new(
        input_channels: usize,
        input_height: usize,
        n_classes: usize,
        vb: VarBuilder,
    ) -> Result<Self, OcrError> {
        let extractor = FeatureExtractor::new(input_channels, vb.pp("cnn"))?;
        let feature_dim = FeatureExtractor::output_height(input_height)? * LAST_STAGE_CHANNELS;
        let encoder = SequenceEncoder::new(feature_dim, n_classes, vb.pp("encoder"))?;
        Ok(Self {
            extractor,
            encoder,
            input_channels,
            input_height,
            n_classes,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn input_height(&self) -> usize {
        self.input_height
    }

    /// Declared-vs-actual shape check for a batch about to run through the
    /// model.
    pub fn check_images(&self, batch: &ImageBatch) -> Result<(), OcrError> {
        let (_, channels, height, _) = batch
            .images()
            .dims4()
            .map_err(|e| OcrError::tensor("image batch shape", e))?;
        if channels != self.input_channels || height != self.input_height {
            return Err(OcrError::config(format!(
                "batch is {channels}x{height} (channels x height) but the model was built for {}x{}",
                self.input_channels, self.input_height
            )));
        }
        Ok(())
    }

    pub fn forward_t(&self, batch: &ImageBatch, train: bool) -> Result<EncoderOutput, OcrError> {
        self.check_images(batch)?;
        let features = self
            .extractor
            .forward_t(batch.images(), train)
            .map_err(|e| OcrError::tensor("feature extraction", e))?;
        self.encoder
            .forward_t(&features, train)
            .map_err(|e| OcrError::tensor("sequence encoding", e))
    }

    /// Per-element CTC sequence lengths derived from true pixel widths: the
    /// width reduction factor with the off-by-one adjustment matching the
    /// pooling semantics. Always at least one step.
    pub fn sequence_lengths(widths: &[usize]) -> Vec<usize> {
        widths
            .iter()
            .map(|&w| FeatureExtractor::output_width(w).saturating_sub(1).max(1))
            .collect()
    }

    pub fn register_params(&self, registry: &mut ParamRegistry) {
        self.extractor.register_params(registry);
        self.encoder.register_params(registry);
    }
}
