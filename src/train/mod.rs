//! Training, evaluation and inference drivers over the shared model, plus
//! checkpointing and the export artifact.

pub mod checkpoint;
pub mod evaluator;
pub mod export;
pub mod predictor;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use evaluator::{EvalStepStats, Evaluator};
pub use export::{export_model, ExportedModel, InferenceContract};
pub use predictor::Predictor;
pub use trainer::{StepStats, Trainer, CONFIG_FILE};

use candle_core::Tensor;

use crate::error::OcrError;

/// Split a time-major `(time, batch, classes)` tensor into per-element row
/// matrices on the host, each truncated to that element's sequence length.
/// Padding steps past the true width never reach the decoders.
pub(crate) fn per_element_rows(
    values: &Tensor,
    lengths: &[usize],
) -> Result<Vec<Vec<Vec<f32>>>, OcrError> {
    let host = values
        .to_vec3::<f32>()
        .map_err(|e| OcrError::tensor("logits to host", e))?;
    let t_len = host.len();
    lengths
        .iter()
        .enumerate()
        .map(|(b, &len)| {
            if len > t_len {
                return Err(OcrError::invalid_input(format!(
                    "sequence length {len} for element {b} exceeds {t_len} time steps"
                )));
            }
            Ok((0..len).map(|t| host[t][b].clone()).collect())
        })
        .collect()
}
