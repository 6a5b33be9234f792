pub mod alphabet;
pub mod config;
pub mod decode;
pub mod error;
pub mod loss;
pub mod metrics;
mod model;
pub mod train;
pub mod types;

pub use alphabet::{Alphabet, AlphabetPair, AlphabetPreset};
pub use config::{DeviceConfig, OptimizerKind, TrainingConfig};
pub use error::OcrError;
pub use model::{Crnn, WIDTH_REDUCTION};
pub use train::{Evaluator, ExportedModel, Predictor, Trainer};
pub use types::{ImageBatch, LabeledBatch, Predictions};
