use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::alphabet::AlphabetPreset;
use crate::error::OcrError;

/// Compute device for one training/export invocation. Resolved explicitly and
/// passed into construction; nothing mutates process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ordinal")]
pub enum DeviceConfig {
    #[default]
    Cpu,
    Cuda(usize),
}

impl DeviceConfig {
    pub fn resolve(self) -> Result<Device, OcrError> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| OcrError::tensor("cuda device init", e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

/// Flat set of named training options, persisted as JSON alongside a trained
/// model so an exported run is reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub learning_decay_rate: f64,
    pub learning_decay_steps: usize,
    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    pub optimizer: OptimizerKind,
    /// (height, width) images are padded to before batching.
    pub input_shape: (usize, usize),
    pub input_channels: usize,
    pub alphabet: AlphabetPreset,
    /// Render predictions through a case-folded copy of the input alphabet
    /// instead of the input alphabet itself.
    #[serde(default)]
    pub case_insensitive_decoding: bool,
    pub n_epochs: usize,
    pub evaluate_every_epoch: usize,
    /// Checkpoint every this many steps.
    pub save_interval: usize,
    /// Retain at most this many checkpoints.
    pub keep_checkpoint_max: usize,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            learning_decay_rate: 0.95,
            learning_decay_steps: 5000,
            train_batch_size: 128,
            eval_batch_size: 128,
            optimizer: OptimizerKind::Adam,
            input_shape: (32, 128),
            input_channels: 1,
            alphabet: AlphabetPreset::LettersDigitsExtended,
            case_insensitive_decoding: false,
            n_epochs: 30,
            evaluate_every_epoch: 5,
            save_interval: 5000,
            keep_checkpoint_max: 10,
            device: DeviceConfig::Cpu,
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, OcrError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| OcrError::io("read training config", e))?;
        serde_json::from_str(&data).map_err(|e| OcrError::json("parse training config", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), OcrError> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| OcrError::json("serialize training config", e))?;
        std::fs::write(path, data).map_err(|e| OcrError::io("write training config", e))
    }

    /// Staircase exponential decay: the rate drops by `learning_decay_rate`
    /// once per `learning_decay_steps` whole interval.
    pub fn learning_rate_at(&self, step: usize) -> f64 {
        let intervals = (step / self.learning_decay_steps.max(1)) as i32;
        self.learning_rate * self.learning_decay_rate.powi(intervals)
    }

    pub fn alphabets(&self) -> crate::alphabet::AlphabetPair {
        use crate::alphabet::{Alphabet, AlphabetPair};
        let input = Alphabet::from_preset(self.alphabet);
        if self.case_insensitive_decoding {
            AlphabetPair::case_insensitive(input)
        } else {
            AlphabetPair::new(input)
        }
    }
}
