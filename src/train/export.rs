use std::path::Path;

use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::alphabet::AlphabetPair;
use crate::config::DeviceConfig;
use crate::error::OcrError;
use crate::model::Crnn;
use crate::train::predictor::Predictor;

pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const ALPHABET_FILE: &str = "alphabet.json";
pub const CONTRACT_FILE: &str = "contract.json";

/// Serving contract persisted with an exported model: everything a consumer
/// must know to feed it valid batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceContract {
    /// Images narrower than this are zero-padded before the forward pass.
    pub min_width: usize,
    pub input_channels: usize,
    pub input_height: usize,
    pub n_classes: usize,
}

/// Write the self-contained serving artifact: weights, both alphabets, and
/// the input contract.
pub fn export_model(
    varmap: &VarMap,
    alphabets: &AlphabetPair,
    contract: &InferenceContract,
    dir: &Path,
) -> Result<(), OcrError> {
    if contract.n_classes != alphabets.input.n_classes() {
        return Err(OcrError::config(format!(
            "contract declares {} classes but the alphabet defines {}",
            contract.n_classes,
            alphabets.input.n_classes()
        )));
    }
    std::fs::create_dir_all(dir).map_err(|e| OcrError::io("create export dir", e))?;
    varmap
        .save(dir.join(WEIGHTS_FILE))
        .map_err(|e| OcrError::tensor("save exported weights", e))?;

    let alphabet_json = serde_json::to_string_pretty(alphabets)
        .map_err(|e| OcrError::json("serialize alphabets", e))?;
    std::fs::write(dir.join(ALPHABET_FILE), alphabet_json)
        .map_err(|e| OcrError::io("write alphabets", e))?;

    let contract_json = serde_json::to_string_pretty(contract)
        .map_err(|e| OcrError::json("serialize contract", e))?;
    std::fs::write(dir.join(CONTRACT_FILE), contract_json)
        .map_err(|e| OcrError::io("write contract", e))?;

    tracing::info!(dir = %dir.display(), "model exported");
    Ok(())
}

/// A serving artifact loaded back into memory. Self-contained: the directory
/// carries the weights, the alphabets and the input contract.
pub struct ExportedModel {
    model: Crnn,
    alphabets: AlphabetPair,
    contract: InferenceContract,
}

impl ExportedModel {
    pub fn load(dir: &Path, device: DeviceConfig) -> Result<Self, OcrError> {
        let contract_json = std::fs::read_to_string(dir.join(CONTRACT_FILE))
            .map_err(|e| OcrError::io("read contract", e))?;
        let contract: InferenceContract = serde_json::from_str(&contract_json)
            .map_err(|e| OcrError::json("parse contract", e))?;

        let alphabet_json = std::fs::read_to_string(dir.join(ALPHABET_FILE))
            .map_err(|e| OcrError::io("read alphabets", e))?;
        let alphabets: AlphabetPair = serde_json::from_str(&alphabet_json)
            .map_err(|e| OcrError::json("parse alphabets", e))?;
        if contract.n_classes != alphabets.input.n_classes() {
            return Err(OcrError::config(format!(
                "contract declares {} classes but the alphabet defines {}",
                contract.n_classes,
                alphabets.input.n_classes()
            )));
        }

        let device = device.resolve()?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Crnn::new(
            contract.input_channels,
            contract.input_height,
            contract.n_classes,
            vb,
        )?;
        varmap
            .load(dir.join(WEIGHTS_FILE))
            .map_err(|e| OcrError::tensor("load exported weights", e))?;

        tracing::info!(dir = %dir.display(), "exported model loaded");
        Ok(Self {
            model,
            alphabets,
            contract,
        })
    }

    pub fn contract(&self) -> &InferenceContract {
        &self.contract
    }

    pub fn alphabets(&self) -> &AlphabetPair {
        &self.alphabets
    }

    pub fn model(&self) -> &Crnn {
        &self.model
    }

    /// A predictor honoring the exported minimum-width contract.
    pub fn predictor(&self) -> Predictor<'_> {
        Predictor::new(&self.model, &self.alphabets).with_min_width(self.contract.min_width)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    use crate::alphabet::{Alphabet, AlphabetPreset};
    use crate::types::ImageBatch;

    use super::*;

    fn digit_export(dir: &Path) -> AlphabetPair {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _model = Crnn::new(1, 32, 11, vb).unwrap();
        let alphabets = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::DigitsOnly));
        let contract = InferenceContract {
            min_width: 10,
            input_channels: 1,
            input_height: 32,
            n_classes: 11,
        };
        export_model(&varmap, &alphabets, &contract, dir).unwrap();
        alphabets
    }

    #[test]
    fn exported_model_round_trips_and_serves() {
        let dir = tempfile::tempdir().unwrap();
        digit_export(dir.path());

        for file in [WEIGHTS_FILE, ALPHABET_FILE, CONTRACT_FILE] {
            assert!(dir.path().join(file).exists());
        }

        let exported = ExportedModel::load(dir.path(), DeviceConfig::Cpu).unwrap();
        assert_eq!(exported.contract().min_width, 10);
        assert_eq!(exported.contract().n_classes, 11);

        let images = Tensor::zeros((1, 1, 32, 4), DType::F32, &Device::Cpu).unwrap();
        let batch = ImageBatch::new(images, vec![4]).unwrap();
        // A 4-wide image only serves because the contract pads it up.
        let out = exported.predictor().predict(&batch, None).unwrap();
        assert_eq!(out.words.len(), 1);
    }

    #[test]
    fn class_count_mismatch_is_rejected_at_export() {
        let dir = tempfile::tempdir().unwrap();
        let varmap = VarMap::new();
        let alphabets = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::DigitsOnly));
        let contract = InferenceContract {
            min_width: 10,
            input_channels: 1,
            input_height: 32,
            n_classes: 63,
        };
        assert!(export_model(&varmap, &alphabets, &contract, dir.path()).is_err());
    }

    #[test]
    fn loading_an_empty_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExportedModel::load(dir.path(), DeviceConfig::Cpu).is_err());
    }
}
