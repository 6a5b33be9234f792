use std::path::{Path, PathBuf};

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap, SGD};

use crate::alphabet::AlphabetPair;
use crate::config::{OptimizerKind, TrainingConfig};
use crate::error::OcrError;
use crate::loss::ctc_loss;
use crate::model::{Crnn, ParamRegistry};
use crate::train::checkpoint::CheckpointManager;
use crate::train::evaluator::Evaluator;
use crate::train::export::{export_model, InferenceContract};
use crate::train::predictor::Predictor;
use crate::types::LabeledBatch;

/// File the training configuration is persisted to inside the output
/// directory, next to the checkpoints.
pub const CONFIG_FILE: &str = "config.json";

const EMA_DECAY: f64 = 0.99;

/// Outcome of one optimization step.
#[derive(Debug, Clone)]
pub struct StepStats {
    pub step: usize,
    pub loss: f32,
    /// Exponential moving average of the batch loss, for a smoother signal
    /// than the raw per-batch value.
    pub ema_loss: f64,
    pub learning_rate: f64,
    /// Elements of this batch whose target could not be aligned.
    pub oversized_targets: usize,
}

enum Opt {
    Adam(AdamW),
    Sgd(SGD),
}

impl Opt {
    fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> Result<Self, OcrError> {
        match kind {
            OptimizerKind::Adam => {
                let params = ParamsAdamW {
                    lr: learning_rate,
                    beta1: 0.5,
                    ..Default::default()
                };
                AdamW::new(vars, params).map(Self::Adam)
            }
            OptimizerKind::Sgd => SGD::new(vars, learning_rate).map(Self::Sgd),
        }
        .map_err(|e| OcrError::tensor("optimizer init", e))
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        match self {
            Self::Adam(o) => o.step(grads),
            Self::Sgd(o) => o.step(grads),
        }
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        match self {
            Self::Adam(o) => o.set_learning_rate(learning_rate),
            Self::Sgd(o) => o.set_learning_rate(learning_rate),
        }
    }
}

/// Owns the model variables, the optimizer and the checkpoint store for one
/// training run. The training loop itself lives with the caller; this drives
/// single steps.
pub struct Trainer {
    model: Crnn,
    varmap: VarMap,
    optimizer: Opt,
    config: TrainingConfig,
    alphabets: AlphabetPair,
    device: Device,
    checkpoints: CheckpointManager,
    step: usize,
    ema_loss: Option<f64>,
    oversized_total: u64,
}

impl Trainer {
    /// Build a fresh model in `output_dir` and persist the configuration
    /// there, so the directory alone reproduces the run.
    pub fn new(config: TrainingConfig, output_dir: impl Into<PathBuf>) -> Result<Self, OcrError> {
        let device = config.device.resolve()?;
        let alphabets = config.alphabets();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let (input_height, _) = config.input_shape;
        let model = Crnn::new(
            config.input_channels,
            input_height,
            alphabets.input.n_classes(),
            vb,
        )?;
        let optimizer = Opt::new(config.optimizer, varmap.all_vars(), config.learning_rate)?;

        let output_dir = output_dir.into();
        let checkpoints = CheckpointManager::new(&output_dir, config.keep_checkpoint_max)?;
        config.save(&output_dir.join(CONFIG_FILE))?;

        tracing::info!(
            n_classes = model.n_classes(),
            optimizer = ?config.optimizer,
            output_dir = %output_dir.display(),
            "trainer ready"
        );
        Ok(Self {
            model,
            varmap,
            optimizer,
            config,
            alphabets,
            device,
            checkpoints,
            step: 0,
            ema_loss: None,
            oversized_total: 0,
        })
    }

    /// Restore variables from the newest checkpoint in the output directory,
    /// if any, and continue counting steps from it.
    pub fn resume_from_latest(&mut self) -> Result<Option<usize>, OcrError> {
        let Some(latest) = self.checkpoints.latest()? else {
            return Ok(None);
        };
        self.checkpoints.load_into(&mut self.varmap, &latest)?;
        self.step = latest.step;
        tracing::info!(step = latest.step, "resumed from checkpoint");
        Ok(Some(latest.step))
    }

    /// One optimization step: encode labels, forward in training mode (which
    /// also advances the batch-norm running statistics), CTC loss, backprop,
    /// decayed-rate update. Checkpoints on the configured interval.
    pub fn train_step(&mut self, batch: &LabeledBatch) -> Result<StepStats, OcrError> {
        let targets: Vec<Vec<i64>> = batch
            .labels
            .iter()
            .map(|label| self.alphabets.input.encode_checked(label))
            .collect::<Result<_, _>>()?;

        let out = self.model.forward_t(&batch.images, true)?;
        let lengths = Crnn::sequence_lengths(batch.images.widths());
        let ctc = ctc_loss(
            &out.logits,
            &targets,
            &lengths,
            self.alphabets.input.blank_code(),
        )?;

        let grads = ctc
            .loss
            .backward()
            .map_err(|e| OcrError::tensor("backward", e))?;
        let learning_rate = self.config.learning_rate_at(self.step);
        self.optimizer.set_learning_rate(learning_rate);
        self.optimizer
            .step(&grads)
            .map_err(|e| OcrError::tensor("optimizer step", e))?;
        self.step += 1;

        let loss = ctc
            .loss
            .to_scalar::<f32>()
            .map_err(|e| OcrError::tensor("loss to host", e))?;
        let ema_loss = match self.ema_loss {
            Some(prev) => EMA_DECAY * prev + (1.0 - EMA_DECAY) * f64::from(loss),
            None => f64::from(loss),
        };
        self.ema_loss = Some(ema_loss);
        self.oversized_total += ctc.oversized_targets as u64;

        tracing::info!(
            step = self.step,
            loss,
            ema_loss,
            learning_rate,
            "train step"
        );
        if ctc.oversized_targets > 0 {
            tracing::debug!(
                total = self.oversized_total,
                "unalignable targets seen so far"
            );
        }

        if self.step % self.config.save_interval.max(1) == 0 {
            self.checkpoints.save(&self.varmap, self.step)?;
        }

        Ok(StepStats {
            step: self.step,
            loss,
            ema_loss,
            learning_rate,
            oversized_targets: ctc.oversized_targets,
        })
    }

    /// Checkpoint the current variables regardless of the interval, e.g. on
    /// interruption or at the end of training.
    pub fn checkpoint_now(&self) -> Result<PathBuf, OcrError> {
        self.checkpoints.save(&self.varmap, self.step)
    }

    /// Write the serving artifact for the current variables.
    pub fn export(&self, dir: &Path, min_width: usize) -> Result<(), OcrError> {
        let contract = InferenceContract {
            min_width,
            input_channels: self.model.input_channels(),
            input_height: self.model.input_height(),
            n_classes: self.model.n_classes(),
        };
        export_model(&self.varmap, &self.alphabets, &contract, dir)
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.model, &self.alphabets)
    }

    pub fn predictor(&self) -> Predictor<'_> {
        Predictor::new(&self.model, &self.alphabets)
    }

    /// Log mean/stddev summaries for every model parameter.
    pub fn log_param_summaries(&self) {
        let mut registry = ParamRegistry::new();
        self.model.register_params(&mut registry);
        registry.log_summaries();
    }

    pub fn model(&self) -> &Crnn {
        &self.model
    }

    pub fn alphabets(&self) -> &AlphabetPair {
        &self.alphabets
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn ema_loss(&self) -> Option<f64> {
        self.ema_loss
    }

    /// Total unalignable targets seen across the run.
    pub fn oversized_targets_total(&self) -> u64 {
        self.oversized_total
    }
}
