use std::path::{Path, PathBuf};

use candle_nn::VarMap;

use crate::error::OcrError;

const CHECKPOINT_PREFIX: &str = "model-";
const CHECKPOINT_EXT: &str = "safetensors";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub step: usize,
    pub path: PathBuf,
}

/// Rotating parameter-snapshot store: keeps at most `keep_max` snapshots,
/// newest always retained. A snapshot holds trainable weights and the
/// batch-norm running statistics together.
pub struct CheckpointManager {
    dir: PathBuf,
    keep_max: usize,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, keep_max: usize) -> Result<Self, OcrError> {
        if keep_max == 0 {
            return Err(OcrError::config("keep_checkpoint_max must be at least 1"));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| OcrError::io("create checkpoint dir", e))?;
        Ok(Self { dir, keep_max })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, varmap: &VarMap, step: usize) -> Result<PathBuf, OcrError> {
        let path = self
            .dir
            .join(format!("{CHECKPOINT_PREFIX}{step:08}.{CHECKPOINT_EXT}"));
        varmap
            .save(&path)
            .map_err(|e| OcrError::tensor("save checkpoint", e))?;
        tracing::info!(step, path = %path.display(), "checkpoint saved");
        self.rotate()?;
        Ok(path)
    }

    /// Retained checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>, OcrError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| OcrError::io("list checkpoints", e))?;
        let mut checkpoints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OcrError::io("list checkpoints", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(step) = parse_step(name) else { continue };
            checkpoints.push(Checkpoint {
                step,
                path: entry.path(),
            });
        }
        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    pub fn latest(&self) -> Result<Option<Checkpoint>, OcrError> {
        Ok(self.list()?.pop())
    }

    pub fn load_into(&self, varmap: &mut VarMap, checkpoint: &Checkpoint) -> Result<(), OcrError> {
        varmap
            .load(&checkpoint.path)
            .map_err(|e| OcrError::tensor("load checkpoint", e))
    }

    fn rotate(&self) -> Result<(), OcrError> {
        let checkpoints = self.list()?;
        if checkpoints.len() <= self.keep_max {
            return Ok(());
        }
        let excess = checkpoints.len() - self.keep_max;
        for stale in &checkpoints[..excess] {
            std::fs::remove_file(&stale.path)
                .map_err(|e| OcrError::io("remove stale checkpoint", e))?;
            tracing::debug!(step = stale.step, "rotated out checkpoint");
        }
        Ok(())
    }
}

fn parse_step(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(&format!(".{CHECKPOINT_EXT}"))?
        .parse()
        .ok()
}
