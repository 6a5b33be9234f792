use candle_core::Tensor;

/// Diagnostic registry for trainable parameters. Stages hand over explicit
/// handles to their weights and biases; nothing is looked up by name.
#[derive(Default)]
pub struct ParamRegistry {
    entries: Vec<ParamEntry>,
}

pub struct ParamEntry {
    pub name: String,
    pub tensor: Tensor,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tensor: &Tensor) {
        self.entries.push(ParamEntry {
            name: name.into(),
            tensor: tensor.clone(),
        });
    }

    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    /// Log mean/std per registered parameter at debug level.
    pub fn log_summaries(&self) {
        for entry in &self.entries {
            match tensor_stats(&entry.tensor) {
                Ok((mean, std)) => {
                    tracing::debug!(param = %entry.name, mean, std, "parameter summary");
                }
                Err(e) => {
                    tracing::warn!(param = %entry.name, error = %e, "parameter summary failed");
                }
            }
        }
    }
}

fn tensor_stats(tensor: &Tensor) -> candle_core::Result<(f32, f32)> {
    let flat = tensor.flatten_all()?.to_dtype(candle_core::DType::F32)?;
    let n = flat.dim(0)? as f64;
    let mean = flat.sum_all()?.to_scalar::<f32>()? as f64 / n;
    let var = flat.sqr()?.sum_all()?.to_scalar::<f32>()? as f64 / n - mean * mean;
    Ok((mean as f32, var.max(0.0).sqrt() as f32))
}

#[cfg(test)]
mod tests {
    use candle_core::{Device, Tensor};

    use super::*;

    #[test]
    fn registry_keeps_registration_order() {
        let device = Device::Cpu;
        let w = Tensor::zeros((2, 2), candle_core::DType::F32, &device).unwrap();
        let b = Tensor::ones(2, candle_core::DType::F32, &device).unwrap();

        let mut registry = ParamRegistry::new();
        registry.register("stage1/weight", &w);
        registry.register("stage1/bias", &b);

        let names: Vec<_> = registry.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["stage1/weight", "stage1/bias"]);

        let (mean, std) = tensor_stats(&registry.entries()[1].tensor).unwrap();
        assert!((mean - 1.0).abs() < 1e-6);
        assert!(std.abs() < 1e-6);
    }
}
