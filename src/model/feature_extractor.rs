use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{batch_norm, conv2d, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, VarBuilder};

use crate::error::OcrError;
use crate::model::registry::ParamRegistry;

/// Cumulative width downsampling of the stage stack: two stride-2 poolings
/// along width. One output feature vector per `WIDTH_REDUCTION` input pixels.
pub const WIDTH_REDUCTION: usize = 4;

/// Channel width of the final stage; the feature dimension is this times the
/// remaining height.
pub const LAST_STAGE_CHANNELS: usize = 512;

const STAGE_CHANNELS: [usize; 7] = [64, 128, 256, 256, 512, 512, 512];
const BN_EPS: f64 = 1e-3;

#[derive(Clone, Copy, PartialEq)]
enum StagePool {
    /// 2x2 max pool, stride 2 in both dimensions.
    Full,
    /// 2x1 max pool, stride 2 in height, 1 in width: halves the height,
    /// leaves the width untouched. Kernel equals stride so the pooling stays
    /// differentiable.
    HeightOnly,
    None,
}

struct ConvStage {
    conv: Conv2d,
    batch_norm: Option<BatchNorm>,
    pool: StagePool,
    /// Stage 7 convolves 2x2 without padding; the width axis is pre-padded so
    /// only the height shrinks.
    pad_width_before_conv: bool,
}

impl ConvStage {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        padding: usize,
        pool: StagePool,
        with_batch_norm: bool,
        pad_width_before_conv: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            padding,
            ..Default::default()
        };
        let conv = conv2d(in_c, out_c, kernel, cfg, vb.pp("conv"))?;
        let batch_norm = if with_batch_norm {
            Some(batch_norm(
                out_c,
                BatchNormConfig {
                    eps: BN_EPS,
                    ..Default::default()
                },
                vb.pp("batch_norm"),
            )?)
        } else {
            None
        };
        Ok(Self {
            conv,
            batch_norm,
            pool,
            pad_width_before_conv,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = if self.pad_width_before_conv {
            xs.pad_with_zeros(3, 0, 1)?
        } else {
            xs.clone()
        };
        let xs = self.conv.forward(&xs)?;
        // Batch statistics in training mode, running statistics otherwise;
        // normalization sits before the activation.
        let xs = match &self.batch_norm {
            Some(bn) => bn.forward_t(&xs, train)?,
            None => xs,
        };
        let xs = xs.relu()?;
        match self.pool {
            StagePool::Full => xs.max_pool2d(2),
            StagePool::HeightOnly => xs.max_pool2d_with_stride((2, 1), (2, 1)),
            StagePool::None => Ok(xs),
        }
    }
}

/// Seven-stage convolutional stack mapping a fixed-height, variable-width
/// image batch `(batch, channels, height, width)` to a left-to-right feature
/// sequence `(batch, width / 4, features)`.
///
/// The batch-norm running statistics inside stages 3, 5 and 7 are the only
/// cross-step mutable state in the model; they advance during training-mode
/// forward passes and persist with the checkpointed variables.
pub struct FeatureExtractor {
    stages: Vec<ConvStage>,
}

impl FeatureExtractor {
    pub fn new(input_channels: usize, vb: VarBuilder) -> Result<Self, OcrError> {
        if input_channels != 1 && input_channels != 3 {
            return Err(OcrError::config(format!(
                "input images must have 1 or 3 channels, got {input_channels}"
            )));
        }

        let mut stages = Vec::with_capacity(STAGE_CHANNELS.len());
        for (i, &out_c) in STAGE_CHANNELS.iter().enumerate() {
            let in_c = if i == 0 {
                input_channels
            } else {
                STAGE_CHANNELS[i - 1]
            };
            let pool = match i {
                0 | 1 => StagePool::Full,
                3 | 5 => StagePool::HeightOnly,
                _ => StagePool::None,
            };
            let with_batch_norm = matches!(i, 2 | 4 | 6);
            let last = i == STAGE_CHANNELS.len() - 1;
            let (kernel, padding) = if last { (2, 0) } else { (3, 1) };
            stages.push(
                ConvStage::new(
                    in_c,
                    out_c,
                    kernel,
                    padding,
                    pool,
                    with_batch_norm,
                    last,
                    vb.pp(format!("stage{}", i + 1)),
                )
                .map_err(|e| OcrError::tensor("build feature extractor", e))?,
            );
        }
        Ok(Self { stages })
    }

    /// Height of the feature map after all stages, i.e. the per-position
    /// feature dimension divided by [`LAST_STAGE_CHANNELS`]. Errors when the
    /// input is too short to survive the stack.
    pub fn output_height(input_height: usize) -> Result<usize, OcrError> {
        let pooled = input_height / 2 / 2 / 2 / 2;
        // Stage 7 convolves 2x2 valid in height.
        if pooled < 2 {
            return Err(OcrError::config(format!(
                "input height {input_height} too small; the stage stack needs at least 32 rows"
            )));
        }
        Ok(pooled - 1)
    }

    /// Sequence length produced for an image of the given pixel width.
    pub fn output_width(input_width: usize) -> usize {
        input_width / WIDTH_REDUCTION
    }

    /// `(batch, channels, height, width)` to `(batch, width', height' x 512)`:
    /// the spatial axes are transposed so each horizontal position becomes one
    /// feature vector, reading the image as a left-to-right sequence.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = images.clone();
        for stage in &self.stages {
            h = stage.forward_t(&h, train)?;
        }
        // (b, c, h, w) -> (b, w, h, c) -> (b, w, h*c)
        h.permute((0, 3, 2, 1))?.contiguous()?.flatten_from(2)
    }

    pub fn register_params(&self, registry: &mut ParamRegistry) {
        for (i, stage) in self.stages.iter().enumerate() {
            let prefix = format!("cnn.stage{}", i + 1);
            registry.register(format!("{prefix}.weight"), stage.conv.weight());
            if let Some(bias) = stage.conv.bias() {
                registry.register(format!("{prefix}.bias"), bias);
            }
        }
    }
}
