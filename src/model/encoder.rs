use candle_core::{Module, ModuleT, Tensor, D};
use candle_nn::{lstm, Dropout, Linear, LSTMConfig, VarBuilder, LSTM, RNN};

use crate::error::OcrError;
use crate::model::registry::ParamRegistry;

const HIDDEN_SIZE: usize = 256;
/// Training keeps activations with probability 0.7; inference keeps all.
const DROP_PROBABILITY: f32 = 0.3;

/// One bidirectional recurrent layer: a forward and a backward LSTM over the
/// same sequence, hidden states concatenated per time step.
struct BidirLstm {
    fw: LSTM,
    bw: LSTM,
}

impl BidirLstm {
    fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            fw: lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("fw"))?,
            bw: lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("bw"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let fw = stack_hidden(&self.fw, xs)?;
        let reversed = reverse_time(xs)?;
        let bw = reverse_time(&stack_hidden(&self.bw, &reversed)?)?;
        Tensor::cat(&[&fw, &bw], D::Minus1)
    }
}

fn stack_hidden(cell: &LSTM, xs: &Tensor) -> candle_core::Result<Tensor> {
    let states = cell.seq(xs)?;
    let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
    Tensor::stack(&hs, 1)
}

fn reverse_time(xs: &Tensor) -> candle_core::Result<Tensor> {
    let t = xs.dim(1)?;
    let idx: Vec<u32> = (0..t as u32).rev().collect();
    let idx = Tensor::from_vec(idx, t, xs.device())?;
    xs.index_select(&idx, 1)
}

/// Per-step logits plus the cheap greedy diagnostic.
pub struct EncoderOutput {
    /// Time-major raw logits `(time, batch, classes)`, ready for a downstream
    /// log-softmax; no normalization is applied here.
    pub logits: Tensor,
    /// Per-step argmax class indices `(batch, time)`.
    pub raw_predictions: Tensor,
}

/// Two stacked bidirectional LSTM layers over the feature sequence, dropout,
/// and a linear projection of the concatenated directions to class logits.
/// Dropout is the only behavioral difference between training and inference
/// at this stage.
pub struct SequenceEncoder {
    rnn1: BidirLstm,
    rnn2: BidirLstm,
    dropout: Dropout,
    projection: Linear,
}

impl SequenceEncoder {
    pub fn new(feature_dim: usize, n_classes: usize, vb: VarBuilder) -> Result<Self, OcrError> {
        let build = || -> candle_core::Result<Self> {
            Ok(Self {
                rnn1: BidirLstm::new(feature_dim, HIDDEN_SIZE, vb.pp("rnn1"))?,
                rnn2: BidirLstm::new(2 * HIDDEN_SIZE, HIDDEN_SIZE, vb.pp("rnn2"))?,
                dropout: Dropout::new(DROP_PROBABILITY),
                projection: candle_nn::linear(2 * HIDDEN_SIZE, n_classes, vb.pp("projection"))?,
            })
        };
        build().map_err(|e| OcrError::tensor("build sequence encoder", e))
    }

    /// `(batch, time, features)` in, logits and greedy diagnostic out.
    pub fn forward_t(&self, features: &Tensor, train: bool) -> candle_core::Result<EncoderOutput> {
        let h = self.rnn1.forward(features)?;
        let h = self.rnn2.forward(&h)?;
        let h = self.dropout.forward_t(&h, train)?;
        let logits = self.projection.forward(&h)?; // (b, t, classes)
        let raw_predictions = logits.argmax(D::Minus1)?; // (b, t)
        Ok(EncoderOutput {
            logits: logits.transpose(0, 1)?.contiguous()?, // (t, b, classes)
            raw_predictions,
        })
    }

    pub fn register_params(&self, registry: &mut ParamRegistry) {
        registry.register("encoder.projection.weight", self.projection.weight());
        if let Some(bias) = self.projection.bias() {
            registry.register("encoder.projection.bias", bias);
        }
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    use super::*;

    fn encoder(feature_dim: usize, n_classes: usize) -> SequenceEncoder {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        SequenceEncoder::new(feature_dim, n_classes, vb).unwrap()
    }

    #[test]
    fn logits_are_time_major_with_class_dim() {
        let enc = encoder(64, 11);
        let features = Tensor::zeros((2, 7, 64), DType::F32, &Device::Cpu).unwrap();
        let out = enc.forward_t(&features, false).unwrap();
        assert_eq!(out.logits.dims3().unwrap(), (7, 2, 11));
        assert_eq!(out.raw_predictions.dims2().unwrap(), (2, 7));
    }

    #[test]
    fn reverse_time_is_an_involution() {
        let xs = Tensor::from_vec(
            (0..12).map(|v| v as f32).collect::<Vec<_>>(),
            (1, 4, 3),
            &Device::Cpu,
        )
        .unwrap();
        let twice = reverse_time(&reverse_time(&xs).unwrap()).unwrap();
        assert_eq!(
            xs.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            twice.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }
}
