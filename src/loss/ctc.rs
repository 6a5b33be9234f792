use candle_core::{IndexOp, Tensor, D};
use candle_nn::ops::log_softmax;

use crate::error::OcrError;

/// Log-domain zero. A finite sentinel instead of `-inf` keeps every
/// intermediate of the forward recursion NaN-free under autodiff.
const LOG_ZERO: f32 = -1e30;

pub struct CtcLossOutput {
    /// Batch-mean negative log-likelihood, differentiable back to the logits.
    pub loss: Tensor,
    /// Number of batch elements whose target was longer than their input
    /// sequence. Those elements contribute zero loss and zero gradient; the
    /// batch proceeds.
    pub oversized_targets: usize,
}

/// Sum-over-alignments CTC negative log-likelihood.
///
/// `logits` are raw time-major scores `(time, batch, classes)`; log-softmax
/// is applied internally. `targets` are ragged input-alphabet codes, one
/// sequence per element, with repeats preserved (repeats in the ground truth
/// are meaningful; only the alignment recursion merges repeated predictions).
/// `input_lengths` are the per-element usable time steps.
pub fn ctc_loss(
    logits: &Tensor,
    targets: &[Vec<i64>],
    input_lengths: &[usize],
    blank: i64,
) -> Result<CtcLossOutput, OcrError> {
    let (t_len, batch, n_classes) = logits
        .dims3()
        .map_err(|e| OcrError::tensor("ctc logits shape", e))?;
    if targets.len() != batch || input_lengths.len() != batch {
        return Err(OcrError::invalid_input(format!(
            "ctc batch mismatch: {} logit columns, {} targets, {} lengths",
            batch,
            targets.len(),
            input_lengths.len()
        )));
    }
    for (b, &len) in input_lengths.iter().enumerate() {
        if len == 0 || len > t_len {
            return Err(OcrError::invalid_input(format!(
                "input length {len} for element {b} outside [1, {t_len}]"
            )));
        }
    }
    for (b, target) in targets.iter().enumerate() {
        for &code in target {
            if code < 0 || code as usize >= n_classes || code == blank {
                return Err(OcrError::invalid_input(format!(
                    "target code {code} for element {b} invalid for {n_classes} classes \
                     (blank {blank}); unknown-character sentinels must be filtered upstream"
                )));
            }
        }
    }

    let mut oversized_targets = 0usize;
    let valid: Vec<f32> = targets
        .iter()
        .zip(input_lengths)
        .map(|(target, &len)| {
            if target.len() > len {
                oversized_targets += 1;
                0.0
            } else {
                1.0
            }
        })
        .collect();
    if oversized_targets > 0 {
        tracing::warn!(
            oversized_targets,
            batch,
            "targets longer than input sequence; zeroing their loss contribution"
        );
    }

    let loss = forward_recursion(logits, targets, input_lengths, &valid, blank)
        .map_err(|e| OcrError::tensor("ctc forward recursion", e))?;
    Ok(CtcLossOutput {
        loss,
        oversized_targets,
    })
}

fn forward_recursion(
    logits: &Tensor,
    targets: &[Vec<i64>],
    input_lengths: &[usize],
    valid: &[f32],
    blank: i64,
) -> candle_core::Result<Tensor> {
    let (t_len, batch, _n_classes) = logits.dims3()?;
    let device = logits.device();
    let log_probs = log_softmax(logits, D::Minus1)?; // (t, b, c)

    let l_max = targets.iter().map(Vec::len).max().unwrap_or(0);
    let s_max = 2 * l_max + 1;

    // Blank-extended targets padded to a common length, plus the transition
    // masks of the standard CTC recursion: alpha[s] sums alpha over
    // {s, s-1, s-2}, where the s-2 skip only crosses a blank between two
    // distinct symbols.
    let mut ext = vec![0u32; batch * s_max];
    let mut skip = vec![LOG_ZERO; batch * s_max];
    let mut init = vec![LOG_ZERO; batch * s_max];
    for (b, target) in targets.iter().enumerate() {
        let row = b * s_max;
        for s in 0..s_max {
            ext[row + s] = if s % 2 == 1 && s / 2 < target.len() {
                target[s / 2] as u32
            } else {
                blank as u32
            };
        }
        for s in (3..s_max).step_by(2) {
            if s / 2 < target.len() && target[s / 2] != target[s / 2 - 1] {
                skip[row + s] = 0.0;
            }
        }
        init[row] = 0.0;
        if !target.is_empty() {
            init[row + 1] = 0.0;
        }
    }
    let ext = Tensor::from_vec(ext, (batch, s_max), device)?;
    let skip = Tensor::from_vec(skip, (batch, s_max), device)?;
    let init = Tensor::from_vec(init, (batch, s_max), device)?;

    // Per-step activity: frames at or past an element's input length leave
    // its alpha row untouched.
    let mut active = vec![0.0f32; t_len * batch];
    for t in 0..t_len {
        for (b, &len) in input_lengths.iter().enumerate() {
            if t < len {
                active[t * batch + b] = 1.0;
            }
        }
    }
    let active = Tensor::from_vec(active, (t_len, batch, 1), device)?;

    let emit = |t: usize| -> candle_core::Result<Tensor> {
        log_probs.i(t)?.gather(&ext, 1) // (b, s_max)
    };

    let mut alpha = emit(0)?.add(&init)?;
    for t in 1..t_len {
        let stay = &alpha;
        let advance = shift_states(&alpha, 1)?;
        let skip_advance = shift_states(&alpha, 2)?.add(&skip)?;
        let combined = log_add_exp3(stay, &advance, &skip_advance)?;
        let stepped = combined.add(&emit(t)?)?;

        let active_t = active.i(t)?; // (b, 1)
        let inactive_t = active_t.affine(-1.0, 1.0)?;
        alpha = stepped
            .broadcast_mul(&active_t)?
            .add(&alpha.broadcast_mul(&inactive_t)?)?;
    }

    // Total probability ends in the last blank or the last symbol.
    let mut final_idx = vec![0u32; batch * 2];
    let mut final_mask = vec![0.0f32; batch * 2];
    for (b, target) in targets.iter().enumerate() {
        let s_end = 2 * target.len(); // index of the trailing blank
        final_idx[b * 2] = s_end as u32;
        if s_end >= 1 {
            final_idx[b * 2 + 1] = (s_end - 1) as u32;
        } else {
            final_idx[b * 2 + 1] = 0;
            final_mask[b * 2 + 1] = LOG_ZERO;
        }
    }
    let final_idx = Tensor::from_vec(final_idx, (batch, 2), device)?;
    let final_mask = Tensor::from_vec(final_mask, (batch, 2), device)?;

    let finals = alpha.gather(&final_idx, 1)?.add(&final_mask)?; // (b, 2)
    let x0 = finals.narrow(1, 0, 1)?;
    let x1 = finals.narrow(1, 1, 1)?;
    let m = x0.maximum(&x1)?;
    let total = x0
        .sub(&m)?
        .exp()?
        .add(&x1.sub(&m)?.exp()?)?
        .log()?
        .add(&m)?; // (b, 1)

    let valid = Tensor::from_vec(valid.to_vec(), (batch, 1), device)?;
    let per_element = total.neg()?.mul(&valid)?;
    per_element.sum_all()? / batch as f64
}

/// Shift alpha towards higher extended-label states, filling vacated low
/// states with log-zero.
fn shift_states(alpha: &Tensor, by: usize) -> candle_core::Result<Tensor> {
    let (batch, s_max) = alpha.dims2()?;
    if by >= s_max {
        return Tensor::full(LOG_ZERO, (batch, s_max), alpha.device());
    }
    let pad = Tensor::full(LOG_ZERO, (batch, by), alpha.device())?;
    let kept = alpha.narrow(1, 0, s_max - by)?;
    Tensor::cat(&[&pad, &kept], 1)
}

fn log_add_exp3(a: &Tensor, b: &Tensor, c: &Tensor) -> candle_core::Result<Tensor> {
    let m = a.maximum(b)?.maximum(c)?;
    let sum = a
        .sub(&m)?
        .exp()?
        .add(&b.sub(&m)?.exp()?)?
        .add(&c.sub(&m)?.exp()?)?;
    sum.log()?.add(&m)
}
