use super::misc::Reduction;
use crate::common::*;

/// Computes `ln(sum(exp(x)))` without overflow.
pub fn log_sum_exp(logits: ArrayView1<f32>) -> f64 {
    let max = logits
        .iter()
        .fold(f64::NEG_INFINITY, |max, &value| max.max(value as f64));
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = logits.iter().map(|&value| (value as f64 - max).exp()).sum();
    max + sum.ln()
}

pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let lse = log_sum_exp(logits);
    logits.mapv(|value| (value as f64 - lse).exp() as f32)
}

#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// The loss of a single `[num_classes]` logit row against a sparse target.
    pub fn forward_one(&self, logits: ArrayView1<f32>, target: usize) -> f64 {
        debug_assert!(
            target < logits.len(),
            "target {} is out of range of {} classes",
            target,
            logits.len()
        );
        log_sum_exp(logits) - logits[target] as f64
    }

    pub fn forward(&self, input: ArrayView2<f32>, target: &[usize]) -> f64 {
        // assume [batch_size, n_classes] input shape
        debug_assert_eq!(input.nrows(), target.len());
        self.reduction.reduce(
            izip!(input.outer_iter(), target).map(|(logits, &target)| self.forward_one(logits, target)),
        )
    }
}
