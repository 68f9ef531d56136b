use super::misc::Reduction;
use crate::common::*;

/// The Huber loss, quadratic below `beta` and linear above.
#[derive(Debug)]
pub struct SmoothL1Loss {
    beta: f64,
    reduction: Reduction,
}

impl SmoothL1Loss {
    pub fn new(beta: f64, reduction: Reduction) -> Result<Self> {
        ensure!(beta > 0.0, "beta must be positive");
        Ok(Self { beta, reduction })
    }

    pub fn forward(&self, input: ArrayView1<f32>, target: ArrayView1<f32>) -> f64 {
        debug_assert_eq!(input.len(), target.len());
        let beta = self.beta;

        self.reduction
            .reduce(izip!(input.iter(), target.iter()).map(|(&input, &target)| {
                let diff = (input as f64 - target as f64).abs();
                if diff < beta {
                    0.5 * diff.powi(2) / beta
                } else {
                    diff - 0.5 * beta
                }
            }))
    }
}
