use super::misc::Reduction;
use crate::common::*;

/// Binary cross entropy on probabilities.
///
/// Probabilities are clamped to `[eps, 1 - eps]` so the loss stays finite.
#[derive(Debug)]
pub struct BceLossInit {
    pub eps: f64,
    pub reduction: Reduction,
}

impl BceLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            eps: 1e-7,
            reduction,
        }
    }

    pub fn build(self) -> Result<BceLoss> {
        let Self { eps, reduction } = self;
        ensure!(eps > 0.0 && eps < 0.5, "eps must be in range (0, 0.5)");
        Ok(BceLoss { eps, reduction })
    }
}

#[derive(Debug)]
pub struct BceLoss {
    eps: f64,
    reduction: Reduction,
}

impl BceLoss {
    pub fn forward(&self, input: ArrayView2<f32>, target: ArrayView2<f32>) -> f64 {
        debug_assert_eq!(
            input.dim(),
            target.dim(),
            "input and target must have equal shape"
        );

        let eps = self.eps;
        self.reduction
            .reduce(izip!(input.iter(), target.iter()).map(|(&prob, &target)| {
                let prob = (prob as f64).clamp(eps, 1.0 - eps);
                let target = target as f64;
                -(target * prob.ln() + (1.0 - target) * (1.0 - prob).ln())
            }))
    }
}

/// Binary cross entropy on logits, using the log-sum-exp form.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn forward(&self, input: ArrayView2<f32>, target: ArrayView2<f32>) -> f64 {
        debug_assert_eq!(
            input.dim(),
            target.dim(),
            "input and target must have equal shape"
        );

        self.reduction
            .reduce(izip!(input.iter(), target.iter()).map(|(&logit, &target)| {
                let logit = logit as f64;
                logit.max(0.0) - logit * target as f64 + (-logit.abs()).exp().ln_1p()
            }))
    }
}
