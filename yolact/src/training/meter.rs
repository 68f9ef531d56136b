use crate::{common::*, loss::YolactLossOutput};

/// Running means of the loss terms since the last reset.
#[derive(Debug, Clone, Default)]
pub struct LossMeter {
    count: usize,
    sum: [f64; 5],
}

impl LossMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, output: &YolactLossOutput) {
        for (sum, (_, value)) in izip!(&mut self.sum, output.terms()) {
            *sum += value;
        }
        self.count += 1;
    }

    /// The mean of every term, or `None` if nothing was recorded.
    pub fn mean(&self) -> Option<YolactLossOutput> {
        if self.count == 0 {
            return None;
        }
        let [total_loss, loc_loss, conf_loss, mask_loss, seg_loss] =
            self.sum.map(|sum| sum / self.count as f64);
        Some(YolactLossOutput {
            total_loss,
            loc_loss,
            conf_loss,
            mask_loss,
            seg_loss,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Logs the running means and resets the meter.
    pub fn report(&mut self, step: usize) -> Option<YolactLossOutput> {
        let mean = self.mean()?;
        info!(
            "step {}: total {:.4}, loc {:.4}, conf {:.4}, mask {:.4}, seg {:.4}",
            step, mean.total_loss, mean.loc_loss, mean.conf_loss, mean.mask_loss, mean.seg_loss
        );
        self.reset();
        Some(mean)
    }
}
