use crate::common::*;

/// Tracks the best validation mask mAP seen so far.
#[derive(Debug, Clone, Default)]
pub struct BestMapTracker {
    best: Option<(usize, f64)>,
}

impl BestMapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The best `(step, mask_map)` so far.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }

    /// Records a validation result and returns true if it improves on the
    /// best so far, meaning the checkpoint should be saved.
    ///
    /// Equal or lower values, and NaN, are not improvements.
    pub fn update(&mut self, step: usize, mask_map: f64) -> bool {
        let improved = match self.best {
            _ if mask_map.is_nan() => false,
            Some((_, best)) => mask_map > best,
            None => true,
        };

        if improved {
            info!("mask mAP improved to {:.4} at step {}", mask_map, step);
            self.best = Some((step, mask_map));
        }
        improved
    }
}
