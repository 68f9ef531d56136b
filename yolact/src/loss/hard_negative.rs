use crate::select::{self, Scored};

/// Selects the negative anchors with the highest background loss.
#[derive(Debug, Clone)]
pub struct HardNegativeMiner {
    neg_pos_ratio: usize,
}

impl HardNegativeMiner {
    pub fn new(neg_pos_ratio: usize) -> Self {
        Self { neg_pos_ratio }
    }

    /// The number of negatives kept for an image.
    pub fn budget(&self, num_positives: usize, num_negatives: usize) -> usize {
        self.neg_pos_ratio
            .saturating_mul(num_positives)
            .min(num_negatives)
    }

    /// Picks negatives from `(anchor_index, background_loss)` candidates.
    ///
    /// Returns the picked candidates, hardest first. At most
    /// `neg_pos_ratio * num_positives` are returned.
    pub fn mine(&self, candidates: &[(usize, f64)], num_positives: usize) -> Vec<(usize, f64)> {
        let scored: Vec<_> = candidates
            .iter()
            .enumerate()
            .map(|(position, &(_, loss))| Scored::new(position, loss as f32))
            .collect();
        let budget = self.budget(num_positives, candidates.len());

        select::top_k(scored, budget)
            .into_iter()
            .map(|item| candidates[item.index])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mining_is_bounded_by_ratio() {
        let miner = HardNegativeMiner::new(3);
        let candidates: Vec<_> = (0..20).map(|index| (index, index as f64)).collect();

        let mined: Vec<_> = miner
            .mine(&candidates, 2)
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(mined, vec![19, 18, 17, 16, 15, 14]);

        assert!(miner.mine(&candidates, 0).is_empty());
        assert_eq!(miner.mine(&candidates, 100).len(), 20);
    }
}
