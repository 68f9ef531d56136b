use crate::{
    common::*,
    error::ensure_config,
    select::{self, Scored},
};

#[derive(Debug)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.5),
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self { iou_threshold } = self;

        ensure_config!(
            iou_threshold >= 0.0 && iou_threshold <= 1.0,
            "iou_threshold must be in range [0, 1]"
        );

        Ok(NonMaxSuppression {
            iou_threshold: iou_threshold.raw() as f32,
        })
    }
}

/// A scored box competing in suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsCandidate {
    pub class: usize,
    pub score: f32,
    pub bbox: TLBR<f32>,
}

/// Greedy per-class non-maximum suppression.
#[derive(Debug)]
pub struct NonMaxSuppression {
    iou_threshold: f32,
}

impl NonMaxSuppression {
    /// Returns the positions of kept candidates, ordered by descending score.
    ///
    /// Within each class, the best remaining box is kept and every box
    /// overlapping it by at least the IoU threshold is dropped. Boxes of
    /// different classes never suppress each other.
    pub fn forward(&self, candidates: &[NmsCandidate]) -> Vec<usize> {
        let mut classes: BTreeMap<usize, Vec<Scored>> = BTreeMap::new();
        for (position, candidate) in candidates.iter().enumerate() {
            classes
                .entry(candidate.class)
                .or_default()
                .push(Scored::new(position, candidate.score));
        }

        let kept: Vec<Scored> = classes
            .into_values()
            .flat_map(|group| {
                let mut kept: Vec<Scored> = vec![];
                for item in select::sort_descending(group) {
                    let bbox = &candidates[item.index].bbox;
                    let suppressed = kept.iter().any(|other| {
                        candidates[other.index].bbox.iou_with(bbox) >= self.iou_threshold
                    });
                    if !suppressed {
                        kept.push(item);
                    }
                }
                kept
            })
            .collect();

        select::sort_descending(kept)
            .into_iter()
            .map(|item| item.index)
            .collect()
    }
}
