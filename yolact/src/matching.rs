//! Assignment of ground truth instances to anchors.

use crate::{
    anchor::Anchors,
    common::*,
    config::{LossConfig, MatchingConfig},
    error::{ensure_config, ensure_data},
    ground_truth::ImageGroundTruth,
};

/// The training role of one anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    Negative,
    /// Excluded from every loss term.
    Ignored,
    /// Backed by the ground truth instance at index `instance`.
    Positive { class: usize, instance: usize },
}

impl Assignment {
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive { .. })
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }

    pub fn instance(&self) -> Option<usize> {
        match *self {
            Self::Positive { instance, .. } => Some(instance),
            _ => None,
        }
    }
}

/// Per-anchor assignments and regression targets of one image.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct MatchingOutput {
    /// One entry per anchor, in anchor order.
    #[get = "pub"]
    assignments: Vec<Assignment>,
    /// Encoded box targets in `[anchors, 4]` shape. Rows of non-positive
    /// anchors are zero.
    #[get = "pub"]
    targets: Array2<f32>,
    #[get_copy = "pub"]
    num_positives: usize,
    #[get_copy = "pub"]
    num_negatives: usize,
}

impl MatchingOutput {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Iterates `(anchor_index, class, instance_index)` over positive anchors
    /// in anchor order.
    pub fn positives(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(anchor_index, assignment)| match *assignment {
                Assignment::Positive { class, instance } => Some((anchor_index, class, instance)),
                _ => None,
            })
    }

    /// Iterates the indexes of negative anchors.
    pub fn negatives(&self) -> impl Iterator<Item = usize> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, assignment)| assignment.is_negative())
            .map(|(anchor_index, _)| anchor_index)
    }
}

#[derive(Debug, Clone)]
pub struct AnchorMatcherInit {
    pub threshold_pos: f64,
    pub threshold_neg: f64,
    pub threshold_crowd: f64,
    pub box_variances: [f64; 2],
}

impl AnchorMatcherInit {
    pub fn new(matching: &MatchingConfig, loss: &LossConfig) -> Self {
        let [v0, v1] = loss.box_variances;
        Self {
            threshold_pos: matching.threshold_pos.raw(),
            threshold_neg: matching.threshold_neg.raw(),
            threshold_crowd: matching.threshold_crowd.raw(),
            box_variances: [v0.raw(), v1.raw()],
        }
    }

    pub fn build(self) -> Result<AnchorMatcher> {
        let Self {
            threshold_pos,
            threshold_neg,
            threshold_crowd,
            box_variances: [v0, v1],
        } = self;

        ensure_config!(
            threshold_pos >= threshold_neg,
            "threshold_pos ({}) must not be less than threshold_neg ({})",
            threshold_pos,
            threshold_neg
        );
        ensure_config!(
            (0.0..=1.0).contains(&threshold_crowd),
            "threshold_crowd must be in range [0, 1]"
        );
        let coder = BoxCoder::new([v0 as f32, v1 as f32])
            .map_err(|err| crate::Error::config(err.to_string()))?;

        Ok(AnchorMatcher {
            threshold_pos: threshold_pos as f32,
            threshold_neg: threshold_neg as f32,
            threshold_crowd: threshold_crowd as f32,
            coder,
        })
    }
}

/// Assigns anchors to ground truth by box overlap.
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    threshold_pos: f32,
    threshold_neg: f32,
    threshold_crowd: f32,
    coder: BoxCoder<f32>,
}

impl AnchorMatcher {
    /// The box encoding used for regression targets.
    pub fn coder(&self) -> &BoxCoder<f32> {
        &self.coder
    }

    /// Assigns every anchor of one image.
    ///
    /// Each anchor takes its best-IoU instance, crowds included, ties going
    /// to the lowest instance index. Only a non-crowd best instance can make
    /// the anchor positive. Each non-crowd instance is then paired with a
    /// distinct anchor, highest IoU first, and that anchor becomes positive
    /// regardless of thresholds.
    pub fn match_instances(
        &self,
        anchors: &Anchors,
        ground_truth: &ImageGroundTruth,
    ) -> Result<MatchingOutput> {
        for (index, instance) in ground_truth.instances.iter().enumerate() {
            let bbox = &instance.bbox;
            ensure_data!(
                bbox.tlbr().iter().all(|value| value.is_finite()),
                "instance {} has non-finite box {:?}",
                index,
                bbox
            );
            ensure_data!(
                !bbox.is_degenerate(),
                "instance {} has zero-area box {:?}",
                index,
                bbox
            );
        }

        let instances = &ground_truth.instances;
        let objects: Vec<usize> = ground_truth.non_crowd().map(|(index, _)| index).collect();
        let crowds: Vec<&TLBR<f32>> = ground_truth
            .crowd()
            .map(|(_, instance)| &instance.bbox)
            .collect();
        let num_anchors = anchors.len();

        // IoU in [instances, anchors] shape, crowds included
        let ious = Array2::from_shape_fn((instances.len(), num_anchors), |(inst, anc)| {
            anchors[anc].tlbr().iou_with(&instances[inst].bbox)
        });

        let positive = |instance: usize| Assignment::Positive {
            class: instances[instance].class,
            instance,
        };

        let mut assignments: Vec<Assignment> = anchors
            .iter()
            .enumerate()
            .map(|(anchor_index, anchor)| {
                let best = first_max(ious.column(anchor_index).iter().copied().enumerate());
                let in_crowd = || {
                    let tlbr = anchor.tlbr();
                    crowds
                        .iter()
                        .any(|&crowd| tlbr.ioa_with(crowd) >= self.threshold_crowd)
                };

                match best {
                    Some((inst, iou)) if iou >= self.threshold_pos && !instances[inst].is_crowd => {
                        positive(inst)
                    }
                    Some((_, iou)) if iou >= self.threshold_neg => Assignment::Ignored,
                    _ if in_crowd() => Assignment::Ignored,
                    _ => Assignment::Negative,
                }
            })
            .collect();

        // crowd regions never take part in forced matching
        let object_ious = Array2::from_shape_fn((objects.len(), num_anchors), |(obj, anc)| {
            ious[[objects[obj], anc]]
        });
        for (obj, anchor_index) in force_match(&object_ious) {
            assignments[anchor_index] = positive(objects[obj]);
        }

        let mut targets = Array2::zeros((num_anchors, 4));
        let mut num_positives = 0;
        let mut num_negatives = 0;

        for (anchor_index, assignment) in assignments.iter().enumerate() {
            match *assignment {
                Assignment::Positive { instance, .. } => {
                    let target = self.coder.encode(
                        &anchors[anchor_index].cycxhw(),
                        &ground_truth.instances[instance].bbox,
                    );
                    for (dst, value) in targets.row_mut(anchor_index).iter_mut().zip(target) {
                        *dst = value;
                    }
                    num_positives += 1;
                }
                Assignment::Negative => num_negatives += 1,
                Assignment::Ignored => {}
            }
        }

        debug!(
            "matched {} instances ({} crowd): {} positive, {} negative, {} ignored anchors",
            objects.len(),
            crowds.len(),
            num_positives,
            num_negatives,
            num_anchors - num_positives - num_negatives
        );

        Ok(MatchingOutput {
            assignments,
            targets,
            num_positives,
            num_negatives,
        })
    }
}

/// Returns the first item with the maximum value.
fn first_max<T>(iter: impl Iterator<Item = (T, f32)>) -> Option<(T, f32)> {
    iter.fold(None, |best, (item, value)| match best {
        Some((_, best_value)) if best_value >= value => best,
        _ => Some((item, value)),
    })
}

/// Greedily pairs objects with distinct anchors, globally highest IoU first.
///
/// Returns `(object_index, anchor_index)` pairs.
fn force_match(ious: &Array2<f32>) -> Vec<(usize, usize)> {
    let (num_objects, num_anchors) = ious.dim();
    let mut anchor_taken = vec![false; num_anchors];
    let mut object_done = vec![false; num_objects];

    let best_free_anchor = |obj: usize, anchor_taken: &[bool]| {
        first_max(
            ious.row(obj)
                .iter()
                .copied()
                .enumerate()
                .filter(|&(anc, _)| !anchor_taken[anc]),
        )
    };

    let mut best_anchors: Vec<Option<(usize, f32)>> = (0..num_objects)
        .map(|obj| best_free_anchor(obj, &anchor_taken))
        .collect();
    let mut pairs = Vec::with_capacity(num_objects.min(num_anchors));

    loop {
        let candidates = best_anchors
            .iter()
            .enumerate()
            .filter(|&(obj, _)| !object_done[obj])
            .filter_map(|(obj, best)| best.map(|(anc, iou)| ((obj, anc), iou)));

        let (obj, anc) = match first_max(candidates) {
            Some((pair, _)) => pair,
            None => break,
        };

        object_done[obj] = true;
        anchor_taken[anc] = true;
        pairs.push((obj, anc));

        for other in 0..num_objects {
            if !object_done[other] && matches!(best_anchors[other], Some((taken, _)) if taken == anc)
            {
                best_anchors[other] = best_free_anchor(other, &anchor_taken);
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchor::AnchorGenerator, config::AnchorConfig, ground_truth::GroundTruthInstance};

    /// 4x4 grid of non-overlapping square anchors of side 0.25, plus a
    /// second ratio when `ratios` has more entries.
    fn anchors(ratios: &[f64]) -> Anchors {
        let config = AnchorConfig {
            image_size: NonZeroUsize::new(100).unwrap(),
            feature_map_sizes: vec![NonZeroUsize::new(4).unwrap()],
            aspect_ratios: ratios.iter().map(|&ratio| r64(ratio)).collect(),
            scales: vec![r64(25.0)],
        };
        AnchorGenerator::new(&config).unwrap().generate()
    }

    fn matcher() -> AnchorMatcher {
        let config = crate::Config::coco();
        AnchorMatcherInit::new(&config.matching, &config.loss)
            .build()
            .unwrap()
    }

    fn instance(tlbr: [f32; 4], class: usize, is_crowd: bool) -> GroundTruthInstance {
        GroundTruthInstance {
            class,
            bbox: TLBR::from_tlbr(tlbr),
            mask: Array2::zeros((4, 4)),
            is_crowd,
        }
    }

    #[test]
    fn single_high_overlap_anchor() {
        let anchors = anchors(&[1.0]);
        let gt = ImageGroundTruth::new(vec![instance([0.0, 0.0, 0.25, 0.225], 3, false)]);
        let output = matcher().match_instances(&anchors, &gt).unwrap();

        assert_eq!(output.num_positives(), 1);
        assert_eq!(output.num_negatives(), anchors.len() - 1);
        assert_eq!(
            output.assignments()[0],
            Assignment::Positive {
                class: 3,
                instance: 0
            }
        );
        assert!(output.assignments().iter().all(|a| !a.is_ignored()));
    }

    #[test]
    fn regression_target_decodes_to_instance() {
        let anchors = anchors(&[1.0]);
        let gt = ImageGroundTruth::new(vec![instance([0.3, 0.55, 0.45, 0.7], 1, false)]);
        let matcher = matcher();
        let output = matcher.match_instances(&anchors, &gt).unwrap();

        for (anchor_index, _, _) in output.positives() {
            let row = output.targets().row(anchor_index);
            let decoded = matcher
                .coder()
                .decode(&anchors[anchor_index].cycxhw(), [row[0], row[1], row[2], row[3]]);
            let expect = gt.instances[0].bbox.to_cycxhw();
            for (lhs, rhs) in izip!(decoded.cycxhw(), expect.cycxhw()) {
                assert!((lhs - rhs).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn every_instance_is_covered() {
        let anchors = anchors(&[1.0]);
        // both instances prefer anchor 0
        let gt = ImageGroundTruth::new(vec![
            instance([0.0, 0.0, 0.25, 0.25], 1, false),
            instance([0.0, 0.0, 0.2, 0.2], 2, false),
            instance([0.6, 0.6, 0.61, 0.61], 3, false),
        ]);
        let output = matcher().match_instances(&anchors, &gt).unwrap();

        for index in 0..gt.len() {
            assert!(output
                .positives()
                .any(|(_, _, instance)| instance == index));
        }
        assert_eq!(output.assignments()[0].instance(), Some(0));
    }

    #[test]
    fn assignments_follow_thresholds() {
        let anchors = anchors(&[1.0, 0.5, 2.0]);
        let gt = ImageGroundTruth::new(vec![
            instance([0.1, 0.1, 0.4, 0.3], 1, false),
            instance([0.5, 0.2, 0.9, 0.8], 2, false),
            instance([0.0, 0.6, 0.5, 1.0], 5, true),
        ]);
        let matcher = matcher();
        let output = matcher.match_instances(&anchors, &gt).unwrap();

        let mut num_forced = 0;
        for (anchor, assignment) in izip!(anchors.iter(), output.assignments()) {
            let (best_index, best) = gt
                .instances
                .iter()
                .map(|inst| anchor.tlbr().iou_with(&inst.bbox))
                .enumerate()
                .fold((0, 0.0f32), |best, (index, iou)| if iou > best.1 { (index, iou) } else { best });
            let best_is_object = best >= 0.5 && !gt.instances[best_index].is_crowd;
            let in_crowd = anchor.tlbr().ioa_with(&gt.instances[2].bbox) >= 0.7;

            match assignment {
                Assignment::Positive { instance, .. } => {
                    assert!(!gt.instances[*instance].is_crowd);
                    if !best_is_object {
                        num_forced += 1;
                    }
                }
                Assignment::Negative => assert!(best < 0.4 && !in_crowd),
                Assignment::Ignored => {
                    assert!(!best_is_object && (best >= 0.4 || in_crowd))
                }
            }
        }
        assert!(num_forced <= 2);
    }

    #[test]
    fn crowd_only_image_has_no_positives() {
        let anchors = anchors(&[1.0]);
        let gt = ImageGroundTruth::new(vec![instance([0.0, 0.0, 0.5, 0.5], 1, true)]);
        let output = matcher().match_instances(&anchors, &gt).unwrap();

        assert_eq!(output.num_positives(), 0);
        // the four anchors inside the crowd region
        assert_eq!(
            output
                .assignments()
                .iter()
                .filter(|assignment| assignment.is_ignored())
                .count(),
            4
        );
    }

    #[test]
    fn crowd_with_higher_overlap_wins_the_anchor() {
        // anchors 10 and 11 are the square and the wide anchor of cell (1, 1)
        let anchors = anchors(&[1.0, 2.0]);
        let square = anchors[10].tlbr();
        let wide = anchors[11].tlbr();
        assert!(square.iou_with(&wide) >= 0.5);

        let gt = ImageGroundTruth::new(vec![
            instance(square.tlbr(), 1, true),
            instance(wide.tlbr(), 2, false),
        ]);
        let output = matcher().match_instances(&anchors, &gt).unwrap();

        assert!(output.assignments()[10].is_ignored());
        assert_eq!(
            output.assignments()[11],
            Assignment::Positive {
                class: 2,
                instance: 1
            }
        );
        assert!(output.positives().all(|(_, _, instance)| instance == 1));
    }

    #[test]
    fn empty_image_is_all_negative() {
        let anchors = anchors(&[1.0]);
        let output = matcher()
            .match_instances(&anchors, &ImageGroundTruth::default())
            .unwrap();
        assert_eq!(output.num_positives(), 0);
        assert_eq!(output.num_negatives(), anchors.len());
        assert!(output.targets().iter().all(|&value| value == 0.0));
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let anchors = anchors(&[1.0]);
        let gt = ImageGroundTruth::new(vec![instance([0.2, 0.2, 0.2, 0.5], 1, false)]);
        let err = matcher().match_instances(&anchors, &gt).unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_data_quality());
    }

    #[test]
    fn inverted_thresholds_fail_to_build() {
        let init = AnchorMatcherInit {
            threshold_pos: 0.3,
            threshold_neg: 0.4,
            threshold_crowd: 0.7,
            box_variances: [0.1, 0.2],
        };
        assert!(init.build().is_err());
    }
}
