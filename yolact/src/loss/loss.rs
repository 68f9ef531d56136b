//! Defines loss for training.

use super::{
    bce::{BceLoss, BceLossInit, BceWithLogitsLoss},
    cross_entropy::CrossEntropyLoss,
    hard_negative::HardNegativeMiner,
    misc::Reduction,
    smooth_l1::SmoothL1Loss,
};
use crate::{
    common::*,
    config::{Config, DetectionConfig},
    error::{ensure_config, ensure_data},
    ground_truth::ImageGroundTruth,
    mask,
    matching::MatchingOutput,
    prediction::Prediction,
};

pub use yolact_loss::*;
pub use yolact_loss_output::*;

mod yolact_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct YolactLossInit {
        pub detection: DetectionConfig,
        /// The side length of ground truth instance masks.
        pub mask_size: usize,
        pub weight_cls: f64,
        pub weight_box: f64,
        pub weight_mask: f64,
        pub weight_seg: f64,
        pub neg_pos_ratio: usize,
        pub max_masks_for_train: usize,
    }

    impl YolactLossInit {
        pub fn new(config: &Config) -> Self {
            let loss = &config.loss;
            Self {
                detection: config.detection,
                mask_size: config.model.proto_output_size,
                weight_cls: loss.weight_cls.raw(),
                weight_box: loss.weight_box.raw(),
                weight_mask: loss.weight_mask.raw(),
                weight_seg: loss.weight_seg.raw(),
                neg_pos_ratio: loss.neg_pos_ratio,
                max_masks_for_train: loss.max_masks_for_train,
            }
        }

        pub fn build(self) -> Result<YolactLoss> {
            let Self {
                detection,
                mask_size,
                weight_cls,
                weight_box,
                weight_mask,
                weight_seg,
                neg_pos_ratio,
                max_masks_for_train,
            } = self;

            detection.validate()?;
            ensure_config!(mask_size >= 1, "mask_size must be at least 1");
            ensure_config!(
                [weight_cls, weight_box, weight_mask, weight_seg]
                    .iter()
                    .all(|weight| weight.is_finite() && *weight >= 0.0),
                "loss weights must be non-negative"
            );

            Ok(YolactLoss {
                detection,
                mask_size,
                weight_cls,
                weight_box,
                weight_mask,
                weight_seg,
                max_masks_for_train,
                miner: HardNegativeMiner::new(neg_pos_ratio),
                cross_entropy: CrossEntropyLoss::new(Reduction::Sum),
                smooth_l1: SmoothL1Loss::new(1.0, Reduction::Sum)?,
                bce_mask: BceLossInit::default(Reduction::Sum).build()?,
                bce_seg: BceWithLogitsLoss::new(Reduction::Sum),
            })
        }
    }

    /// The weighted sum of localization, classification, mask and semantic
    /// segmentation losses.
    #[derive(Debug)]
    pub struct YolactLoss {
        detection: DetectionConfig,
        mask_size: usize,
        weight_cls: f64,
        weight_box: f64,
        weight_mask: f64,
        weight_seg: f64,
        max_masks_for_train: usize,
        miner: HardNegativeMiner,
        cross_entropy: CrossEntropyLoss,
        smooth_l1: SmoothL1Loss,
        bce_mask: BceLoss,
        bce_seg: BceWithLogitsLoss,
    }

    impl YolactLoss {
        /// Computes the batch loss.
        ///
        /// The three slices hold one entry per image. Localization and
        /// classification are normalized by the batch positive count, the
        /// mask loss by the number of trained masks and the segmentation
        /// loss by the number of images.
        pub fn forward(
            &self,
            predictions: &[Prediction],
            ground_truths: &[ImageGroundTruth],
            matchings: &[MatchingOutput],
        ) -> Result<(YolactLossOutput, YolactLossAuxiliary)> {
            ensure_data!(
                predictions.len() == ground_truths.len() && predictions.len() == matchings.len(),
                "batch has {} predictions, {} ground truths and {} matchings",
                predictions.len(),
                ground_truths.len(),
                matchings.len()
            );

            let mut loc_sum = 0.0;
            let mut conf_sum = 0.0;
            let mut mask_sum = 0.0;
            let mut seg_sum = 0.0;
            let mut num_positives = 0;
            let mut num_masks = 0;
            let mut images = Vec::with_capacity(predictions.len());

            for (index, (prediction, ground_truth, matching)) in
                izip!(predictions, ground_truths, matchings).enumerate()
            {
                self.check_example(prediction, ground_truth, matching)
                    .with_context(|| format!("invalid training example at batch index {}", index))?;

                let (conf, num_mined_negatives) = self.classification_loss(prediction, matching);
                let (mask, image_masks) = self.mask_loss(prediction, ground_truth, matching);

                loc_sum += self.localization_loss(prediction, matching);
                conf_sum += conf;
                mask_sum += mask;
                seg_sum += self.segmentation_loss(prediction, ground_truth);
                num_positives += matching.num_positives();
                num_masks += image_masks;

                images.push(ImageLossStats {
                    num_positives: matching.num_positives(),
                    num_mined_negatives,
                    num_masks: image_masks,
                });
            }

            let per = |sum: f64, count: usize| if count == 0 { 0.0 } else { sum / count as f64 };
            let loc_loss = per(loc_sum, num_positives);
            let conf_loss = per(conf_sum, num_positives);
            let mask_loss = per(mask_sum, num_masks);
            let seg_loss = per(seg_sum, predictions.len());
            let total_loss = self.weight_box * loc_loss
                + self.weight_cls * conf_loss
                + self.weight_mask * mask_loss
                + self.weight_seg * seg_loss;

            let output = YolactLossOutput {
                total_loss,
                loc_loss,
                conf_loss,
                mask_loss,
                seg_loss,
            };
            output.ensure_finite()?;

            Ok((output, YolactLossAuxiliary { images }))
        }

        fn check_example(
            &self,
            prediction: &Prediction,
            ground_truth: &ImageGroundTruth,
            matching: &MatchingOutput,
        ) -> Result<()> {
            let DetectionConfig {
                num_classes,
                label_background,
                ..
            } = self.detection;

            prediction.validate(matching.len(), num_classes)?;
            ground_truth.validate(num_classes, label_background, self.mask_size)?;
            ensure_data!(
                matching
                    .positives()
                    .all(|(_, _, instance)| instance < ground_truth.len()),
                "matching refers to an instance beyond the {} instances of the image",
                ground_truth.len()
            );
            Ok(())
        }

        /// Smooth L1 summed over positive anchors.
        fn localization_loss(&self, prediction: &Prediction, matching: &MatchingOutput) -> f64 {
            let targets = matching.targets();
            matching
                .positives()
                .map(|(anchor_index, _, _)| {
                    self.smooth_l1.forward(
                        prediction.box_regression.row(anchor_index),
                        targets.row(anchor_index),
                    )
                })
                .sum()
        }

        /// Cross entropy summed over positives and mined negatives.
        ///
        /// Returns the sum and the number of mined negatives.
        fn classification_loss(
            &self,
            prediction: &Prediction,
            matching: &MatchingOutput,
        ) -> (f64, usize) {
            let logits = &prediction.class_logits;
            let background = self.detection.label_background;

            let positive_loss: f64 = matching
                .positives()
                .map(|(anchor_index, class, _)| {
                    self.cross_entropy.forward_one(logits.row(anchor_index), class)
                })
                .sum();

            let candidates: Vec<(usize, f64)> = if matching.num_positives() == 0 {
                vec![]
            } else {
                matching
                    .negatives()
                    .map(|anchor_index| {
                        let loss = self
                            .cross_entropy
                            .forward_one(logits.row(anchor_index), background);
                        (anchor_index, loss)
                    })
                    .collect()
            };
            let mined = self.miner.mine(&candidates, matching.num_positives());
            let negative_loss: f64 = mined.iter().map(|&(_, loss)| loss).sum();

            (positive_loss + negative_loss, mined.len())
        }

        /// Per-mask BCE inside the matched box, each normalized by the box
        /// area in pixels.
        ///
        /// Returns the sum and the number of masks trained.
        fn mask_loss(
            &self,
            prediction: &Prediction,
            ground_truth: &ImageGroundTruth,
            matching: &MatchingOutput,
        ) -> (f64, usize) {
            let prototypes = prediction.prototypes.view();

            let losses: Vec<f64> = matching
                .positives()
                .take(self.max_masks_for_train)
                .filter_map(|(anchor_index, _, instance)| {
                    let instance = &ground_truth.instances[instance];
                    let (height, width) = instance.mask.dim();
                    let (rows, cols) = instance.bbox.pixel_ranges(height, width);
                    let area = rows.len() * cols.len();
                    if area == 0 {
                        return None;
                    }

                    let logits = mask::assemble(
                        prototypes,
                        prediction.mask_coefficients.row(anchor_index),
                    );
                    let probs =
                        mask::resize_bilinear(logits.view(), (height, width)).mapv(mask::sigmoid);
                    let loss = self.bce_mask.forward(
                        probs.slice(s![rows.clone(), cols.clone()]),
                        instance.mask.slice(s![rows, cols]),
                    );
                    Some(loss / area as f64)
                })
                .collect();

            (losses.iter().sum(), losses.len())
        }

        /// BCE between segmentation logits and the per-class union of
        /// instance masks, summed over the classes present in the image and
        /// normalized by the map size.
        fn segmentation_loss(&self, prediction: &Prediction, ground_truth: &ImageGroundTruth) -> f64 {
            let (_, height, width) = prediction.segmentation.dim();
            let mut targets: BTreeMap<usize, Array2<f32>> = BTreeMap::new();

            for (_, instance) in ground_truth.non_crowd() {
                let channel = match self.detection.foreground_channel(instance.class) {
                    Some(channel) => channel,
                    None => continue,
                };
                let resized = mask::resize_bilinear(instance.mask.view(), (height, width));
                let target = targets
                    .entry(channel)
                    .or_insert_with(|| Array2::zeros((height, width)));
                target.zip_mut_with(&resized, |target, &value| {
                    if value >= 0.5 {
                        *target = 1.0;
                    }
                });
            }

            let loss: f64 = targets
                .iter()
                .map(|(&channel, target)| {
                    self.bce_seg.forward(
                        prediction.segmentation.index_axis(Axis(0), channel),
                        target.view(),
                    )
                })
                .sum();
            loss / (height * width) as f64
        }
    }
}

mod yolact_loss_output {
    use super::*;

    /// The loss scalars of one batch.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct YolactLossOutput {
        pub total_loss: f64,
        pub loc_loss: f64,
        pub conf_loss: f64,
        pub mask_loss: f64,
        pub seg_loss: f64,
    }

    impl YolactLossOutput {
        /// Named loss terms, total first.
        pub fn terms(&self) -> [(&'static str, f64); 5] {
            [
                ("total_loss", self.total_loss),
                ("loc_loss", self.loc_loss),
                ("conf_loss", self.conf_loss),
                ("mask_loss", self.mask_loss),
                ("seg_loss", self.seg_loss),
            ]
        }

        pub fn ensure_finite(&self) -> Result<()> {
            for (term, value) in self.terms() {
                if !value.is_finite() {
                    return Err(crate::Error::Numerical { term, value }.into());
                }
            }
            Ok(())
        }
    }

    /// Per-image bookkeeping of a loss computation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageLossStats {
        pub num_positives: usize,
        pub num_mined_negatives: usize,
        pub num_masks: usize,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct YolactLossAuxiliary {
        pub images: Vec<ImageLossStats>,
    }
}
