use super::nms::{NmsCandidate, NonMaxSuppression, NonMaxSuppressionInit};
use crate::{
    anchor::Anchors,
    common::*,
    config::{Config, DetectionConfig},
    error::ensure_data,
    loss::softmax,
    mask,
    prediction::Prediction,
    select::{self, Scored},
};

#[derive(Debug, Clone)]
pub struct YolactInferenceInit {
    pub detection: DetectionConfig,
    pub box_variances: [f64; 2],
}

impl YolactInferenceInit {
    pub fn new(config: &Config) -> Self {
        let [v0, v1] = config.loss.box_variances;
        Self {
            detection: config.detection,
            box_variances: [v0.raw(), v1.raw()],
        }
    }

    pub fn build(self) -> Result<YolactInference> {
        let Self {
            detection,
            box_variances: [v0, v1],
        } = self;

        detection.validate()?;
        let coder = BoxCoder::new([v0 as f32, v1 as f32])
            .map_err(|err| crate::Error::config(err.to_string()))?;
        let nms = NonMaxSuppressionInit {
            iou_threshold: detection.nms_threshold,
        }
        .build()?;

        Ok(YolactInference {
            detection,
            conf_threshold: detection.conf_threshold.raw() as f32,
            coder,
            nms,
        })
    }
}

/// One decoded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// The box in normalized image coordinates, clipped to the image.
    pub bbox: TLBR<f32>,
    pub class: usize,
    pub score: f32,
    /// The anchor the detection is decoded from.
    pub anchor_index: usize,
    pub coefficients: Array1<f32>,
    /// The binary mask at prototype resolution.
    pub mask: Array2<bool>,
}

#[derive(Debug)]
pub struct YolactInference {
    detection: DetectionConfig,
    conf_threshold: f32,
    coder: BoxCoder<f32>,
    nms: NonMaxSuppression,
}

impl YolactInference {
    /// Decodes the outputs of one image into detections, most confident
    /// first.
    pub fn forward(&self, prediction: &Prediction, anchors: &Anchors) -> Result<Vec<Detection>> {
        prediction.validate(anchors.len(), self.detection.num_classes)?;

        let mut class_probs = prediction.class_logits.clone();
        for mut row in class_probs.outer_iter_mut() {
            let probs = softmax(row.view());
            row.assign(&probs);
        }

        self.detect(class_probs.view(), prediction, anchors)
    }

    /// Same as [forward](Self::forward), but takes class probabilities in
    /// `[anchors, classes + 1]` shape instead of the logits of `prediction`.
    pub fn detect(
        &self,
        class_probs: ArrayView2<f32>,
        prediction: &Prediction,
        anchors: &Anchors,
    ) -> Result<Vec<Detection>> {
        let DetectionConfig {
            num_classes,
            label_background,
            top_k,
            ..
        } = self.detection;

        prediction.validate(anchors.len(), num_classes)?;
        ensure_data!(
            class_probs.dim() == (anchors.len(), num_classes),
            "class probabilities have shape {:?}, expect ({}, {})",
            class_probs.dim(),
            anchors.len(),
            num_classes
        );

        let mut anchor_indexes = vec![];
        let mut candidates = vec![];
        let mut num_non_finite = 0;

        for (anchor_index, (anchor, probs)) in
            izip!(anchors.iter(), class_probs.outer_iter()).enumerate()
        {
            let best = probs
                .iter()
                .enumerate()
                .filter(|&(class, _)| class != label_background)
                .fold(None, |best: Option<(usize, f32)>, (class, &prob)| match best {
                    Some((_, best_prob)) if best_prob >= prob => best,
                    _ => Some((class, prob)),
                });
            let (class, score) = match best {
                Some((class, score)) if score >= self.conf_threshold => (class, score),
                _ => continue,
            };

            let bbox: TLBR<f32> = self
                .coder
                .decode(&anchor.cycxhw(), prediction.regression_of(anchor_index))
                .into();
            if !bbox.tlbr().iter().all(|value| value.is_finite()) {
                num_non_finite += 1;
                continue;
            }

            anchor_indexes.push(anchor_index);
            candidates.push(NmsCandidate {
                class,
                score,
                bbox: bbox.clamp_unit(),
            });
        }

        if num_non_finite > 0 {
            warn!("dropped {} candidates with non-finite boxes", num_non_finite);
        }

        let kept: Vec<_> = self
            .nms
            .forward(&candidates)
            .into_iter()
            .map(|position| Scored::new(position, candidates[position].score))
            .collect();
        let num_kept = kept.len();
        let selected = select::top_k(kept, top_k);

        let prototypes = prediction.prototypes.view();
        let detections: Vec<_> = selected
            .into_iter()
            .map(|item| {
                let NmsCandidate { class, score, bbox } = candidates[item.index];
                let anchor_index = anchor_indexes[item.index];
                let coefficients = prediction.mask_coefficients.row(anchor_index);

                Detection {
                    bbox,
                    class,
                    score,
                    anchor_index,
                    mask: mask::instance_mask(prototypes, coefficients, &bbox),
                    coefficients: coefficients.to_owned(),
                }
            })
            .collect();

        debug!(
            "{} candidates above threshold, {} after nms, {} detections",
            candidates.len(),
            num_kept,
            detections.len()
        );

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anchor::AnchorGenerator, config::AnchorConfig};

    fn config() -> Config {
        let mut config = Config::coco();
        config.anchor = AnchorConfig {
            image_size: NonZeroUsize::new(100).unwrap(),
            feature_map_sizes: vec![NonZeroUsize::new(4).unwrap()],
            aspect_ratios: vec![r64(1.0)],
            scales: vec![r64(25.0)],
        };
        config.detection.num_classes = 3;
        config.model.num_mask = 1;
        config
    }

    fn setup(config: &Config) -> (YolactInference, Anchors, Prediction) {
        let inference = YolactInferenceInit::new(config).build().unwrap();
        let anchors = AnchorGenerator::new(&config.anchor).unwrap().generate();
        let num_anchors = anchors.len();
        let prediction = Prediction {
            class_logits: Array2::zeros((num_anchors, 3)),
            box_regression: Array2::zeros((num_anchors, 4)),
            mask_coefficients: Array2::ones((num_anchors, 1)),
            prototypes: Array3::from_elem((8, 8, 1), 2.0),
            segmentation: Array3::zeros((2, 4, 4)),
        };
        (inference, anchors, prediction)
    }

    /// All probability mass on background.
    fn background_probs(num_anchors: usize) -> Array2<f32> {
        let mut probs = Array2::zeros((num_anchors, 3));
        probs.column_mut(0).fill(1.0);
        probs
    }

    #[test]
    fn confidence_threshold_is_inclusive() {
        let config = config();
        let (inference, anchors, prediction) = setup(&config);
        let threshold = config.detection.conf_threshold.raw() as f32;

        let mut probs = background_probs(anchors.len());
        probs[[0, 1]] = threshold;
        probs[[5, 2]] = f32::from_bits(threshold.to_bits() - 1);

        let detections = inference
            .detect(probs.view(), &prediction, &anchors)
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].anchor_index, 0);
        assert_eq!(detections[0].class, 1);
    }

    #[test]
    fn decoded_detection_has_box_and_mask() {
        let config = config();
        let (inference, anchors, prediction) = setup(&config);
        let mut probs = background_probs(anchors.len());
        probs[[5, 2]] = 0.9;

        let detections = inference
            .detect(probs.view(), &prediction, &anchors)
            .unwrap();
        let detection = &detections[0];
        for (lhs, rhs) in izip!(detection.bbox.tlbr(), [0.25, 0.25, 0.5, 0.5]) {
            assert!((lhs - rhs).abs() < 1e-6);
        }
        // the mask is cropped to the box, which covers a 2x2 patch
        assert_eq!(detection.mask.iter().filter(|&&value| value).count(), 4);
        assert!(detection.mask[[2, 2]] && detection.mask[[3, 3]]);
    }

    #[test]
    fn top_k_keeps_most_confident() {
        let mut config = config();
        config.detection.top_k = 2;
        let (inference, anchors, prediction) = setup(&config);

        let mut probs = background_probs(anchors.len());
        for (anchor_index, score) in [(0, 0.6), (5, 0.9), (10, 0.3), (15, 0.8)] {
            probs[[anchor_index, 1]] = score;
        }

        let detections = inference
            .detect(probs.view(), &prediction, &anchors)
            .unwrap();
        let anchor_indexes: Vec<_> = detections.iter().map(|det| det.anchor_index).collect();
        assert_eq!(anchor_indexes, vec![5, 15]);
    }

    #[test]
    fn nothing_above_threshold_is_empty() {
        let config = config();
        let (inference, anchors, prediction) = setup(&config);
        let detections = inference
            .detect(background_probs(anchors.len()).view(), &prediction, &anchors)
            .unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn forward_applies_softmax() {
        let config = config();
        let (inference, anchors, mut prediction) = setup(&config);
        prediction.class_logits[[3, 2]] = 5.0;

        let detections = inference.forward(&prediction, &anchors).unwrap();
        // uniform logits give 1/3 to every class, so all anchors pass 0.05
        assert_eq!(detections.len(), anchors.len());
        assert_eq!(detections[0].anchor_index, 3);
        assert_eq!(detections[0].class, 2);
    }

    #[test]
    fn misaligned_prediction_is_rejected() {
        let config = config();
        let (inference, _, prediction) = setup(&config);
        let mut anchor_config = config.anchor.clone();
        anchor_config.feature_map_sizes = vec![NonZeroUsize::new(3).unwrap()];
        let anchors = AnchorGenerator::new(&anchor_config).unwrap().generate();

        let err = inference.forward(&prediction, &anchors).unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_data_quality());
    }
}
