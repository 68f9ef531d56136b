use super::average_precision::{ApCalculator, ApDetection, IntegralMethod};
use crate::{
    common::*,
    config::Config,
    error::{ensure_config, ensure_data},
    ground_truth::{GroundTruthInstance, ImageGroundTruth},
    inference::Detection,
    mask,
    select::{self, Scored},
};

/// The overlap criterion used to match detections to ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Box,
    Mask,
}

/// Per-class and mean average precision of one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityReport {
    /// AP averaged over IoU thresholds, for every class having ground truth.
    pub class_ap: BTreeMap<usize, f64>,
    /// The mean of `class_ap`.
    pub map: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_images: usize,
    pub boxes: ModalityReport,
    pub masks: ModalityReport,
}

impl EvaluationReport {
    pub fn modality(&self, modality: Modality) -> &ModalityReport {
        match modality {
            Modality::Box => &self.boxes,
            Modality::Mask => &self.masks,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorInit {
    pub num_classes: usize,
    pub label_background: usize,
    pub iou_thresholds: Vec<R64>,
    pub integral_method: IntegralMethod,
}

impl EvaluatorInit {
    pub fn new(config: &Config) -> Self {
        Self {
            num_classes: config.detection.num_classes,
            label_background: config.detection.label_background,
            iou_thresholds: config.evaluation.iou_thresholds.clone(),
            integral_method: config.evaluation.integral_method,
        }
    }

    pub fn build(self) -> Result<Evaluator> {
        let Self {
            num_classes,
            label_background,
            iou_thresholds,
            integral_method,
        } = self;

        ensure_config!(
            !iou_thresholds.is_empty(),
            "iou_thresholds must be non-empty"
        );
        ensure_config!(
            label_background < num_classes,
            "label_background {} is out of range for {} classes",
            label_background,
            num_classes
        );
        let ap_calculator = ApCalculator::new(integral_method)?;
        let records = || Records::new(iou_thresholds.len(), num_classes);

        Ok(Evaluator {
            num_classes,
            label_background,
            ap_calculator,
            box_records: records(),
            mask_records: records(),
            iou_thresholds,
            num_images: 0,
        })
    }
}

/// Match outcomes accumulated over images.
#[derive(Debug, Clone)]
struct Records {
    /// Detections in `[threshold][class]` layout.
    detections: Vec<Vec<Vec<ApDetection>>>,
    /// Non-crowd ground truth count per class.
    num_ground_truth: Vec<usize>,
}

impl Records {
    fn new(num_thresholds: usize, num_classes: usize) -> Self {
        Self {
            detections: vec![vec![vec![]; num_classes]; num_thresholds],
            num_ground_truth: vec![0; num_classes],
        }
    }
}

/// Accumulates detections of many images and reports average precision.
#[derive(Debug, Clone)]
pub struct Evaluator {
    num_classes: usize,
    label_background: usize,
    iou_thresholds: Vec<R64>,
    ap_calculator: ApCalculator,
    box_records: Records,
    mask_records: Records,
    num_images: usize,
}

impl Evaluator {
    pub fn num_images(&self) -> usize {
        self.num_images
    }

    /// Matches the detections of one image to its ground truth.
    ///
    /// At every IoU threshold, detections are visited by descending score
    /// and each takes the best-overlapping unmatched instance of its class.
    /// A detection left unmatched is a false positive unless it overlaps a
    /// crowd region of its class, in which case it is not counted.
    pub fn add_image(
        &mut self,
        detections: &[Detection],
        ground_truth: &ImageGroundTruth,
    ) -> Result<()> {
        let instances = &ground_truth.instances;

        for instance in instances {
            ensure_data!(
                instance.class < self.num_classes && instance.class != self.label_background,
                "ground truth class {} is not a foreground class",
                instance.class
            );
        }
        for detection in detections {
            ensure_data!(
                detection.class < self.num_classes && detection.class != self.label_background,
                "detection class {} is not a foreground class",
                detection.class
            );
        }

        let order: Vec<usize> = select::sort_descending(
            detections
                .iter()
                .enumerate()
                .map(|(index, det)| Scored::new(index, det.score))
                .collect(),
        )
        .into_iter()
        .map(|item| item.index)
        .collect();

        // box overlaps
        {
            let (ious, crowd_overlaps) = overlaps(detections, instances.len(), |det, gt_index| {
                let gt = &instances[gt_index];
                (
                    det.bbox.iou_with(&gt.bbox) as f64,
                    det.bbox.ioa_with(&gt.bbox) as f64,
                )
            });
            record_image(
                &mut self.box_records,
                &self.iou_thresholds,
                &order,
                detections,
                instances,
                &ious,
                &crowd_overlaps,
            );
        }

        // mask overlaps
        {
            let gt_masks: Vec<_> = instances
                .iter()
                .map(|gt| mask::binarize(gt.mask.view()))
                .collect();
            let (ious, crowd_overlaps) = overlaps(detections, instances.len(), |det, gt_index| {
                let gt_mask = gt_masks[gt_index].view();
                (
                    mask::mask_iou(det.mask.view(), gt_mask),
                    mask::mask_ioa(det.mask.view(), gt_mask),
                )
            });
            record_image(
                &mut self.mask_records,
                &self.iou_thresholds,
                &order,
                detections,
                instances,
                &ious,
                &crowd_overlaps,
            );
        }

        self.num_images += 1;
        Ok(())
    }

    /// Computes per-class AP and mAP of both modalities.
    ///
    /// Classes without ground truth are left out of the mean.
    pub fn finish(&self) -> EvaluationReport {
        let report = |records: &Records| {
            let class_ap: BTreeMap<usize, f64> = (0..self.num_classes)
                .filter(|&class| records.num_ground_truth[class] > 0)
                .map(|class| {
                    let sum: R64 = records
                        .detections
                        .iter()
                        .map(|per_class| {
                            self.ap_calculator.compute_by_detections(
                                &per_class[class],
                                records.num_ground_truth[class],
                            )
                        })
                        .sum();
                    (class, sum.raw() / self.iou_thresholds.len() as f64)
                })
                .collect();
            let map = if class_ap.is_empty() {
                0.0
            } else {
                class_ap.values().sum::<f64>() / class_ap.len() as f64
            };
            ModalityReport { class_ap, map }
        };

        let output = EvaluationReport {
            num_images: self.num_images,
            boxes: report(&self.box_records),
            masks: report(&self.mask_records),
        };

        info!(
            "evaluated {} images, box mAP {:.4}, mask mAP {:.4}",
            output.num_images, output.boxes.map, output.masks.map
        );
        output
    }
}

/// Decodes and scores up to `num_examples` validation examples.
///
/// `decode` turns one model input into detections. Each example pairs a
/// model input with the annotations of the same image.
pub fn evaluate<F, X, I>(
    config: &Config,
    mut decode: F,
    examples: I,
    num_examples: usize,
) -> Result<EvaluationReport>
where
    F: FnMut(&X) -> Result<Vec<Detection>>,
    I: IntoIterator<Item = (X, ImageGroundTruth)>,
{
    let mut evaluator = EvaluatorInit::new(config).build()?;

    for (index, (input, ground_truth)) in examples.into_iter().take(num_examples).enumerate() {
        let detections =
            decode(&input).with_context(|| format!("unable to decode example {}", index))?;
        evaluator
            .add_image(&detections, &ground_truth)
            .with_context(|| format!("invalid validation example {}", index))?;
    }

    if evaluator.num_images() < num_examples {
        warn!(
            "only {} of {} validation examples are available",
            evaluator.num_images(),
            num_examples
        );
    }

    Ok(evaluator.finish())
}

/// Builds `[detections, instances]` matrices of IoU and of crowd overlap.
fn overlaps<F>(
    detections: &[Detection],
    num_instances: usize,
    mut overlap_fn: F,
) -> (Array2<f64>, Array2<f64>)
where
    F: FnMut(&Detection, usize) -> (f64, f64),
{
    let shape = (detections.len(), num_instances);
    let mut ious = Array2::zeros(shape);
    let mut crowd_overlaps = Array2::zeros(shape);

    for (det_index, det) in detections.iter().enumerate() {
        for gt_index in 0..num_instances {
            let (iou, crowd_overlap) = overlap_fn(det, gt_index);
            ious[[det_index, gt_index]] = iou;
            crowd_overlaps[[det_index, gt_index]] = crowd_overlap;
        }
    }

    (ious, crowd_overlaps)
}

fn record_image(
    records: &mut Records,
    iou_thresholds: &[R64],
    order: &[usize],
    detections: &[Detection],
    instances: &[GroundTruthInstance],
    ious: &Array2<f64>,
    crowd_overlaps: &Array2<f64>,
) {
    for instance in instances.iter().filter(|gt| !gt.is_crowd) {
        records.num_ground_truth[instance.class] += 1;
    }

    for (thresh_index, thresh) in iou_thresholds.iter().enumerate() {
        let thresh = thresh.raw();
        let mut matched = vec![false; instances.len()];

        for &det_index in order {
            let det = &detections[det_index];

            let best = instances
                .iter()
                .enumerate()
                .filter(|&(gt_index, gt)| {
                    !gt.is_crowd
                        && gt.class == det.class
                        && !matched[gt_index]
                        && ious[[det_index, gt_index]] >= thresh
                })
                .fold(None, |best: Option<(usize, f64)>, (gt_index, _)| {
                    let iou = ious[[det_index, gt_index]];
                    match best {
                        Some((_, best_iou)) if best_iou >= iou => best,
                        _ => Some((gt_index, iou)),
                    }
                });

            let is_true_positive = match best {
                Some((gt_index, _)) => {
                    matched[gt_index] = true;
                    true
                }
                None => {
                    let in_crowd = instances.iter().enumerate().any(|(gt_index, gt)| {
                        gt.is_crowd
                            && gt.class == det.class
                            && crowd_overlaps[[det_index, gt_index]] >= thresh
                    });
                    if in_crowd {
                        continue;
                    }
                    false
                }
            };

            records.detections[thresh_index][det.class].push(ApDetection {
                confidence: r64(det.score as f64),
                is_true_positive,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK_SIZE: usize = 8;

    fn config() -> Config {
        let mut config = Config::coco();
        config.detection.num_classes = 4;
        config
    }

    fn box_mask(bbox: &TLBR<f32>) -> Array2<bool> {
        let (rows, cols) = bbox.pixel_ranges(MASK_SIZE, MASK_SIZE);
        let mut mask = Array2::from_elem((MASK_SIZE, MASK_SIZE), false);
        mask.slice_mut(s![rows, cols]).fill(true);
        mask
    }

    fn instance(tlbr: [f32; 4], class: usize, is_crowd: bool) -> GroundTruthInstance {
        let bbox = TLBR::from_tlbr(tlbr);
        GroundTruthInstance {
            class,
            bbox,
            mask: box_mask(&bbox).mapv(|value| if value { 1.0 } else { 0.0 }),
            is_crowd,
        }
    }

    fn detection(tlbr: [f32; 4], class: usize, score: f32) -> Detection {
        let bbox = TLBR::from_tlbr(tlbr);
        Detection {
            bbox,
            class,
            score,
            anchor_index: 0,
            coefficients: Array1::zeros(1),
            mask: box_mask(&bbox),
        }
    }

    fn evaluator() -> Evaluator {
        EvaluatorInit::new(&config()).build().unwrap()
    }

    #[test]
    fn perfect_detections() {
        let mut evaluator = evaluator();
        let gt = ImageGroundTruth::new(vec![
            instance([0.0, 0.0, 0.5, 0.5], 1, false),
            instance([0.5, 0.5, 1.0, 1.0], 2, false),
        ]);
        let dets = vec![
            detection([0.0, 0.0, 0.5, 0.5], 1, 0.9),
            detection([0.5, 0.5, 1.0, 1.0], 2, 0.8),
        ];
        evaluator.add_image(&dets, &gt).unwrap();

        let report = evaluator.finish();
        assert_eq!(report.boxes.class_ap.len(), 2);
        assert!(abs_diff_eq!(report.boxes.map, 1.0));
        assert!(abs_diff_eq!(report.masks.map, 1.0));
    }

    #[test]
    fn image_without_ground_truth_only_adds_false_positives() {
        let mut evaluator = evaluator();
        let gt = ImageGroundTruth::new(vec![instance([0.0, 0.0, 0.5, 0.5], 1, false)]);
        evaluator
            .add_image(&[detection([0.0, 0.0, 0.5, 0.5], 1, 0.5)], &gt)
            .unwrap();
        evaluator
            .add_image(
                &[detection([0.5, 0.5, 1.0, 1.0], 1, 0.9)],
                &ImageGroundTruth::default(),
            )
            .unwrap();

        let report = evaluator.finish();
        // precision 1/2 at full recall
        assert!(abs_diff_eq!(report.boxes.class_ap[&1], 0.5, epsilon = 1e-9));
        assert_eq!(report.num_images, 2);
    }

    #[test]
    fn image_without_detections_has_zero_recall() {
        let mut evaluator = evaluator();
        let gt = ImageGroundTruth::new(vec![instance([0.0, 0.0, 0.5, 0.5], 3, false)]);
        evaluator.add_image(&[], &gt).unwrap();

        let report = evaluator.finish();
        assert_eq!(report.boxes.class_ap[&3], 0.0);
        assert_eq!(report.masks.map, 0.0);
    }

    #[test]
    fn nothing_to_evaluate() {
        let report = evaluator().finish();
        assert!(report.boxes.class_ap.is_empty());
        assert_eq!(report.boxes.map, 0.0);
    }

    #[test]
    fn duplicates_and_crowds() {
        let mut evaluator = evaluator();
        let gt = ImageGroundTruth::new(vec![
            instance([0.0, 0.0, 0.5, 0.5], 1, false),
            instance([0.5, 0.0, 1.0, 1.0], 1, true),
        ]);
        let dets = vec![
            detection([0.0, 0.0, 0.5, 0.5], 1, 0.9),
            // duplicate of the first, a false positive
            detection([0.0, 0.0, 0.5, 0.5], 1, 0.3),
            // inside the crowd region, not counted
            detection([0.5, 0.0, 0.75, 0.5], 1, 0.8),
        ];
        evaluator.add_image(&dets, &gt).unwrap();

        let report = evaluator.finish();
        // the true positive ranks first, so recall 1 is reached at precision 1
        assert!(abs_diff_eq!(report.boxes.class_ap[&1], 1.0));
        assert_eq!(evaluator.box_records.num_ground_truth[1], 1);
        assert_eq!(evaluator.box_records.detections[0][1].len(), 2);
    }

    #[test]
    fn evaluate_examples() {
        let examples = vec![
            (
                vec![detection([0.0, 0.0, 0.5, 0.5], 1, 0.9)],
                ImageGroundTruth::new(vec![instance([0.0, 0.0, 0.5, 0.5], 1, false)]),
            ),
            (vec![], ImageGroundTruth::new(vec![instance([0.5, 0.5, 1.0, 1.0], 2, false)])),
        ];

        let report = evaluate(&config(), |dets: &Vec<Detection>| Ok(dets.clone()), examples.clone(), 1)
            .unwrap();
        assert_eq!(report.num_images, 1);
        assert!(abs_diff_eq!(report.boxes.map, 1.0));

        let report = evaluate(&config(), |dets: &Vec<Detection>| Ok(dets.clone()), examples, 5).unwrap();
        assert_eq!(report.num_images, 2);
        assert!(abs_diff_eq!(report.boxes.map, 0.5));
    }

    #[test]
    fn background_detection_is_rejected() {
        let err = evaluator()
            .add_image(&[detection([0.0, 0.0, 0.5, 0.5], 0, 0.9)], &ImageGroundTruth::default())
            .unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_data_quality());
    }
}
