//! Detector configuration format.
//!
//! The configuration is loaded once at startup, validated, and then shared
//! read-only by every component.

use crate::{common::*, error::ensure_config, evaluation::IntegralMethod};

pub use anchor::*;
pub use detection::*;
pub use loss::*;
pub use training::*;

/// The main detector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub anchor: AnchorConfig,
    pub matching: MatchingConfig,
    pub detection: DetectionConfig,
    pub loss: LossConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl Config {
    /// Loads and validates a JSON5 configuration file.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .map_err(|err| crate::Error::config(format!("{}: {}", path.display(), err)))?;
        config.validate()?;
        Ok(config)
    }

    /// The COCO configuration of the reference YOLACT training setup.
    pub fn coco() -> Self {
        Self {
            anchor: AnchorConfig {
                image_size: NonZeroUsize::new(550).unwrap(),
                feature_map_sizes: [69, 35, 18, 9, 5]
                    .into_iter()
                    .map(|size| NonZeroUsize::new(size).unwrap())
                    .collect(),
                aspect_ratios: vec![r64(1.0), r64(0.5), r64(2.0)],
                scales: vec![r64(24.0), r64(48.0), r64(96.0), r64(192.0), r64(384.0)],
            },
            matching: MatchingConfig {
                threshold_pos: r64(0.5),
                threshold_neg: r64(0.4),
                threshold_crowd: r64(0.7),
            },
            detection: DetectionConfig {
                num_classes: 81,
                label_background: 0,
                top_k: 200,
                conf_threshold: r64(0.05),
                nms_threshold: r64(0.5),
            },
            loss: LossConfig::default(),
            model: ModelConfig {
                num_mask: 32,
                proto_output_size: 138,
            },
            parser: ParserConfig::default(),
            evaluation: EvaluationConfig::default(),
            training: TrainingConfig::default(),
        }
    }

    /// Checks the cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.anchor.validate()?;
        self.matching.validate()?;
        self.detection.validate()?;
        self.loss.validate()?;
        self.evaluation.validate()?;

        let ModelConfig {
            num_mask,
            proto_output_size,
        } = self.model;
        ensure_config!(num_mask >= 1, "num_mask must be at least 1");
        ensure_config!(
            proto_output_size >= 1,
            "proto_output_size must be at least 1"
        );

        let ParserConfig {
            discard_box_height,
            discard_box_width,
        } = self.parser;
        ensure_config!(
            discard_box_height >= 0.0 && discard_box_width >= 0.0,
            "discard box sizes must be non-negative"
        );

        Ok(())
    }

    /// The dense class count excluding background.
    pub fn num_foreground_classes(&self) -> usize {
        self.detection.num_classes - 1
    }
}

mod anchor {
    use super::*;

    /// Anchor layout options.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AnchorConfig {
        /// The side length of the square input image in pixels.
        pub image_size: NonZeroUsize,
        /// The side length of each pyramid level's feature map, finest first.
        pub feature_map_sizes: Vec<NonZeroUsize>,
        /// The width-to-height ratios applied at every grid cell.
        pub aspect_ratios: Vec<R64>,
        /// The base anchor size of each pyramid level in pixels.
        pub scales: Vec<R64>,
    }

    impl AnchorConfig {
        pub fn validate(&self) -> Result<()> {
            let Self {
                feature_map_sizes,
                aspect_ratios,
                scales,
                ..
            } = self;

            ensure_config!(
                !feature_map_sizes.is_empty(),
                "feature_map_sizes must not be empty"
            );
            ensure_config!(
                feature_map_sizes.len() == scales.len(),
                "feature_map_sizes has {} levels but scales has {}",
                feature_map_sizes.len(),
                scales.len()
            );
            ensure_config!(
                !aspect_ratios.is_empty(),
                "aspect_ratios must not be empty"
            );
            ensure_config!(
                aspect_ratios.iter().all(|&ratio| ratio > 0.0),
                "aspect ratios must be positive"
            );
            ensure_config!(
                scales.iter().all(|&scale| scale > 0.0),
                "anchor scales must be positive"
            );
            Ok(())
        }

        /// The total number of anchors over all pyramid levels.
        pub fn num_anchors(&self) -> usize {
            let num_ratios = self.aspect_ratios.len();
            self.feature_map_sizes
                .iter()
                .map(|size| size.get().pow(2) * num_ratios)
                .sum()
        }
    }

    /// Ground truth assignment thresholds.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct MatchingConfig {
        /// An anchor whose best IoU reaches this value becomes positive.
        pub threshold_pos: R64,
        /// An anchor whose best IoU stays below this value becomes negative.
        pub threshold_neg: R64,
        /// Anchors covered by a crowd region at least this much are ignored.
        pub threshold_crowd: R64,
    }

    impl MatchingConfig {
        pub fn validate(&self) -> Result<()> {
            let Self {
                threshold_pos,
                threshold_neg,
                threshold_crowd,
            } = *self;
            let unit = |value: R64| value >= 0.0 && value <= 1.0;

            ensure_config!(
                unit(threshold_pos) && unit(threshold_neg) && unit(threshold_crowd),
                "matching thresholds must be in range [0, 1]"
            );
            ensure_config!(
                threshold_pos >= threshold_neg,
                "threshold_pos ({}) must not be less than threshold_neg ({})",
                threshold_pos,
                threshold_neg
            );
            Ok(())
        }
    }

    /// Options for the tiny-box filter applied before matching.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct ParserConfig {
        /// Instances shorter than this, in normalized units, are dropped.
        pub discard_box_height: R64,
        /// Instances narrower than this, in normalized units, are dropped.
        pub discard_box_width: R64,
    }

    impl Default for ParserConfig {
        fn default() -> Self {
            Self {
                discard_box_height: r64(4.0 / 550.0),
                discard_box_width: r64(4.0 / 550.0),
            }
        }
    }
}

mod detection {
    use super::*;

    /// Post-processing options.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct DetectionConfig {
        /// The number of classes including background.
        pub num_classes: usize,
        /// The class index reserved for background.
        pub label_background: usize,
        /// The maximum number of detections kept per image.
        pub top_k: usize,
        /// The minimum foreground confidence of a kept detection, inclusive.
        pub conf_threshold: R64,
        /// Boxes overlapping a kept box of the same class at least this much
        /// are suppressed.
        pub nms_threshold: R64,
    }

    impl DetectionConfig {
        pub fn validate(&self) -> Result<()> {
            let Self {
                num_classes,
                label_background,
                top_k,
                conf_threshold,
                nms_threshold,
            } = *self;

            ensure_config!(
                num_classes >= 2,
                "num_classes must count background and at least one class"
            );
            ensure_config!(
                label_background < num_classes,
                "label_background {} is out of range for {} classes",
                label_background,
                num_classes
            );
            ensure_config!(top_k >= 1, "top_k must be at least 1");
            ensure_config!(
                conf_threshold >= 0.0 && conf_threshold <= 1.0,
                "conf_threshold must be in range [0, 1]"
            );
            ensure_config!(
                nms_threshold >= 0.0 && nms_threshold <= 1.0,
                "nms_threshold must be in range [0, 1]"
            );
            Ok(())
        }

        /// The segmentation channel of a class, which skips background.
        pub fn foreground_channel(&self, class: usize) -> Option<usize> {
            match class.cmp(&self.label_background) {
                Ordering::Less => Some(class),
                Ordering::Equal => None,
                Ordering::Greater => Some(class - 1),
            }
        }
    }

    /// The shapes of the external network outputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// The number of prototype masks.
        pub num_mask: usize,
        /// The side length of prototype and ground truth masks.
        pub proto_output_size: usize,
    }

    /// Average precision options.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EvaluationConfig {
        /// The IoU thresholds averaged into the mAP.
        pub iou_thresholds: Vec<R64>,
        /// How the precision/recall curve is integrated.
        pub integral_method: IntegralMethod,
    }

    impl EvaluationConfig {
        pub fn validate(&self) -> Result<()> {
            ensure_config!(
                !self.iou_thresholds.is_empty(),
                "iou_thresholds must not be empty"
            );
            ensure_config!(
                self.iou_thresholds
                    .iter()
                    .all(|&thresh| thresh > 0.0 && thresh <= 1.0),
                "iou_thresholds must be in range (0, 1]"
            );
            if let IntegralMethod::Interpolation(n_points) = self.integral_method {
                ensure_config!(
                    n_points >= 2,
                    "interpolation needs at least 2 points, got {}",
                    n_points
                );
            }
            Ok(())
        }
    }

    impl Default for EvaluationConfig {
        fn default() -> Self {
            Self {
                iou_thresholds: [0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95]
                    .into_iter()
                    .map(r64)
                    .collect(),
                integral_method: IntegralMethod::Interpolation(101),
            }
        }
    }
}

mod loss {
    use super::*;

    /// The loss function options.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct LossConfig {
        /// The weight factor of classification loss.
        pub weight_cls: R64,
        /// The weight factor of box regression loss.
        pub weight_box: R64,
        /// The weight factor of mask loss.
        pub weight_mask: R64,
        /// The weight factor of semantic segmentation loss.
        pub weight_seg: R64,
        /// The maximum number of mined negatives per positive anchor.
        pub neg_pos_ratio: usize,
        /// The maximum number of positive anchors per image trained for masks.
        pub max_masks_for_train: usize,
        /// The center and size variances of the box encoding.
        #[serde(default = "default_box_variances")]
        pub box_variances: [R64; 2],
    }

    impl LossConfig {
        pub fn validate(&self) -> Result<()> {
            let Self {
                weight_cls,
                weight_box,
                weight_mask,
                weight_seg,
                box_variances: [v0, v1],
                ..
            } = *self;

            ensure_config!(
                [weight_cls, weight_box, weight_mask, weight_seg]
                    .iter()
                    .all(|&weight| weight >= 0.0),
                "loss weights must be non-negative"
            );
            ensure_config!(
                v0 > 0.0 && v1 > 0.0,
                "box variances must be positive"
            );
            Ok(())
        }
    }

    impl Default for LossConfig {
        fn default() -> Self {
            Self {
                weight_cls: r64(1.0),
                weight_box: r64(1.5),
                weight_mask: r64(6.125),
                weight_seg: r64(1.0),
                neg_pos_ratio: 3,
                max_masks_for_train: 100,
                box_variances: default_box_variances(),
            }
        }
    }

    fn default_box_variances() -> [R64; 2] {
        [r64(0.1), r64(0.2)]
    }
}

mod training {
    use super::*;

    /// Options consumed by the training loop driver.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TrainingConfig {
        /// The batch size.
        pub batch_size: NonZeroUsize,
        /// The number of training iterations.
        pub max_iterations: usize,
        /// The momentum parameter for optimizer.
        pub momentum: R64,
        /// The weight decay parameter for optimizer.
        pub weight_decay: R64,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        /// Report running losses every this many steps.
        pub print_interval: NonZeroUsize,
        /// Save a checkpoint and validate every this many steps.
        pub save_interval: NonZeroUsize,
    }

    impl Default for TrainingConfig {
        fn default() -> Self {
            Self {
                batch_size: NonZeroUsize::new(3).unwrap(),
                max_iterations: 10000,
                momentum: r64(0.9),
                weight_decay: r64(5e-4),
                lr_schedule: LearningRateSchedule::default(),
                print_interval: NonZeroUsize::new(10).unwrap(),
                save_interval: NonZeroUsize::new(1000).unwrap(),
            }
        }
    }

    /// Learning rate scheduling strategy.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Use specific learning rates at specified steps.
        StepWise { steps: Vec<(usize, R64)> },
        /// Ramp linearly from `warmup_lr` to the first step's rate, then
        /// proceed step-wise.
        Warmup {
            warmup_steps: usize,
            warmup_lr: R64,
            steps: Vec<(usize, R64)>,
        },
    }

    impl Default for LearningRateSchedule {
        fn default() -> Self {
            Self::Warmup {
                warmup_steps: 500,
                warmup_lr: r64(1e-4),
                steps: vec![
                    (0, r64(1e-3)),
                    (280_000, r64(1e-4)),
                    (600_000, r64(1e-5)),
                    (700_000, r64(1e-6)),
                    (750_000, r64(1e-7)),
                ],
            }
        }
    }
}
