//! Raw network outputs for one image.

use crate::{common::*, error::ensure_data};

/// The per-image outputs of the detection heads.
///
/// Per-anchor tensors are row-aligned with the anchor sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class logits in `[anchors, classes + 1]` shape.
    pub class_logits: Array2<f32>,
    /// Box regression in `[anchors, 4]` shape, laid out `[dy, dx, dh, dw]`.
    pub box_regression: Array2<f32>,
    /// Mask coefficients in `[anchors, num_mask]` shape.
    pub mask_coefficients: Array2<f32>,
    /// Prototype masks in `[height, width, num_mask]` shape.
    pub prototypes: Array3<f32>,
    /// Semantic segmentation logits in `[classes, height, width]` shape,
    /// background excluded.
    pub segmentation: Array3<f32>,
}

impl Prediction {
    pub fn num_anchors(&self) -> usize {
        self.class_logits.nrows()
    }

    /// Checks that tensor shapes agree with each other and with the anchor
    /// count. `num_classes` counts background.
    pub fn validate(&self, num_anchors: usize, num_classes: usize) -> Result<()> {
        let Self {
            class_logits,
            box_regression,
            mask_coefficients,
            prototypes,
            segmentation,
        } = self;

        ensure_data!(
            num_classes >= 1,
            "num_classes must count at least the background class"
        );
        ensure_data!(
            class_logits.dim() == (num_anchors, num_classes),
            "class logits have shape {:?}, expect ({}, {})",
            class_logits.dim(),
            num_anchors,
            num_classes
        );
        ensure_data!(
            box_regression.dim() == (num_anchors, 4),
            "box regression has shape {:?}, expect ({}, 4)",
            box_regression.dim(),
            num_anchors
        );

        let (coef_rows, num_mask) = mask_coefficients.dim();
        ensure_data!(
            coef_rows == num_anchors,
            "mask coefficients have {} rows, expect {}",
            coef_rows,
            num_anchors
        );

        let (proto_h, proto_w, proto_k) = prototypes.dim();
        ensure_data!(
            proto_k == num_mask && proto_h > 0 && proto_w > 0,
            "prototypes have shape {:?}, expect (_, _, {})",
            prototypes.dim(),
            num_mask
        );

        let (seg_c, seg_h, seg_w) = segmentation.dim();
        ensure_data!(
            seg_c == num_classes - 1 && seg_h > 0 && seg_w > 0,
            "segmentation logits have shape {:?}, expect ({}, _, _)",
            segmentation.dim(),
            num_classes - 1
        );

        Ok(())
    }

    /// Returns the box regression of one anchor.
    pub fn regression_of(&self, anchor_index: usize) -> [f32; 4] {
        let row = self.box_regression.row(anchor_index);
        [row[0], row[1], row[2], row[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(num_anchors: usize) -> Prediction {
        Prediction {
            class_logits: Array2::zeros((num_anchors, 3)),
            box_regression: Array2::zeros((num_anchors, 4)),
            mask_coefficients: Array2::zeros((num_anchors, 2)),
            prototypes: Array3::zeros((4, 4, 2)),
            segmentation: Array3::zeros((2, 4, 4)),
        }
    }

    #[test]
    fn accept_consistent_shapes() {
        prediction(6).validate(6, 3).unwrap();
    }

    #[test]
    fn anchor_count_mismatch_is_data_quality_error() {
        let err = prediction(5).validate(6, 3).unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_data_quality());
    }

    #[test]
    fn prototype_count_mismatch() {
        let mut pred = prediction(6);
        pred.prototypes = Array3::zeros((4, 4, 3));
        assert!(pred.validate(6, 3).is_err());
    }

    #[test]
    fn zero_classes_is_data_quality_error() {
        let mut pred = prediction(6);
        pred.class_logits = Array2::zeros((6, 0));
        let err = pred.validate(6, 0).unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_data_quality());
    }
}
