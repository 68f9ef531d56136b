//! Per-image annotations as delivered by the data pipeline.

use crate::{common::*, config::ParserConfig, error::ensure_data, label::LabelMap};

/// One annotated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthInstance {
    /// The dense class index in range `1..=C`.
    pub class: usize,
    /// The box in normalized image coordinates.
    pub bbox: TLBR<f32>,
    /// The binary instance mask, 1.0 inside the object and 0.0 elsewhere.
    pub mask: Array2<f32>,
    /// Crowd regions only suppress false positives and never become positive
    /// matches.
    pub is_crowd: bool,
}

impl GroundTruthInstance {
    /// Builds an instance from a sparse dataset category ID.
    pub fn from_category_id(
        label_map: &LabelMap,
        category_id: u32,
        bbox: TLBR<f32>,
        mask: Array2<f32>,
        is_crowd: bool,
    ) -> Result<Self> {
        let class = label_map.to_dense(category_id).ok_or_else(|| {
            crate::Error::data_quality(format!("unknown category id {}", category_id))
        })?;

        Ok(Self {
            class,
            bbox,
            mask,
            is_crowd,
        })
    }
}

/// All annotations of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGroundTruth {
    pub instances: Vec<GroundTruthInstance>,
}

impl ImageGroundTruth {
    pub fn new(instances: Vec<GroundTruthInstance>) -> Self {
        Self { instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Iterates `(index, instance)` over non-crowd instances.
    pub fn non_crowd(&self) -> impl Iterator<Item = (usize, &GroundTruthInstance)> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| !instance.is_crowd)
    }

    /// Iterates `(index, instance)` over crowd instances.
    pub fn crowd(&self) -> impl Iterator<Item = (usize, &GroundTruthInstance)> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.is_crowd)
    }

    /// Drops instances smaller than the configured discard size.
    ///
    /// The data pipeline calls this before matching. Boxes that are merely
    /// small are dropped here, while zero-area boxes reaching the matcher are
    /// still reported as errors.
    pub fn discard_small(&mut self, config: &ParserConfig) {
        let min_h = config.discard_box_height.raw() as f32;
        let min_w = config.discard_box_width.raw() as f32;
        let before = self.instances.len();

        self.instances
            .retain(|instance| instance.bbox.h() > min_h && instance.bbox.w() > min_w);

        let discarded = before - self.instances.len();
        if discarded > 0 {
            debug!("discarded {} instances below minimum box size", discarded);
        }
    }

    /// Checks that every instance can be matched.
    ///
    /// `num_classes` counts background. `mask_size` is the side length of the
    /// fixed-resolution instance masks.
    pub fn validate(
        &self,
        num_classes: usize,
        label_background: usize,
        mask_size: usize,
    ) -> Result<()> {
        for (index, instance) in self.instances.iter().enumerate() {
            let GroundTruthInstance {
                class,
                ref bbox,
                ref mask,
                ..
            } = *instance;

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
            ensure_data!(
                class < num_classes && class != label_background,
                "instance {} has class {}, expect a foreground class below {}",
                index,
                class,
                num_classes
            );
            ensure_data!(
                mask.dim() == (mask_size, mask_size),
                "instance {} has mask of shape {:?}, expect ({}, {})",
                index,
                mask.dim(),
                mask_size,
                mask_size
            );
        }
        Ok(())
    }
}

impl FromIterator<GroundTruthInstance> for ImageGroundTruth {
    fn from_iter<I: IntoIterator<Item = GroundTruthInstance>>(iter: I) -> Self {
        Self {
            instances: iter.into_iter().collect(),
        }
    }
}
