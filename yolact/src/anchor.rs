//! Multi-scale, multi-aspect-ratio anchor generation.

use crate::{common::*, config::AnchorConfig, error::ensure_config};

/// Smallest anchor side length, in normalized units.
const MIN_ANCHOR_SIDE: f32 = 1e-6;

/// A fixed reference box at one grid cell of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, CopyGetters)]
pub struct Anchor {
    /// The box in normalized image coordinates.
    #[get_copy = "pub"]
    cycxhw: CyCxHW<f32>,
    #[get_copy = "pub"]
    tlbr: TLBR<f32>,
    /// The index of the source pyramid level.
    #[get_copy = "pub"]
    level: usize,
    #[get_copy = "pub"]
    aspect_ratio: f32,
}

/// The complete, ordered anchor set.
///
/// Anchors are ordered level-major, then by row, column and aspect ratio.
/// Prediction tensors of the detection heads must follow the same order.
/// The set is immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
    anchors: Arc<[Anchor]>,
    level_ranges: Arc<[Range<usize>]>,
}

impl Anchors {
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    /// The index range occupied by each pyramid level.
    pub fn level_ranges(&self) -> &[Range<usize>] {
        &self.level_ranges
    }
}

impl std::ops::Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Self::Output {
        &self.anchors[index]
    }
}

impl<'a> IntoIterator for &'a Anchors {
    type Item = &'a Anchor;
    type IntoIter = std::slice::Iter<'a, Anchor>;

    fn into_iter(self) -> Self::IntoIter {
        self.anchors.iter()
    }
}

#[derive(Debug, Clone)]
struct Level {
    feature_size: usize,
    /// Per aspect ratio anchor (h, w, ratio), sides in normalized units.
    shapes: Vec<(f32, f32, f32)>,
}

/// Produces the anchor set described by an [AnchorConfig].
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    levels: Vec<Level>,
}

impl AnchorGenerator {
    /// Checks the configuration and precomputes per-level anchor shapes.
    ///
    /// Mismatched level lists are rejected here rather than on first use.
    pub fn new(config: &AnchorConfig) -> Result<Self> {
        config.validate()?;

        let AnchorConfig {
            image_size,
            ref feature_map_sizes,
            ref aspect_ratios,
            ref scales,
        } = *config;
        let image_size = image_size.get() as f64;

        let levels: Vec<_> = izip!(feature_map_sizes, scales)
            .map(|(feature_size, scale)| -> Result<_> {
                let base = scale.raw() / image_size;
                let shapes: Vec<_> = aspect_ratios
                    .iter()
                    .map(|ratio| {
                        let ratio = ratio.raw();
                        let h = (base / ratio.sqrt()) as f32;
                        let w = (base * ratio.sqrt()) as f32;
                        (h.max(MIN_ANCHOR_SIDE), w.max(MIN_ANCHOR_SIDE), ratio as f32)
                    })
                    .collect();

                ensure_config!(
                    shapes.iter().all(|&(h, w, _)| h.is_finite() && w.is_finite()),
                    "anchor scale {} yields non-finite anchor sizes",
                    scale
                );

                Ok(Level {
                    feature_size: feature_size.get(),
                    shapes,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self { levels })
    }

    /// The number of anchors [generate](Self::generate) produces.
    pub fn num_anchors(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.feature_size.pow(2) * level.shapes.len())
            .sum()
    }

    /// Produces the canonical anchor sequence.
    ///
    /// The output depends on the configuration only, so it can be computed
    /// once and shared by training and inference.
    pub fn generate(&self) -> Anchors {
        let mut anchors = Vec::with_capacity(self.num_anchors());
        let mut level_ranges = Vec::with_capacity(self.levels.len());

        for (level_index, level) in self.levels.iter().enumerate() {
            let start = anchors.len();
            let size = level.feature_size;
            let step = 1.0 / size as f32;

            for row in 0..size {
                let cy = (row as f32 + 0.5) * step;

                for col in 0..size {
                    let cx = (col as f32 + 0.5) * step;

                    anchors.extend(level.shapes.iter().map(|&(h, w, aspect_ratio)| {
                        let cycxhw = CyCxHW::from_cycxhw([cy, cx, h, w]);
                        Anchor {
                            cycxhw,
                            tlbr: cycxhw.into(),
                            level: level_index,
                            aspect_ratio,
                        }
                    }));
                }
            }

            level_ranges.push(start..anchors.len());
        }

        debug!(
            "generated {} anchors over {} levels",
            anchors.len(),
            self.levels.len()
        );

        Anchors {
            anchors: anchors.into(),
            level_ranges: level_ranges.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_config() -> AnchorConfig {
        AnchorConfig {
            image_size: NonZeroUsize::new(100).unwrap(),
            feature_map_sizes: vec![NonZeroUsize::new(4).unwrap(), NonZeroUsize::new(2).unwrap()],
            aspect_ratios: vec![r64(1.0), r64(0.5), r64(2.0)],
            scales: vec![r64(20.0), r64(40.0)],
        }
    }

    #[test]
    fn anchor_count() {
        let generator = AnchorGenerator::new(&small_config()).unwrap();
        let anchors = generator.generate();
        assert_eq!(anchors.len(), (16 + 4) * 3);
        assert_eq!(anchors.len(), generator.num_anchors());
        assert_eq!(anchors.level_ranges(), &[0..48, 48..60]);
    }

    #[test]
    fn coco_anchor_count() {
        let config = crate::Config::coco().anchor;
        let anchors = AnchorGenerator::new(&config).unwrap().generate();
        assert_eq!(anchors.len(), config.num_anchors());
        assert_eq!(anchors.len(), 19248);
    }

    #[test]
    fn generation_is_deterministic() {
        let lhs = AnchorGenerator::new(&small_config()).unwrap().generate();
        let rhs = AnchorGenerator::new(&small_config()).unwrap().generate();
        assert!(izip!(lhs.iter(), rhs.iter()).all(|(l, r)| {
            l.cycxhw().cycxhw().map(f32::to_bits) == r.cycxhw().cycxhw().map(f32::to_bits)
        }));
    }

    #[test]
    fn canonical_order_and_shapes() {
        let anchors = AnchorGenerator::new(&small_config()).unwrap().generate();

        // level 0, row 0, col 1, ratio 0.5
        let anchor = anchors[4];
        let [cy, cx, h, w] = anchor.cycxhw().cycxhw();
        assert_eq!(anchor.level(), 0);
        assert_abs_diff_eq!(cy, 0.125);
        assert_abs_diff_eq!(cx, 0.375);
        assert_abs_diff_eq!(h, 0.2 / 0.5f32.sqrt(), epsilon = 1e-6);
        assert_abs_diff_eq!(w, 0.2 * 0.5f32.sqrt(), epsilon = 1e-6);

        // first anchor of level 1 covers the top-left quarter cell
        let anchor = anchors[48];
        let [cy, cx, h, w] = anchor.cycxhw().cycxhw();
        assert_eq!(anchor.level(), 1);
        assert_abs_diff_eq!(cy, 0.25);
        assert_abs_diff_eq!(cx, 0.25);
        assert_abs_diff_eq!(h, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(w, 0.4, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_levels_fail_at_construction() {
        let mut config = small_config();
        config.scales.push(r64(80.0));
        let err = AnchorGenerator::new(&config).unwrap_err();
        assert!(err.downcast_ref::<crate::Error>().unwrap().is_config());
    }
}
