//! Prototype mask assembly and mask utilities.

use crate::common::*;

/// Linearly combines prototypes `[h, w, k]` by coefficients `[k]`.
///
/// The result is a mask logit map in `[h, w]` shape.
pub fn assemble(prototypes: ArrayView3<f32>, coefficients: ArrayView1<f32>) -> Array2<f32> {
    let (height, width, num_mask) = prototypes.dim();
    debug_assert_eq!(num_mask, coefficients.len());

    let mut logits = Array2::zeros((height, width));
    for (index, &coef) in coefficients.iter().enumerate() {
        logits.scaled_add(coef, &prototypes.index_axis(Axis(2), index));
    }
    logits
}

pub fn sigmoid(value: f32) -> f32 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let exp = value.exp();
        exp / (1.0 + exp)
    }
}

/// Resamples a map to `(height, width)` with bilinear interpolation.
///
/// Pixel centers are aligned, so a map resized to its own shape is returned
/// unchanged.
pub fn resize_bilinear(src: ArrayView2<f32>, shape: (usize, usize)) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    let (dst_h, dst_w) = shape;

    if (src_h, src_w) == shape {
        return src.to_owned();
    }
    if src_h == 0 || src_w == 0 {
        return Array2::zeros(shape);
    }

    let sample_axis = |dst: usize, dst_len: usize, src_len: usize| -> (usize, usize, f32) {
        let scale = src_len as f32 / dst_len as f32;
        let pos = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src_len - 1);
        (lo, hi, pos - lo as f32)
    };

    let rows: Vec<_> = (0..dst_h).map(|row| sample_axis(row, dst_h, src_h)).collect();
    let cols: Vec<_> = (0..dst_w).map(|col| sample_axis(col, dst_w, src_w)).collect();

    Array2::from_shape_fn(shape, |(row, col)| {
        let (y0, y1, fy) = rows[row];
        let (x0, x1, fx) = cols[col];
        let top = src[[y0, x0]] * (1.0 - fx) + src[[y0, x1]] * fx;
        let bottom = src[[y1, x0]] * (1.0 - fx) + src[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// Resamples a binary mask to `(height, width)` with nearest-neighbor lookup.
pub fn resize_nearest(src: ArrayView2<bool>, shape: (usize, usize)) -> Array2<bool> {
    let (src_h, src_w) = src.dim();
    if (src_h, src_w) == shape {
        return src.to_owned();
    }
    if src_h == 0 || src_w == 0 {
        return Array2::from_elem(shape, false);
    }

    let (dst_h, dst_w) = shape;
    Array2::from_shape_fn(shape, |(row, col)| {
        let y = ((row * src_h) / dst_h).min(src_h - 1);
        let x = ((col * src_w) / dst_w).min(src_w - 1);
        src[[y, x]]
    })
}

/// Thresholds a soft mask at 0.5.
pub fn binarize(mask: ArrayView2<f32>) -> Array2<bool> {
    mask.mapv(|value| value >= 0.5)
}

/// Assembles, crops and binarizes the mask of one detection.
///
/// Pixels outside `bbox` are cleared and a pixel is set when its sigmoid
/// probability exceeds 0.5.
pub fn instance_mask(
    prototypes: ArrayView3<f32>,
    coefficients: ArrayView1<f32>,
    bbox: &TLBR<f32>,
) -> Array2<bool> {
    let logits = assemble(prototypes, coefficients);
    let (height, width) = logits.dim();
    let (rows, cols) = bbox.pixel_ranges(height, width);

    let mut mask = Array2::from_elem((height, width), false);
    mask.slice_mut(s![rows.clone(), cols.clone()])
        .assign(&logits.slice(s![rows, cols]).mapv(|logit| sigmoid(logit) > 0.5));
    mask
}

/// Intersection over union of two binary masks.
///
/// The masks are compared at the resolution of `rhs`. Two empty masks have
/// zero IoU.
pub fn mask_iou(lhs: ArrayView2<bool>, rhs: ArrayView2<bool>) -> f64 {
    let (inter, union, _) = overlap(lhs, rhs);
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Intersection over the area of `lhs`, compared at the resolution of
/// `rhs`. An empty `lhs` has zero overlap.
pub fn mask_ioa(lhs: ArrayView2<bool>, rhs: ArrayView2<bool>) -> f64 {
    let (inter, _, area) = overlap(lhs, rhs);
    if area == 0 {
        0.0
    } else {
        inter as f64 / area as f64
    }
}

/// Returns pixel counts of intersection, union and `lhs`.
fn overlap(lhs: ArrayView2<bool>, rhs: ArrayView2<bool>) -> (usize, usize, usize) {
    let lhs = resize_nearest(lhs, rhs.dim());
    izip!(lhs.iter(), rhs.iter()).fold(
        (0, 0, 0),
        |(inter, union, area), (&l, &r)| {
            (
                inter + (l && r) as usize,
                union + (l || r) as usize,
                area + l as usize,
            )
        },
    )
}
