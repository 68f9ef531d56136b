use crate::{common::*, error::ensure_config};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecRec<T>
where
    T: Copy,
{
    pub precision: T,
    pub recall: T,
}

/// How the area under a precision/recall curve is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegralMethod {
    /// Area under the precision envelope, summed at every recall step.
    Continuous,
    /// Mean of the precision envelope sampled at `n` evenly spaced recall
    /// points from 0 to 1. COCO uses 101 points and VOC2007 uses 11.
    Interpolation(usize),
}

/// A scored detection with its match outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApDetection {
    pub confidence: R64,
    pub is_true_positive: bool,
}

#[derive(Debug, Clone)]
pub struct ApCalculator {
    integral_method: IntegralMethod,
}

impl ApCalculator {
    pub fn new_coco() -> Self {
        Self {
            integral_method: IntegralMethod::Interpolation(101),
        }
    }

    pub fn new(integral_method: IntegralMethod) -> Result<Self> {
        if let IntegralMethod::Interpolation(n_points) = integral_method {
            ensure_config!(
                n_points >= 2,
                "invalid number of interpolated points {}",
                n_points
            );
        }

        Ok(Self { integral_method })
    }

    /// Compute average precision from a precision/recall curve.
    ///
    /// The input precision/recall list must be ordered by non-decreasing recall.
    pub fn compute_by_prec_rec(&self, sorted_prec_rec: &[impl Borrow<PrecRec<R64>>]) -> R64 {
        if sorted_prec_rec.is_empty() {
            return r64(0.0);
        }

        // precision envelope, the best precision at this recall or beyond
        let enveloped: Vec<PrecRec<R64>> = {
            let mut list: Vec<_> = sorted_prec_rec
                .iter()
                .rev()
                .scan(r64(0.0), |max_precision, prec_rec| {
                    let PrecRec { precision, recall } = *Borrow::<PrecRec<R64>>::borrow(prec_rec);
                    *max_precision = (*max_precision).max(precision);
                    Some(PrecRec {
                        precision: *max_precision,
                        recall,
                    })
                })
                .collect();
            list.reverse();
            list
        };

        match self.integral_method {
            IntegralMethod::Interpolation(n_points) => {
                let sum: R64 = (0..n_points)
                    .map(|index| r64(index as f64 / (n_points - 1) as f64))
                    .map(|recall| {
                        let position = enveloped.partition_point(|prec_rec| prec_rec.recall < recall);
                        enveloped
                            .get(position)
                            .map(|prec_rec| prec_rec.precision)
                            .unwrap_or_else(|| r64(0.0))
                    })
                    .sum();
                sum / n_points as f64
            }
            IntegralMethod::Continuous => enveloped
                .iter()
                .scan(r64(0.0), |prev_recall, prec_rec| {
                    let step = prec_rec.recall - *prev_recall;
                    *prev_recall = prec_rec.recall;
                    Some(step * prec_rec.precision)
                })
                .sum(),
        }
    }

    /// Compute average precision from the detections of one class.
    ///
    /// Returns zero if there is no ground truth to recall.
    pub fn compute_by_detections(&self, dets: &[ApDetection], num_ground_truth: usize) -> R64 {
        if num_ground_truth == 0 {
            return r64(0.0);
        }

        // sort by decreasing confidence
        let mut dets = dets.to_vec();
        dets.sort_by_key(|det| -det.confidence);

        // compute precision and recall, it is ordered by increasing recall automatically
        let prec_rec: Vec<_> = dets
            .into_iter()
            .scan((0usize, 0usize), |(acc_tp, acc_fp), det| {
                if det.is_true_positive {
                    *acc_tp += 1;
                } else {
                    *acc_fp += 1;
                }
                let acc_tp = r64(*acc_tp as f64);
                let acc_fp = r64(*acc_fp as f64);
                Some(PrecRec {
                    precision: acc_tp / (acc_tp + acc_fp),
                    recall: acc_tp / num_ground_truth as f64,
                })
            })
            .collect();

        self.compute_by_prec_rec(&prec_rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prec_rec(pairs: &[(f64, f64)]) -> Vec<PrecRec<R64>> {
        pairs
            .iter()
            .map(|&(precision, recall)| PrecRec {
                precision: r64(precision),
                recall: r64(recall),
            })
            .collect()
    }

    #[test]
    fn compute_by_prec_rec() -> Result<()> {
        let ap_cal_11 = ApCalculator::new(IntegralMethod::Interpolation(11))?;
        let ap_cal = ApCalculator::new_coco();

        let res = ap_cal.compute_by_prec_rec(&prec_rec(&[(1.0, 1.0)]));
        assert_eq!(res, r64(1.0));

        let curve = prec_rec(&[
            (1.0, 0.125),
            (1.0, 0.250),
            (1.0, 0.375),
            (0.750, 0.375),
            (0.800, 0.500),
            (0.833, 0.625),
            (0.714, 0.625),
            (0.625, 0.625),
            (0.556, 0.625),
            (0.5, 0.625),
        ]);
        let res = ap_cal_11.compute_by_prec_rec(&curve);
        assert!(abs_diff_eq!(res.raw(), 0.5908181818181819));

        let continuous = ApCalculator::new(IntegralMethod::Continuous)?;
        let res = continuous.compute_by_prec_rec(&curve);
        assert!(abs_diff_eq!(res.raw(), 0.375 + 0.25 * 0.833, epsilon = 1e-9));
        Ok(())
    }

    #[test]
    fn compute_by_detections() {
        let ap_cal = ApCalculator::new(IntegralMethod::Continuous).unwrap();
        let dets = [
            ApDetection {
                confidence: r64(0.6),
                is_true_positive: true,
            },
            ApDetection {
                confidence: r64(0.9),
                is_true_positive: true,
            },
            ApDetection {
                confidence: r64(0.8),
                is_true_positive: false,
            },
        ];
        // precision 1, 1/2, 2/3 at recall 1/2, 1/2, 1
        let ap = ap_cal.compute_by_detections(&dets, 2);
        assert!(abs_diff_eq!(ap.raw(), 0.5 + 0.5 * 2.0 / 3.0, epsilon = 1e-9));

        assert_eq!(ap_cal.compute_by_detections(&[], 3), r64(0.0));
        assert_eq!(ap_cal.compute_by_detections(&dets, 0), r64(0.0));
    }

    #[test]
    fn too_few_interpolation_points() {
        assert!(ApCalculator::new(IntegralMethod::Interpolation(1)).is_err());
    }
}
