//! The anchor-relative box encoding.
//!
//! A box `g` is encoded against an anchor `a` as
//!
//! ```text
//! dy = (g.cy - a.cy) / (a.h * v0)
//! dx = (g.cx - a.cx) / (a.w * v0)
//! dh = ln(g.h / a.h) / v1
//! dw = ln(g.w / a.w) / v1
//! ```
//!
//! where `[v0, v1]` are the variances. Decoding is the exact inverse.

use super::{CyCxHW, Rect};
use crate::common::*;

/// Encodes boxes relative to anchors and decodes regression outputs back.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxCoder<T> {
    variances: [T; 2],
}

impl<T> BoxCoder<T>
where
    T: Float,
{
    pub fn new(variances: [T; 2]) -> Result<Self> {
        let [v0, v1] = variances;
        ensure!(
            v0.is_finite() && v1.is_finite() && v0 > T::zero() && v1 > T::zero(),
            "box variances must be positive and finite"
        );
        Ok(Self { variances })
    }

    pub fn variances(&self) -> [T; 2] {
        self.variances
    }

    /// Encodes `target` relative to `anchor` into `[dy, dx, dh, dw]`.
    ///
    /// Both boxes must have positive height and width.
    pub fn encode<A, B>(&self, anchor: &A, target: &B) -> [T; 4]
    where
        A: Rect<Type = T>,
        B: Rect<Type = T>,
    {
        let [v0, v1] = self.variances;
        let dy = (target.cy() - anchor.cy()) / (anchor.h() * v0);
        let dx = (target.cx() - anchor.cx()) / (anchor.w() * v0);
        let dh = (target.h() / anchor.h()).ln() / v1;
        let dw = (target.w() / anchor.w()).ln() / v1;
        [dy, dx, dh, dw]
    }

    /// Decodes a `[dy, dx, dh, dw]` regression output against `anchor`.
    pub fn decode<A>(&self, anchor: &A, delta: [T; 4]) -> CyCxHW<T>
    where
        A: Rect<Type = T>,
    {
        let [v0, v1] = self.variances;
        let [dy, dx, dh, dw] = delta;
        CyCxHW {
            cy: anchor.cy() + dy * v0 * anchor.h(),
            cx: anchor.cx() + dx * v0 * anchor.w(),
            h: anchor.h() * (dh * v1).exp(),
            w: anchor.w() * (dw * v1).exp(),
        }
    }
}
