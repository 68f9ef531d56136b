use super::{CyCxHW, TLBR};
use crate::common::*;

/// The generic rectangle.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_tlbr(tlbr: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_tlbr(tlbr).unwrap()
    }

    fn from_cycxhw(cycxhw: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_cycxhw(cycxhw).unwrap()
    }

    fn cycxhw(&self) -> [Self::Type; 4] {
        [self.cy(), self.cx(), self.h(), self.w()]
    }

    fn tlbr(&self) -> [Self::Type; 4] {
        [self.t(), self.l(), self.b(), self.r()]
    }

    fn to_cycxhw(&self) -> CyCxHW<Self::Type> {
        CyCxHW {
            cy: self.cy(),
            cx: self.cx(),
            h: self.h(),
            w: self.w(),
        }
    }

    fn area(&self) -> <Self::Type as Mul<Self::Type>>::Output
    where
        Self::Type: Mul<Self::Type>,
    {
        self.h() * self.w()
    }

    /// Returns true if the box covers no area.
    fn is_degenerate(&self) -> bool {
        let zero = Self::Type::zero();
        !(self.h() > zero && self.w() > zero)
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().max(other.t());
        let l = self.l().max(other.l());
        let b = self.b().min(other.b());
        let r = self.r().min(other.r());
        (b > t && r > l).then(|| TLBR { t, l, b, r })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union. Two empty boxes have zero IoU.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.h() * other.w() - inter_area;
        if union_area > zero {
            inter_area / union_area
        } else {
            zero
        }
    }

    /// Intersection over the area of `self`.
    ///
    /// It measures how much of this box is covered by `other`, which is the
    /// overlap criterion used against crowd regions.
    fn ioa_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let area = self.area();
        if area > zero {
            self.intersection_area_with(other) / area
        } else {
            zero
        }
    }

    /// Clips the box to the unit square `[0, 1] x [0, 1]`.
    fn clamp_unit(&self) -> TLBR<Self::Type> {
        let zero = Self::Type::zero();
        let one = Self::Type::one();
        let t = self.t().max(zero).min(one);
        let l = self.l().max(zero).min(one);
        let b = self.b().max(t).min(one);
        let r = self.r().max(l).min(one);
        TLBR { t, l, b, r }
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_of_shifted_boxes() {
        let lhs = TLBR::from_tlbr([0.0, 0.0, 1.0, 1.0]);
        let rhs = TLBR::from_tlbr([0.0, 0.5, 1.0, 1.5]);
        assert_abs_diff_eq!(lhs.iou_with(&rhs), 1.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(lhs.ioa_with(&rhs), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let lhs = TLBR::from_tlbr([0.0f32, 0.0, 0.2, 0.2]);
        let rhs = TLBR::from_tlbr([0.5f32, 0.5, 0.7, 0.7]);
        assert_eq!(lhs.iou_with(&rhs), 0.0);
        assert!(lhs.intersect_with(&rhs).is_none());
    }

    #[test]
    fn empty_box_is_degenerate() {
        let rect = TLBR::from_tlbr([0.3f32, 0.2, 0.3, 0.6]);
        assert!(rect.is_degenerate());
        assert_eq!(rect.iou_with(&rect), 0.0);
    }

    #[test]
    fn clamp_to_unit_square() {
        let rect = CyCxHW::from_cycxhw([0.9, 0.1, 0.4, 0.4]).clamp_unit();
        assert_abs_diff_eq!(rect.tlbr()[..], [0.7, 0.0, 1.0, 0.3][..], epsilon = 1e-9);
    }
}
