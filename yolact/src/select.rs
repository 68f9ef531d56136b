//! Bounded top-k selection.
//!
//! Hard negative mining, NMS candidate ordering and the per-image detection
//! cap all reduce to picking the `k` highest-scored items.

use crate::common::*;

/// A scored item, identified by its index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub score: f32,
}

impl Scored {
    pub fn new(index: usize, score: f32) -> Self {
        Self { index, score }
    }
}

/// Higher score first, then lower index. NaN sorts last.
fn rank(lhs: &Scored, rhs: &Scored) -> Ordering {
    match (lhs.score.is_nan(), rhs.score.is_nan()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => rhs
            .score
            .total_cmp(&lhs.score)
            .then_with(|| lhs.index.cmp(&rhs.index)),
    }
}

/// Keeps the `k` best items, ordered by descending score with ties broken by
/// ascending index.
///
/// It runs a partial selection first, so only the kept prefix is sorted.
pub fn top_k(mut items: Vec<Scored>, k: usize) -> Vec<Scored> {
    if k == 0 {
        return vec![];
    }
    if k < items.len() {
        items.select_nth_unstable_by(k - 1, rank);
        items.truncate(k);
    }
    items.sort_unstable_by(rank);
    items
}

/// Orders all items by descending score.
pub fn sort_descending(items: Vec<Scored>) -> Vec<Scored> {
    let len = items.len();
    top_k(items, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(scores: &[f32]) -> Vec<Scored> {
        scores
            .iter()
            .enumerate()
            .map(|(index, &score)| Scored::new(index, score))
            .collect()
    }

    fn indexes(items: &[Scored]) -> Vec<usize> {
        items.iter().map(|item| item.index).collect()
    }

    #[test]
    fn select_top_k() {
        let items = top_k(scored(&[0.1, 0.9, 0.5, 0.7, 0.3]), 3);
        assert_eq!(indexes(&items), vec![1, 3, 2]);
    }

    #[test]
    fn ties_prefer_lower_index() {
        let items = top_k(scored(&[0.5, 0.5, 0.9, 0.5]), 3);
        assert_eq!(indexes(&items), vec![2, 0, 1]);
    }

    #[test]
    fn k_larger_than_input() {
        let items = top_k(scored(&[0.2, 0.4]), 10);
        assert_eq!(indexes(&items), vec![1, 0]);
        assert!(top_k(scored(&[0.2, 0.4]), 0).is_empty());
        assert!(top_k(vec![], 3).is_empty());
    }

    #[test]
    fn nan_sorts_last() {
        let items = sort_descending(scored(&[f32::NAN, 0.1, 0.3]));
        assert_eq!(indexes(&items), vec![2, 1, 0]);
    }
}
