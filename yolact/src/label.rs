//! Sparse dataset category IDs and their dense class indexes.

use crate::common::*;
use once_cell::sync::Lazy;

/// The COCO category names, ordered by dense class index starting at 1.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// The COCO category IDs that are in use. The n-th entry maps to dense
/// class n + 1.
const COCO_CATEGORY_IDS: [u32; 80] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 27,
    28, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 46, 47, 48, 49, 50, 51, 52, 53,
    54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 67, 70, 72, 73, 74, 75, 76, 77, 78, 79, 80,
    81, 82, 84, 85, 86, 87, 88, 89, 90,
];

static COCO_LABEL_MAP: Lazy<LabelMap> = Lazy::new(|| {
    LabelMap::new(izip!(COCO_CATEGORY_IDS, COCO_CLASSES).map(|(id, name)| (id, name.to_string())))
});

/// Renumbers sparse category IDs into the dense range `1..=C`.
///
/// Dense index 0 is reserved for background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    /// Sparse ID to class name, in dense order.
    categories: IndexMap<u32, String>,
}

impl LabelMap {
    pub fn new(categories: impl IntoIterator<Item = (u32, String)>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }

    pub fn coco() -> &'static Self {
        &COCO_LABEL_MAP
    }

    /// The number of foreground classes.
    pub fn num_classes(&self) -> usize {
        self.categories.len()
    }

    pub fn to_dense(&self, category_id: u32) -> Option<usize> {
        self.categories
            .get_index_of(&category_id)
            .map(|index| index + 1)
    }

    pub fn to_sparse(&self, class: usize) -> Option<u32> {
        let index = class.checked_sub(1)?;
        self.categories.get_index(index).map(|(&id, _)| id)
    }

    pub fn class_name(&self, class: usize) -> Option<&str> {
        let index = class.checked_sub(1)?;
        self.categories
            .get_index(index)
            .map(|(_, name)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_label_map() {
        let map = LabelMap::coco();
        assert_eq!(map.num_classes(), 80);
        assert_eq!(map.to_dense(1), Some(1));
        assert_eq!(map.to_dense(13), Some(12));
        assert_eq!(map.to_dense(90), Some(80));
        assert_eq!(map.to_dense(12), None);
        assert_eq!(map.to_sparse(80), Some(90));
        assert_eq!(map.to_sparse(0), None);
        assert_eq!(map.class_name(1), Some("person"));
        assert_eq!(map.class_name(80), Some("toothbrush"));
    }
}
