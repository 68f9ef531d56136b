//! Average precision of detections against annotated images.

mod average_precision;
mod evaluator;

pub use average_precision::*;
pub use evaluator::*;
