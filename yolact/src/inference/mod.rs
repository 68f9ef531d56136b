//! Post-processing of network outputs into final detections.

mod inference;
mod nms;

pub use inference::*;
pub use nms::*;
