//! Loss function building blocks.

mod bce;
mod cross_entropy;
mod hard_negative;
mod loss;
mod misc;
mod smooth_l1;

pub use bce::*;
pub use cross_entropy::*;
pub use hard_negative::*;
pub use loss::*;
pub use misc::*;
pub use smooth_l1::*;
