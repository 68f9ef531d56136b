//! Bookkeeping used by a training loop driver.

mod best;
mod lr_scheduler;
mod meter;

pub use best::*;
pub use lr_scheduler::*;
pub use meter::*;
