pub use anyhow::{ensure, Result};
pub use num_traits::{Float, Num, One, ToPrimitive, Zero};
#[cfg(feature = "serde")]
pub use serde::{Deserialize, Serialize};
pub use std::ops::Mul;
