pub use anyhow::{ensure, Context as _, Result};
pub use approx::abs_diff_eq;
pub use bbox::{prelude::*, BoxCoder, CyCxHW, TLBR};
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    collections::BTreeMap,
    num::NonZeroUsize,
    ops::Range,
    path::Path,
    sync::Arc,
};
