//! Failure categories that must abort instead of degrading silently.
//!
//! Functions in this crate return [anyhow::Result]. The errors listed here
//! are attached to the chain so that callers can tell them apart with
//! `err.downcast_ref::<yolact::Error>()`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Inconsistent or missing configuration. Raised at construction.
    #[error("configuration error: {0}")]
    Config(String),
    /// Malformed input for one example, such as a zero-area ground-truth
    /// box or prediction tensors that do not line up with the anchors.
    #[error("data quality error: {0}")]
    DataQuality(String),
    /// A loss term evaluated to NaN or infinity.
    #[error("non-finite value in {term}: {value}")]
    Numerical { term: &'static str, value: f64 },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data_quality(msg: impl Into<String>) -> Self {
        Self::DataQuality(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_data_quality(&self) -> bool {
        matches!(self, Self::DataQuality(_))
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical { .. })
    }
}

/// Returns early with a [Error::Config] if the condition does not hold.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::config(format!($($arg)+)).into());
        }
    };
}

/// Returns early with a [Error::DataQuality] if the condition does not hold.
macro_rules! ensure_data {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::data_quality(format!($($arg)+)).into());
        }
    };
}

pub(crate) use ensure_config;
pub(crate) use ensure_data;
