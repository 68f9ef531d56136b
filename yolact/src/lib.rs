//! Anchor generation, ground-truth matching, multi-task losses and
//! post-processing for single-stage instance segmentation detectors in the
//! YOLACT family.
//!
//! The network itself is external. This crate consumes its per-anchor
//! outputs together with the annotations of each image, and produces
//! either training losses or final detections.

mod common;

pub mod anchor;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod ground_truth;
pub mod inference;
pub mod label;
pub mod loss;
pub mod mask;
pub mod matching;
pub mod prediction;
pub mod select;
pub mod training;

pub use anchor::{Anchor, AnchorGenerator, Anchors};
pub use config::Config;
pub use error::Error;
pub use ground_truth::{GroundTruthInstance, ImageGroundTruth};
pub use prediction::Prediction;
