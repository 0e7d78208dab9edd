//! Confusion-matrix metrics for semantic segmentation.
//!
//! Accumulates an `n_class x n_class` pixel histogram across batches and
//! derives the standard segmentation scores: overall pixel accuracy, mean
//! per-class accuracy, mean IoU, and frequency-weighted accuracy.
//! Accumulation is a pure additive fold, so partial histograms built on
//! different batch splits can be merged into the same final result.

pub mod confusion;

pub use confusion::{ConfusionMatrix, SegScores};
