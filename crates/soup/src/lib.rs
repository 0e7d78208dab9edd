//! Model-soup weight averaging for segmentation checkpoints.
//!
//! Combines trained checkpoints into one model, either as a plain uniform
//! average or via a greedy, validation-guided selection: each candidate is
//! tentatively merged into the running soup and kept only if the measured
//! validation score does not worsen.
//!
//! # Key pieces
//!
//! - [`SoupModel`] — the model seam: state get/load + forward on
//!   rank-erased tensor data
//! - [`uniform_soup`] / [`average_params`] — unweighted elementwise mean
//! - [`greedy_soup`] — the candidate-by-candidate acceptance search
//! - [`evaluate`] — one full validation pass, per-sample metric history
//! - [`CheckpointSource`] — in-memory map or JSON checkpoint file
//! - [`adapters`] — confusion-matrix metrics (mean IoU, pixel accuracy)
//!   wired into the metric interface
//! - [`mocks`] — in-memory model/data/metric stand-ins for tests

pub mod adapters;
pub mod average;
pub mod checkpoint;
pub mod dense;
pub mod eval;
pub mod greedy;
pub mod mocks;
pub mod model;

pub use average::{average_params, uniform_soup};
pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointError, CheckpointSource, ParamMap};
pub use dense::DenseModel;
pub use eval::{evaluate, Batch, BatchKeys, Metric, MetricValue, ValidationSource};
pub use greedy::{greedy_soup, Comparator, GreedySoupConfig, GreedySoupReport, MergeMode};
pub use model::SoupModel;
