//! The model seam the soup routines operate through.
//!
//! Everything the averager and the greedy search need from a model is
//! behind [`SoupModel`]: get/load a named-parameter state, run a forward
//! pass on rank-erased tensor data, and switch to inference mode. Device
//! placement is owned by the implementation — a burn-backed model holds its
//! `B::Device` and moves inputs there inside `forward` (see
//! [`crate::dense::DenseModel`]).

use burn::tensor::TensorData;

use crate::checkpoint::ParamMap;

/// A trainable model, as seen by the soup routines.
pub trait SoupModel {
    /// Snapshot of the model's named parameters.
    fn state_dict(&self) -> ParamMap;

    /// Load a named-parameter state back into the live model.
    ///
    /// Keys the model doesn't know may be ignored; keys the state omits
    /// keep their current values.
    fn load_state_dict(&mut self, state: ParamMap) -> anyhow::Result<()>;

    /// Number of leading batch elements this model consumes as inputs.
    /// The remainder of a positional batch is treated as labels.
    fn num_inputs(&self) -> usize {
        1
    }

    /// Forward pass. Single-output models return a one-element vec.
    fn forward(&self, inputs: &[TensorData]) -> anyhow::Result<Vec<TensorData>>;

    /// Switch to inference mode (disable dropout etc.). Default: no-op.
    fn eval_mode(&mut self) {}
}
