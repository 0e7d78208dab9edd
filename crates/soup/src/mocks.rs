//! In-memory model, data source, and metric stand-ins for testing the soup
//! routines without a real network or dataset.

use std::collections::HashMap;

use burn::tensor::TensorData;

use crate::checkpoint::{values_f64, ParamMap};
use crate::eval::{Batch, Metric, MetricValue, ValidationSource};
use crate::model::SoupModel;

/// Scalar affine model: `y = scale * x + bias`, with a two-key state dict.
///
/// Small enough that soup arithmetic can be checked by hand, but it still
/// exercises the full state round-trip: averaged checkpoints change what
/// `forward` computes.
pub struct MockModel {
    state: ParamMap,
}

impl MockModel {
    pub fn new(scale: f32, bias: f32) -> Self {
        Self {
            state: affine_checkpoint(scale, bias),
        }
    }

    fn param(&self, key: &str) -> f64 {
        self.state
            .get(key)
            .and_then(|data| values_f64(key, data).ok())
            .and_then(|values| values.first().copied())
            .unwrap_or(0.0)
    }

    pub fn scale(&self) -> f64 {
        self.param("scale")
    }

    pub fn bias(&self) -> f64 {
        self.param("bias")
    }
}

impl SoupModel for MockModel {
    fn state_dict(&self) -> ParamMap {
        self.state.clone()
    }

    fn load_state_dict(&mut self, state: ParamMap) -> anyhow::Result<()> {
        self.state = state;
        Ok(())
    }

    fn forward(&self, inputs: &[TensorData]) -> anyhow::Result<Vec<TensorData>> {
        anyhow::ensure!(inputs.len() == 1, "MockModel takes exactly one input");
        let x = values_f64("x", &inputs[0])?;
        let (scale, bias) = (self.scale(), self.bias());
        let y: Vec<f32> = x.iter().map(|v| (scale * v + bias) as f32).collect();
        Ok(vec![TensorData::new(y, inputs[0].shape.clone())])
    }
}

/// Checkpoint for [`MockModel`]: `{scale, bias}` as single-element f32
/// tensors.
pub fn affine_checkpoint(scale: f32, bias: f32) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("scale".to_string(), TensorData::new(vec![scale], vec![1]));
    params.insert("bias".to_string(), TensorData::new(vec![bias], vec![1]));
    params
}

/// Validation source backed by a vec of batches, replayed from the start on
/// every `batches()` call.
pub struct VecSource {
    batches: Vec<Batch>,
}

impl VecSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    /// Positional batches of `(inputs, labels)` pairs from flat f32 vecs.
    pub fn positional(pairs: Vec<(Vec<f32>, Vec<f32>)>) -> Self {
        let batches = pairs
            .into_iter()
            .map(|(x, y)| {
                let (nx, ny) = (x.len(), y.len());
                Batch::Positional(vec![
                    TensorData::new(x, vec![nx]),
                    TensorData::new(y, vec![ny]),
                ])
            })
            .collect();
        Self { batches }
    }
}

impl ValidationSource for VecSource {
    fn batches(&self) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<Batch>> + '_>> {
        Ok(Box::new(self.batches.iter().cloned().map(Ok)))
    }
}

/// Per-sample 0/1 metric: 1.0 where `|output - label| < tol`.
pub fn tolerance_metric(tol: f64) -> Metric {
    Metric::new(format!("within_{tol}"), move |labels, outputs| {
        let truth = values_f64("label", &labels[0])?;
        let pred = values_f64("output", &outputs[0])?;
        anyhow::ensure!(
            truth.len() == pred.len(),
            "label/output length mismatch: {} vs {}",
            truth.len(),
            pred.len()
        );
        let values = truth
            .iter()
            .zip(pred.iter())
            .map(|(t, p)| if (t - p).abs() < tol { 1.0 } else { 0.0 })
            .collect();
        Ok(MetricValue::PerSample(values))
    })
}

/// Aggregate metric that scores every batch the same.
pub fn constant_metric(value: f64) -> Metric {
    Metric::new("constant", move |_labels, _outputs| {
        Ok(MetricValue::Aggregate(value))
    })
}

/// Named-batch builder for tests.
pub fn named_batch(entries: Vec<(&str, TensorData)>) -> Batch {
    let map: HashMap<String, TensorData> = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Batch::Named(map)
}
