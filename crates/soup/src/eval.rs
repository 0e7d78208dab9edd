//! Validation pass: stream batches through a model and collect per-sample
//! metric values.
//!
//! Batch key selection is an explicit contract ([`BatchKeys`]) rather than
//! argument-name introspection: the caller declares which keys of a named
//! batch are model inputs and which are labels. Positional batches split by
//! arity instead — the model's declared input count takes the leading
//! elements, the rest are labels.

use std::collections::HashMap;
use std::time::Instant;

use burn::tensor::TensorData;

use crate::model::SoupModel;

/// One validation batch, either positional or keyed.
#[derive(Debug, Clone)]
pub enum Batch {
    /// Model inputs first, labels after.
    Positional(Vec<TensorData>),
    /// Inputs and labels selected by name via [`BatchKeys`].
    Named(HashMap<String, TensorData>),
}

/// Which keys of a [`Batch::Named`] are inputs and which are labels.
///
/// Keys missing from a batch are skipped, mirroring the tolerance for
/// partially overlapping parameter sets elsewhere in the crate.
#[derive(Debug, Clone)]
pub struct BatchKeys {
    pub input_keys: Vec<String>,
    pub label_keys: Vec<String>,
}

impl Default for BatchKeys {
    fn default() -> Self {
        Self {
            input_keys: vec!["x".to_string()],
            label_keys: vec!["y_true".to_string()],
        }
    }
}

/// A metric's verdict on one batch.
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// One value for the whole batch; broadcast to the batch's sample count
    /// so the history stays sample-granular.
    Aggregate(f64),
    /// One value per sample.
    PerSample(Vec<f64>),
}

/// A named metric over (labels, model outputs).
pub struct Metric {
    name: String,
    func: Box<dyn Fn(&[TensorData], &[TensorData]) -> anyhow::Result<MetricValue> + Send + Sync>,
}

impl Metric {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[TensorData], &[TensorData]) -> anyhow::Result<MetricValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute(
        &self,
        labels: &[TensorData],
        outputs: &[TensorData],
    ) -> anyhow::Result<MetricValue> {
        (self.func)(labels, outputs)
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric").field("name", &self.name).finish()
    }
}

/// A restartable, pull-based validation stream.
///
/// `batches()` returns a fresh iterator each call; the greedy search calls
/// it once per candidate. Iterator exhaustion (`None`) is the only normal
/// termination — an `Err` item aborts the evaluation.
pub trait ValidationSource {
    fn batches(&self) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<Batch>> + '_>>;
}

/// Drive the validation source to exhaustion once and collect per-sample
/// metric values for the model's current weights.
///
/// `candidate` names the checkpoint under evaluation in progress logs.
/// Any model or metric failure propagates; there is no retry and no
/// partial-result recovery.
pub fn evaluate<M: SoupModel + ?Sized>(
    model: &M,
    data: &dyn ValidationSource,
    metric: &Metric,
    keys: &BatchKeys,
    candidate: &str,
    verbose: bool,
) -> anyhow::Result<Vec<f64>> {
    let start = Instant::now();
    let mut history: Vec<f64> = Vec::new();
    let mut step = 0usize;

    for batch in data.batches()? {
        let batch = batch?;
        step += 1;

        let (inputs, labels) = split_batch(&batch, model.num_inputs(), keys)?;
        anyhow::ensure!(!labels.is_empty(), "validation batch {step} has no labels");
        let sample_count = labels[0].shape.first().copied().unwrap_or(1);

        let outputs = model.forward(&inputs)?;
        anyhow::ensure!(!outputs.is_empty(), "model returned no outputs");

        match metric.compute(&labels, &outputs)? {
            MetricValue::Aggregate(v) => history.extend(std::iter::repeat(v).take(sample_count)),
            MetricValue::PerSample(values) => history.extend(values),
        }

        tracing::debug!(
            candidate,
            step,
            elapsed_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
            metric = metric.name(),
            running = nan_mean(&history),
            "Validation step"
        );
    }

    if verbose {
        tracing::info!(
            candidate,
            steps = step,
            samples = history.len(),
            elapsed_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
            metric = metric.name(),
            mean = nan_mean(&history),
            "Validation pass complete"
        );
    }
    Ok(history)
}

/// Split a batch into (inputs, labels) per the declared contract.
fn split_batch(
    batch: &Batch,
    num_inputs: usize,
    keys: &BatchKeys,
) -> anyhow::Result<(Vec<TensorData>, Vec<TensorData>)> {
    match batch {
        Batch::Positional(elements) => {
            anyhow::ensure!(
                elements.len() >= num_inputs,
                "positional batch has {} elements, model expects {} inputs",
                elements.len(),
                num_inputs
            );
            let inputs = elements[..num_inputs].to_vec();
            let labels = elements[num_inputs..].to_vec();
            Ok((inputs, labels))
        }
        Batch::Named(map) => {
            let pick = |names: &[String]| -> Vec<TensorData> {
                names.iter().filter_map(|k| map.get(k).cloned()).collect()
            };
            Ok((pick(&keys.input_keys), pick(&keys.label_keys)))
        }
    }
}

/// Mean excluding NaN entries; NaN if nothing remains.
pub(crate) fn nan_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            count += 1;
        }
    }
    sum / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mocks::{named_batch, tolerance_metric, MockModel, VecSource};

    fn vec_data(values: Vec<f32>) -> TensorData {
        let len = values.len();
        TensorData::new(values, vec![len])
    }

    #[test]
    fn test_positional_batches_per_sample() {
        // Identity model: y = 1.0 * x + 0.0
        let model = MockModel::new(1.0, 0.0);
        let source = VecSource::new(vec![
            Batch::Positional(vec![vec_data(vec![1.0, 2.0]), vec_data(vec![1.0, 5.0])]),
            Batch::Positional(vec![vec_data(vec![3.0]), vec_data(vec![3.0])]),
        ]);
        let metric = tolerance_metric(0.5);

        let history = evaluate(
            &model,
            &source,
            &metric,
            &BatchKeys::default(),
            "ckpt_a",
            false,
        )
        .unwrap();

        assert_eq!(history, vec![1.0, 0.0, 1.0]);
        assert!((nan_mean(&history) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_named_batches_use_declared_keys() {
        let model = MockModel::new(2.0, 0.0);
        let source = VecSource::new(vec![named_batch(vec![
            ("x", vec_data(vec![1.0, 2.0])),
            ("y_true", vec_data(vec![2.0, 0.0])),
            ("file_name", vec_data(vec![7.0, 8.0])),
        ])]);

        let history = evaluate(
            &model,
            &source,
            &tolerance_metric(0.5),
            &BatchKeys::default(),
            "ckpt_a",
            false,
        )
        .unwrap();

        // y = [2, 4] vs y_true = [2, 0]; file_name is neither input nor label.
        assert_eq!(history, vec![1.0, 0.0]);
    }

    #[test]
    fn test_aggregate_broadcast_to_sample_count() {
        let model = MockModel::new(1.0, 0.0);
        let source = VecSource::new(vec![Batch::Positional(vec![
            vec_data(vec![1.0, 2.0, 3.0]),
            vec_data(vec![0.0, 0.0, 0.0]),
        ])]);
        let metric = Metric::new("constant", |_labels, _outputs| {
            Ok(MetricValue::Aggregate(0.25))
        });

        let history =
            evaluate(&model, &source, &metric, &BatchKeys::default(), "c", false).unwrap();
        assert_eq!(history, vec![0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_source_error_propagates() {
        struct FailingSource;
        impl ValidationSource for FailingSource {
            fn batches(
                &self,
            ) -> anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<Batch>> + '_>> {
                Ok(Box::new(std::iter::once(Err(anyhow::anyhow!(
                    "corrupt shard"
                )))))
            }
        }

        let model = MockModel::new(1.0, 0.0);
        let err = evaluate(
            &model,
            &FailingSource,
            &tolerance_metric(0.5),
            &BatchKeys::default(),
            "c",
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("corrupt shard"));
    }

    #[test]
    fn test_batch_without_labels_is_error() {
        let model = MockModel::new(1.0, 0.0);
        let source = VecSource::new(vec![Batch::Positional(vec![vec_data(vec![1.0])])]);

        let err = evaluate(
            &model,
            &source,
            &tolerance_metric(0.5),
            &BatchKeys::default(),
            "c",
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no labels"), "got {err}");
    }

    #[test]
    fn test_empty_source_yields_empty_history() {
        let model = MockModel::new(1.0, 0.0);
        let source = VecSource::new(vec![]);

        let history = evaluate(
            &model,
            &source,
            &tolerance_metric(0.5),
            &BatchKeys::default(),
            "c",
            false,
        )
        .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_nan_mean_excludes_nan() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[]).is_nan());
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }
}
