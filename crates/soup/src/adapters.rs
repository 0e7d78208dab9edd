//! Bridges between seg-metrics and the soup metric interface.
//!
//! Turns the confusion-matrix scores into [`Metric`]s usable by the greedy
//! search: the model's per-class score tensor is argmaxed into a predicted
//! label map and binned against the integer ground truth.

use burn::tensor::TensorData;
use seg_metrics::ConfusionMatrix;

use crate::checkpoint::values_f64;
use crate::eval::{Metric, MetricValue};

/// Argmax over the class axis of a `[batch, n_class, spatial...]` score
/// tensor, flattened to `batch * spatial` predicted labels.
pub fn argmax_classes(scores: &TensorData, n_class: usize) -> anyhow::Result<Vec<i64>> {
    anyhow::ensure!(
        scores.shape.len() >= 2,
        "score tensor must be at least [batch, n_class], got shape {:?}",
        scores.shape
    );
    anyhow::ensure!(
        scores.shape[1] == n_class,
        "score tensor has {} classes on axis 1, expected {n_class}",
        scores.shape[1]
    );

    let batch = scores.shape[0];
    let spatial: usize = scores.shape[2..].iter().product();
    let values = values_f64("scores", scores)?;

    let mut preds = Vec::with_capacity(batch * spatial);
    for i in 0..batch {
        for s in 0..spatial {
            let mut best_class = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for c in 0..n_class {
                let v = values[i * n_class * spatial + c * spatial + s];
                if v > best_score {
                    best_score = v;
                    best_class = c;
                }
            }
            preds.push(best_class as i64);
        }
    }
    Ok(preds)
}

/// Per-batch confusion histogram from the first label tensor and the first
/// output tensor.
fn batch_confusion(
    labels: &[TensorData],
    outputs: &[TensorData],
    n_class: usize,
) -> anyhow::Result<ConfusionMatrix> {
    anyhow::ensure!(!labels.is_empty(), "metric received no labels");
    anyhow::ensure!(!outputs.is_empty(), "metric received no outputs");

    let truth: Vec<i64> = values_f64("labels", &labels[0])?
        .into_iter()
        .map(|v| v as i64)
        .collect();
    let preds = argmax_classes(&outputs[0], n_class)?;
    anyhow::ensure!(
        truth.len() == preds.len(),
        "label map has {} pixels, predictions have {}",
        truth.len(),
        preds.len()
    );

    let mut cm = ConfusionMatrix::new(n_class);
    cm.record(&truth, &preds);
    Ok(cm)
}

/// Batch mean-IoU as an aggregate metric.
pub fn miou_metric(n_class: usize) -> Metric {
    Metric::new("mean_iou", move |labels, outputs| {
        let cm = batch_confusion(labels, outputs, n_class)?;
        Ok(MetricValue::Aggregate(cm.scores().mean_iou))
    })
}

/// Batch pixel accuracy as an aggregate metric.
pub fn pixel_accuracy_metric(n_class: usize) -> Metric {
    Metric::new("pixel_acc", move |labels, outputs| {
        let cm = batch_confusion(labels, outputs, n_class)?;
        Ok(MetricValue::Aggregate(cm.scores().pixel_acc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scores for 2 samples x 3 classes x 2 pixels, laid out [n, c, s].
    fn score_tensor() -> TensorData {
        #[rustfmt::skip]
        let values = vec![
            // sample 0: pixel 0 favors class 2, pixel 1 favors class 0
            0.1_f32, 0.9,
            0.2, 0.1,
            0.7, 0.0,
            // sample 1: both pixels favor class 1
            0.0, 0.3,
            0.8, 0.6,
            0.2, 0.1,
        ];
        TensorData::new(values, vec![2, 3, 2])
    }

    #[test]
    fn test_argmax_layout() {
        let preds = argmax_classes(&score_tensor(), 3).unwrap();
        assert_eq!(preds, vec![2, 0, 1, 1]);
    }

    #[test]
    fn test_argmax_rejects_wrong_class_count() {
        let err = argmax_classes(&score_tensor(), 4).unwrap_err();
        assert!(err.to_string().contains("expected 4"), "got {err}");
    }

    #[test]
    fn test_miou_agrees_with_direct_confusion() {
        let labels = TensorData::new(vec![2_i64, 0, 1, 0], vec![2, 2]);
        let scores = score_tensor();

        let metric = miou_metric(3);
        let value = metric
            .compute(&[labels.clone()], &[scores.clone()])
            .unwrap();

        let mut cm = ConfusionMatrix::new(3);
        cm.record(&[2, 0, 1, 0], &argmax_classes(&scores, 3).unwrap());
        let expected = cm.scores().mean_iou;

        match value {
            MetricValue::Aggregate(v) => assert!((v - expected).abs() < 1e-12),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_pixel_accuracy_on_known_batch() {
        // Predictions [2, 0, 1, 1] vs truth [2, 0, 1, 0]: 3 of 4 correct.
        let labels = TensorData::new(vec![2_i64, 0, 1, 0], vec![2, 2]);
        let metric = pixel_accuracy_metric(3);
        match metric.compute(&[labels], &[score_tensor()]).unwrap() {
            MetricValue::Aggregate(v) => assert!((v - 0.75).abs() < 1e-12),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
