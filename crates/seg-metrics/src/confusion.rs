//! Running confusion histogram and derived segmentation scores.

use serde::Serialize;

/// An `n_class x n_class` count matrix over (true label, predicted label)
/// pixel pairs, stored flat in row-major order.
///
/// Entry `(t, p)` counts pixels whose true label is `t` and predicted label
/// is `p`. Pixels whose true or predicted label falls outside
/// `[0, n_class)` are skipped, not counted and not an error — this is what
/// lets void/ignore labels pass through unharmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    n_class: usize,
    counts: Vec<u64>,
}

/// Scores derived from a [`ConfusionMatrix`].
///
/// Per-class divisions by zero produce NaN, and NaN entries are excluded
/// from the means. A class that never appears in the ground truth therefore
/// does not drag `mean_class_acc` or `mean_iou` down.
#[derive(Debug, Clone, Serialize)]
pub struct SegScores {
    /// Overall pixel accuracy: correct pixels / all pixels.
    pub pixel_acc: f64,
    /// Mean per-class accuracy over classes with at least one true pixel.
    pub mean_class_acc: f64,
    /// Mean intersection-over-union over classes with a nonzero union.
    pub mean_iou: f64,
    /// IoU weighted by each class's share of true pixels.
    pub freq_weighted_acc: f64,
    /// Per-class IoU; NaN for classes with an empty union.
    pub class_iou: Vec<f64>,
}

impl ConfusionMatrix {
    /// Create an empty histogram for `n_class` classes.
    ///
    /// # Panics
    /// Panics if `n_class` is zero.
    pub fn new(n_class: usize) -> Self {
        assert!(n_class > 0, "n_class must be > 0");
        Self {
            n_class,
            counts: vec![0; n_class * n_class],
        }
    }

    pub fn n_class(&self) -> usize {
        self.n_class
    }

    /// Flat row-major counts, length `n_class * n_class`.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Count for (true label `t`, predicted label `p`).
    pub fn count(&self, t: usize, p: usize) -> u64 {
        self.counts[self.n_class * t + p]
    }

    /// Total number of counted pixels.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bin one flattened (truth, prediction) label-map pair into the
    /// histogram. Out-of-range labels are skipped.
    ///
    /// # Panics
    /// Panics if the slices have different lengths.
    pub fn record(&mut self, truth: &[i64], pred: &[i64]) {
        assert_eq!(
            truth.len(),
            pred.len(),
            "truth has {} pixels, prediction has {}",
            truth.len(),
            pred.len()
        );
        let n = self.n_class as i64;
        for (&t, &p) in truth.iter().zip(pred.iter()) {
            if (0..n).contains(&t) && (0..n).contains(&p) {
                self.counts[self.n_class * t as usize + p as usize] += 1;
            }
        }
    }

    /// Fold a batch of (truth, prediction) pairs into the histogram.
    pub fn record_batch<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a [i64], &'a [i64])>) {
        for (truth, pred) in pairs {
            self.record(truth, pred);
        }
    }

    /// Add another histogram into this one.
    ///
    /// Together with [`record`](Self::record) this makes accumulation
    /// associative: any partition of the same batches yields the same
    /// final histogram.
    ///
    /// # Panics
    /// Panics if the class counts differ.
    pub fn merge(&mut self, other: &ConfusionMatrix) {
        assert_eq!(
            self.n_class, other.n_class,
            "cannot merge histograms with {} and {} classes",
            self.n_class, other.n_class
        );
        for (dst, src) in self.counts.iter_mut().zip(other.counts.iter()) {
            *dst += src;
        }
    }

    /// Derive segmentation scores from the current histogram.
    pub fn scores(&self) -> SegScores {
        let n = self.n_class;
        let total = self.total() as f64;

        let diag: Vec<f64> = (0..n).map(|i| self.count(i, i) as f64).collect();
        let row_sum: Vec<f64> = (0..n)
            .map(|t| (0..n).map(|p| self.count(t, p)).sum::<u64>() as f64)
            .collect();
        let col_sum: Vec<f64> = (0..n)
            .map(|p| (0..n).map(|t| self.count(t, p)).sum::<u64>() as f64)
            .collect();

        // 0/0 stays NaN and is excluded from the means below.
        let pixel_acc = diag.iter().sum::<f64>() / total;
        let class_acc: Vec<f64> = (0..n).map(|i| diag[i] / row_sum[i]).collect();
        let class_iou: Vec<f64> = (0..n)
            .map(|i| diag[i] / (row_sum[i] + col_sum[i] - diag[i]))
            .collect();

        let freq: Vec<f64> = row_sum.iter().map(|r| r / total).collect();
        let freq_weighted_acc = (0..n)
            .filter(|&i| freq[i] > 0.0)
            .map(|i| freq[i] * class_iou[i])
            .sum();

        SegScores {
            pixel_acc,
            mean_class_acc: nan_mean(&class_acc),
            mean_iou: nan_mean(&class_iou),
            freq_weighted_acc,
            class_iou,
        }
    }
}

/// Mean over finite entries; NaN entries are excluded. NaN if nothing is left.
fn nan_mean(values: &[f64]) -> f64 {
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
