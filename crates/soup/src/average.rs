//! Uniform soup: unweighted elementwise averaging of checkpoints.

use anyhow::Context;
use tracing::debug;

use crate::checkpoint::{data_from_f64, values_f64, CheckpointSource, ParamMap};
use crate::model::SoupModel;

/// Elementwise mean across parameter maps, per key.
///
/// Each key is averaged over the maps that define it; a map missing a key
/// simply doesn't contribute to that key. The mean is accumulated in f64
/// and cast back to the dtype of the key's first contributor, in `parts`
/// order. Contributors to one key must have the same shape.
pub fn average_params(parts: &[ParamMap]) -> anyhow::Result<ParamMap> {
    struct Accum {
        dtype: burn::tensor::DType,
        shape: Vec<usize>,
        sum: Vec<f64>,
        count: usize,
    }
    let mut acc: std::collections::HashMap<String, Accum> = std::collections::HashMap::new();

    for (i, part) in parts.iter().enumerate() {
        for (key, data) in part {
            let values = values_f64(key, data)
                .with_context(|| format!("checkpoint {i}, parameter {key}"))?;
            match acc.get_mut(key) {
                None => {
                    // First contributor fixes dtype and shape.
                    acc.insert(
                        key.clone(),
                        Accum {
                            dtype: data.dtype,
                            shape: data.shape.clone(),
                            sum: values,
                            count: 1,
                        },
                    );
                }
                Some(entry) => {
                    anyhow::ensure!(
                        entry.shape == data.shape,
                        "parameter {key}: checkpoint {i} has shape {:?}, expected {:?}",
                        data.shape,
                        entry.shape
                    );
                    for (s, v) in entry.sum.iter_mut().zip(values) {
                        *s += v;
                    }
                    entry.count += 1;
                }
            }
        }
    }

    let mut merged = ParamMap::with_capacity(acc.len());
    for (key, entry) in acc {
        let mean: Vec<f64> = entry.sum.into_iter().map(|s| s / entry.count as f64).collect();
        let data = data_from_f64(&key, mean, entry.shape, entry.dtype)?;
        merged.insert(key, data);
    }
    Ok(merged)
}

/// Average checkpoints into the model's state ("uniform soup").
///
/// Resolves every source, optionally restricts each to the keys present in
/// the model's current state (`by_name`), averages per key, and loads the
/// result. Keys with zero contributors keep the model's current values.
/// A single source degenerates to a plain checkpoint load.
pub fn uniform_soup<M: SoupModel + ?Sized>(
    model: &mut M,
    sources: &[CheckpointSource],
    by_name: bool,
) -> anyhow::Result<()> {
    let mut state = model.state_dict();

    let mut parts = Vec::with_capacity(sources.len());
    for source in sources {
        let mut params = source
            .resolve()
            .with_context(|| format!("resolving checkpoint {}", source.label()))?;
        if by_name {
            params.retain(|key, _| state.contains_key(key));
        }
        parts.push(params);
    }

    let merged = average_params(&parts)?;
    debug!(
        checkpoints = sources.len(),
        merged_keys = merged.len(),
        by_name,
        "Uniform soup computed"
    );

    state.extend(merged);
    model.load_state_dict(state)
}
