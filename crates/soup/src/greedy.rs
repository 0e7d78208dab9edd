//! Greedy soup: validation-guided checkpoint selection.
//!
//! Candidates are visited in the caller's order. Each step builds a trial
//! merge, scores it on the validation stream, and keeps the merge only if
//! the comparator accepts the new score against the best seen so far. The
//! default comparator is the non-strict `GreaterOrEqual`: a tie accepts the
//! *later* candidate, so ties monotonically favor later-indexed
//! checkpoints. That is a deliberate policy, not an accident — use
//! [`Comparator::Greater`] for strict improvement.

use anyhow::Context;
use tracing::{debug, info};

use crate::average::uniform_soup;
use crate::checkpoint::{data_from_f64, values_f64, CheckpointSource, ParamMap};
use crate::eval::{evaluate, nan_mean, BatchKeys, Metric, ValidationSource};
use crate::model::SoupModel;

/// Score acceptance policy: does `new` beat `best`?
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Comparator {
    /// Accept ties — later candidates win on equal score.
    #[default]
    GreaterOrEqual,
    /// Strict improvement only.
    Greater,
}

impl Comparator {
    pub fn accepts(self, new: f64, best: f64) -> bool {
        match self {
            Comparator::GreaterOrEqual => new >= best,
            Comparator::Greater => new > best,
        }
    }
}

/// How a trial merge is built each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Pairwise running mean between the candidate's state and the
    /// previously accepted soup state. Keeps only merged tensors; path
    /// identity of accepted checkpoints is discarded.
    AveragedState,
    /// Uniform soup over {accepted paths} ∪ {candidate}, rebuilt from the
    /// raw checkpoints each step.
    PathAccumulation,
}

/// Knobs for [`greedy_soup`].
#[derive(Debug, Clone)]
pub struct GreedySoupConfig {
    pub merge_mode: MergeMode,
    pub comparator: Comparator,
    /// Restrict checkpoint keys to those present in the model's state.
    pub by_name: bool,
    /// Key contract for named validation batches.
    pub batch_keys: BatchKeys,
    /// Emit per-candidate summary logs.
    pub verbose: bool,
    /// Decimal places for scores in log output.
    pub digits: usize,
}

impl Default for GreedySoupConfig {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::PathAccumulation,
            comparator: Comparator::GreaterOrEqual,
            by_name: false,
            batch_keys: BatchKeys::default(),
            verbose: true,
            digits: 4,
        }
    }
}

/// Outcome of a greedy soup run.
#[derive(Debug, Clone)]
pub struct GreedySoupReport {
    /// Best validation score over accepted candidates; `None` when nothing
    /// was accepted (empty validation stream) and the model is unchanged.
    pub best_score: Option<f64>,
    /// Labels of accepted candidates, in acceptance order.
    pub accepted: Vec<String>,
    /// Trial score of every evaluated candidate, in input order.
    pub scores: Vec<f64>,
}

/// Run the greedy soup search and leave the winning merge loaded in the
/// model.
///
/// Candidates are tried in `sources` order; each trial is evaluated on one
/// full pass over `data` with `metric`, and the candidate score is the
/// NaN-excluding mean of the per-sample history. The first candidate with a
/// non-empty history is always accepted; later candidates are accepted per
/// `config.comparator`.
///
/// If no candidate is ever accepted the model's preexisting weights stand —
/// callers must not assume a merge occurred (check
/// [`GreedySoupReport::best_score`]).
pub fn greedy_soup<M: SoupModel + ?Sized>(
    model: &mut M,
    sources: &[CheckpointSource],
    data: &dyn ValidationSource,
    metric: &Metric,
    config: &GreedySoupConfig,
) -> anyhow::Result<GreedySoupReport> {
    model.eval_mode();
    let base_state = model.state_dict();

    let mut best_score: Option<f64> = None;
    let mut soup_state = ParamMap::new();
    let mut soup_paths: Vec<CheckpointSource> = Vec::new();
    let mut accepted: Vec<String> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();

    for (index, source) in sources.iter().enumerate() {
        let label = source.label();

        // Build and load the trial merge.
        let trial_state = match config.merge_mode {
            MergeMode::AveragedState => {
                let mut weights = source
                    .resolve()
                    .with_context(|| format!("resolving candidate {label}"))?;
                if config.by_name {
                    weights.retain(|key, _| base_state.contains_key(key));
                }
                let trial = if soup_state.is_empty() {
                    weights
                } else {
                    pairwise_mean(&base_state, &weights, &soup_state, &label)?
                };
                let mut state = base_state.clone();
                state.extend(trial.clone());
                model.load_state_dict(state)?;
                Some(trial)
            }
            MergeMode::PathAccumulation => {
                let mut trial_paths = soup_paths.clone();
                trial_paths.push(source.clone());
                uniform_soup(model, &trial_paths, config.by_name)?;
                None
            }
        };

        let history = evaluate(
            model,
            data,
            metric,
            &config.batch_keys,
            &label,
            config.verbose,
        )?;
        let score = nan_mean(&history);
        scores.push(score);

        let accept = !history.is_empty()
            && best_score.map_or(true, |best| config.comparator.accepts(score, best));
        if accept {
            best_score = Some(score);
            match config.merge_mode {
                // trial_state is Some by construction in this mode
                MergeMode::AveragedState => soup_state = trial_state.unwrap_or_default(),
                MergeMode::PathAccumulation => soup_paths.push(source.clone()),
            }
            accepted.push(label.clone());
            info!(
                candidate = label,
                index,
                score = format!("{score:.prec$}", prec = config.digits),
                soup_size = accepted.len(),
                "Candidate accepted"
            );
        } else {
            debug!(
                candidate = label,
                index,
                score = format!("{score:.prec$}", prec = config.digits),
                best = best_score.unwrap_or(f64::NAN),
                "Candidate rejected"
            );
        }
    }

    // Finalize: reload the accepted soup (a rejected trailing trial may
    // still be loaded in the model at this point). With nothing accepted,
    // the model's preexisting weights are restored instead.
    if accepted.is_empty() {
        model.load_state_dict(base_state)?;
        info!(
            candidates = sources.len(),
            "Greedy soup accepted no candidates; model left unchanged"
        );
    } else {
        match config.merge_mode {
            MergeMode::AveragedState => {
                let mut state = base_state;
                state.extend(soup_state);
                model.load_state_dict(state)?;
            }
            MergeMode::PathAccumulation => {
                uniform_soup(model, &soup_paths, config.by_name)?;
            }
        }
        if config.verbose {
            let best = best_score.unwrap_or(f64::NAN);
            info!(
                best_score = format!("{best:.prec$}", prec = config.digits),
                soup_size = accepted.len(),
                candidates = sources.len(),
                "Greedy soup finished"
            );
        }
    }

    Ok(GreedySoupReport {
        best_score,
        accepted,
        scores,
    })
}

/// Elementwise mean of the candidate's and the accepted soup's tensors,
/// over the model's key set, cast to the candidate tensor's dtype.
///
/// A key the model has but the candidate or soup lacks is an error here:
/// averaged-state mode has no per-key tolerance, matching the strictness
/// this merge has always had with heterogeneous parameter coverage.
fn pairwise_mean(
    base_state: &ParamMap,
    weights: &ParamMap,
    soup: &ParamMap,
    label: &str,
) -> anyhow::Result<ParamMap> {
    let mut merged = ParamMap::with_capacity(base_state.len());
    for key in base_state.keys() {
        let candidate = weights
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("candidate {label} is missing parameter {key}"))?;
        let accepted = soup
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("accepted soup is missing parameter {key}"))?;

        let a = values_f64(key, candidate)?;
        let b = values_f64(key, accepted)?;
        anyhow::ensure!(
            a.len() == b.len(),
            "parameter {key}: candidate {label} has {} elements, soup has {}",
            a.len(),
            b.len()
        );
        let mean: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect();
        let data = data_from_f64(key, mean, candidate.shape.clone(), candidate.dtype)?;
        merged.insert(key.clone(), data);
    }
    Ok(merged)
}
