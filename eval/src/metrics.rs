//! Benchmark metrics: accuracy, balanced accuracy, and seeded bootstrap
//! uncertainty.
//!
//! Missing predictions are scored with a sentinel label that matches no real
//! class, so failing to answer counts as wrong rather than shrinking the
//! denominator.

use std::collections::HashMap;

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::schema::MetricType;

/// Stands in for a missing prediction; never a valid class label.
pub const MISSING_LABEL_SENTINEL: i64 = -1;

pub type MetricFn = fn(&[i64], &[i64]) -> Result<f64>;

pub fn metric_fn(metric_type: MetricType) -> MetricFn {
    match metric_type {
        MetricType::Accuracy => accuracy,
        MetricType::BalancedAccuracy => balanced_accuracy,
    }
}

/// Fraction of items where prediction equals truth.
pub fn accuracy(predictions: &[i64], truths: &[i64]) -> Result<f64> {
    check_inputs(predictions, truths)?;
    let correct = predictions
        .iter()
        .zip(truths)
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f64 / predictions.len() as f64)
}

/// Mean of per-class recall over the classes present in `truths`.
pub fn balanced_accuracy(predictions: &[i64], truths: &[i64]) -> Result<f64> {
    check_inputs(predictions, truths)?;

    let mut per_class: HashMap<i64, (usize, usize)> = HashMap::new();
    for (p, t) in predictions.iter().zip(truths) {
        let entry = per_class.entry(*t).or_default();
        entry.1 += 1;
        if p == t {
            entry.0 += 1;
        }
    }

    let recall_sum: f64 = per_class
        .values()
        .map(|(correct, total)| *correct as f64 / *total as f64)
        .sum();
    Ok(recall_sum / per_class.len() as f64)
}

fn check_inputs(predictions: &[i64], truths: &[i64]) -> Result<()> {
    if predictions.is_empty() || truths.is_empty() {
        bail!("metric inputs must not be empty");
    }
    if predictions.len() != truths.len() {
        bail!(
            "predictions ({}) and truths ({}) must have the same length",
            predictions.len(),
            truths.len()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapResult {
    pub mean: f64,
    /// Sample standard deviation (ddof = 1).
    pub std: f64,
    /// 2.5th percentile.
    pub ci_lower: f64,
    /// 97.5th percentile.
    pub ci_upper: f64,
    pub n_replicates: usize,
}

/// Resample `(predictions, truths)` with replacement `n_replicates` times and
/// report the metric's mean, standard deviation, and 95% percentile interval.
/// The same seed over the same input produces identical output.
pub fn bootstrap_metric(
    predictions: &[i64],
    truths: &[i64],
    metric: MetricFn,
    n_replicates: usize,
    seed: u64,
) -> Result<BootstrapResult> {
    check_inputs(predictions, truths)?;
    if n_replicates == 0 {
        bail!("n_replicates must be positive");
    }

    let n = predictions.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut scores = Vec::with_capacity(n_replicates);
    let mut sample_pred = vec![0i64; n];
    let mut sample_truth = vec![0i64; n];

    for _ in 0..n_replicates {
        for i in 0..n {
            let idx = rng.random_range(0..n);
            sample_pred[i] = predictions[idx];
            sample_truth[i] = truths[idx];
        }
        scores.push(metric(&sample_pred, &sample_truth)?);
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let std = if scores.len() > 1 {
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (scores.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    let mut sorted = scores;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    Ok(BootstrapResult {
        mean,
        std,
        ci_lower: percentile(&sorted, 2.5),
        ci_upper: percentile(&sorted, 97.5),
        n_replicates,
    })
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
