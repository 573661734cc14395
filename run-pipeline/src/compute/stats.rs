use std::collections::BTreeMap;

use serde_json::Value;
use shared_types::Statistics;

use super::{as_number, lookup};

/// Descriptive statistics; `None` for an empty slice.
///
/// Variance is the population variance. Percentiles take the sorted value at
/// index `floor(n * p)`.
pub fn describe(values: &[f64]) -> Option<Statistics> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / count as f64;
    let median = if count % 2 == 0 {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    } else {
        sorted[count / 2]
    };
    let variance = sorted.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count as f64;

    Some(Statistics {
        count,
        sum,
        mean,
        median,
        min: sorted[0],
        max: sorted[count - 1],
        variance,
        std_dev: variance.sqrt(),
        p25: percentile(&sorted, 0.25),
        p75: percentile(&sorted, 0.75),
    })
}

fn percentile(sorted: &[f64], rank: f64) -> f64 {
    let index = ((sorted.len() as f64) * rank).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Statistics per key over the numeric values found in `items`.
/// Keys without a single numeric value are left out.
pub fn calculate_statistics(items: &[Value], numeric_keys: &[String]) -> BTreeMap<String, Statistics> {
    numeric_keys
        .iter()
        .filter_map(|key| {
            let values: Vec<f64> = items
                .iter()
                .filter_map(|item| lookup(item, key).and_then(as_number))
                .collect();
            describe(&values).map(|stats| (key.clone(), stats))
        })
        .collect()
}
