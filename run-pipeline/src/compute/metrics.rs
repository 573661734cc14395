use shared_types::{EnrichedMetric, FlatMetric, MetricSeries, SeriesSummary};

use super::describe;

/// Attach per-series digests and whole-metric statistics.
pub fn enrich_metrics(metrics: Vec<FlatMetric>) -> Vec<EnrichedMetric> {
    metrics
        .into_iter()
        .map(|metric| {
            let name = metric.definition.name.clone();
            let series = metric
                .definition
                .series()
                .into_iter()
                .filter_map(|series| summarize(&name, series))
                .collect();
            let values: Vec<f64> = metric.definition.data.iter().map(|point| point.value).collect();
            EnrichedMetric {
                statistics: describe(&values),
                series,
                metric,
            }
        })
        .collect()
}

fn summarize(metric_name: &str, series: MetricSeries) -> Option<SeriesSummary> {
    let label = series.label(metric_name);
    // Latest by timestamp; among equal timestamps the later point wins.
    let latest = series
        .points
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.time.cmp(&b.time).then(ia.cmp(ib)))
        .map(|(_, point)| point)?;

    let count = series.points.len();
    let (min, max, sum) = series.points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), point| (min.min(point.value), max.max(point.value), sum + point.value),
    );

    Some(SeriesSummary {
        label,
        count,
        min,
        max,
        mean: sum / count as f64,
        latest: latest.value,
        latest_time: latest.time,
        tags: series.tags,
    })
}
