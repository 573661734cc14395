//! CPU-bound operations run by the offload worker.
//!
//! Everything here is pure and synchronous; the worker module owns message
//! framing and threading.

mod filter;
mod metrics;
mod sort;
mod stats;

use serde_json::Value;
use shared_types::WorkerOp;

pub use filter::{filter_items, matches};
pub use metrics::enrich_metrics;
pub use sort::sort_items;
pub use stats::{calculate_statistics, describe};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum WorkerOpError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Failed to encode result: {0}")]
    Encode(String),
}

/// Run one operation and encode its result.
pub fn execute(op: WorkerOp) -> Result<Value, WorkerOpError> {
    match op {
        WorkerOp::ProcessMetrics(payload) => encode(&enrich_metrics(payload.metrics)),
        WorkerOp::ParseJson(payload) => parse_json(&payload.text),
        WorkerOp::SortData(payload) => Ok(Value::Array(sort_items(payload.items, &payload.keys))),
        WorkerOp::FilterData(payload) => {
            Ok(Value::Array(filter_items(payload.items, &payload.filters)))
        }
        WorkerOp::CalculateStatistics(payload) => {
            encode(&calculate_statistics(&payload.items, &payload.numeric_keys))
        }
    }
}

pub fn parse_json(text: &str) -> Result<Value, WorkerOpError> {
    serde_json::from_str(text).map_err(|err| WorkerOpError::InvalidJson(err.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, WorkerOpError> {
    serde_json::to_value(value).map_err(|err| WorkerOpError::Encode(err.to_string()))
}

/// Field lookup by exact key, then by dotted path (`summary.score`).
pub fn lookup<'a>(item: &'a Value, key: &str) -> Option<&'a Value> {
    let object = item.as_object()?;
    if let Some(value) = object.get(key) {
        return Some(value).filter(|value| !value.is_null());
    }
    if !key.contains('.') {
        return None;
    }
    key.split('.')
        .try_fold(item, |current, segment| current.get(segment))
        .filter(|value| !value.is_null())
}

/// Numbers and numeric strings; non-finite values are rejected.
pub fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(number).filter(|number| number.is_finite())
}

/// Text form used by string comparisons.
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
