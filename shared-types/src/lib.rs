//! Shared types between the run pipeline, the offload worker and the UI
//!
//! These types are used by:
//! - the platform-neutral pipeline (native Rust and WASM)
//! - the offload worker on the other side of the message channel
//! - Dioxus hooks that expose pipeline state to views
//!
//! Serializable with serde for JSON over SSE/HTTP and worker messages

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

// ============================================================================
// Traces
// ============================================================================

/// Reference to an agent taking part in a simulation run.
///
/// The backend sends either a bare string or an object carrying `id` or
/// `name`; both forms normalize to the same reference.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AgentRef(pub String);

impl AgentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AgentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Name(String),
            Object {
                #[serde(default)]
                id: Option<String>,
                #[serde(default)]
                name: Option<String>,
            },
        }

        match Wire::deserialize(deserializer)? {
            Wire::Name(name) => Ok(Self(name)),
            Wire::Object { id, name } => id
                .or(name)
                .map(Self)
                .ok_or_else(|| D::Error::custom("agent reference needs an id or a name")),
        }
    }
}

/// One message exchanged between agents during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRecord {
    pub from: AgentRef,
    pub to: AgentRef,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_system_trace: bool,
}

/// Deduplication identity of a trace record.
///
/// The backend does not assign ids to traces, so two records are the same
/// record when sender, receiver, timestamp and content all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceIdentity {
    pub from: AgentRef,
    pub to: AgentRef,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

impl TraceRecord {
    pub fn identity(&self) -> TraceIdentity {
        TraceIdentity {
            from: self.from.clone(),
            to: self.to.clone(),
            created_at: self.created_at,
            content_hash: content_hash(&self.content),
        }
    }
}

/// SHA-256 of trace content, hex encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Body of `GET /runs/{id}/traces`: a bare list or `{ "traces": [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TracesResponse {
    List(Vec<TraceRecord>),
    Wrapped { traces: Vec<TraceRecord> },
}

impl TracesResponse {
    pub fn into_records(self) -> Vec<TraceRecord> {
        match self {
            Self::List(records) | Self::Wrapped { traces: records } => records,
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Lifecycle status of a run or simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Created,
    InProgress,
    Completed,
    Failed,
    Aborted,
    /// Any status string this client does not know about. Never terminal.
    Unknown,
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "created" => Self::Created,
            "in_progress" | "running" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "aborted" => Self::Aborted,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Body of `GET /runs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunDetail {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunDetail {
    pub fn has_summary(&self) -> bool {
        self.summary.as_ref().is_some_and(|summary| !summary.is_null())
    }

    /// No further updates are expected once a run reaches this point.
    ///
    /// `completed` only counts once the summary has been written; the backend
    /// flips the status before the summary is available.
    pub fn is_terminal_complete(&self) -> bool {
        match self.status {
            RunStatus::Failed | RunStatus::Aborted => true,
            RunStatus::Completed => self.has_summary(),
            RunStatus::Created | RunStatus::InProgress | RunStatus::Unknown => false,
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagDefinition {
    pub tag: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub tag_definitions: Vec<TagDefinition>,
    #[serde(default)]
    pub data: Vec<MetricPoint>,
}

/// Points of one metric that share an identical tag set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSeries {
    pub tags: BTreeMap<String, String>,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// `name{k=v,...}` label, or the bare name for an untagged series.
    pub fn label(&self, metric_name: &str) -> String {
        if self.tags.is_empty() {
            return metric_name.to_string();
        }
        let tags = self
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{metric_name}{{{tags}}}")
    }
}

impl MetricDefinition {
    /// Group data points into series by tag set, in first-appearance order.
    ///
    /// Always derived from `data`; callers appending points get fresh series
    /// membership on the next call.
    pub fn series(&self) -> Vec<MetricSeries> {
        let mut series: Vec<MetricSeries> = Vec::new();
        for point in &self.data {
            match series.iter_mut().find(|s| s.tags == point.tags) {
                Some(existing) => existing.points.push(point.clone()),
                None => series.push(MetricSeries {
                    tags: point.tags.clone(),
                    points: vec![point.clone()],
                }),
            }
        }
        series
    }
}

/// A metric definition tagged with the kind it was listed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatMetric {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(flatten)]
    pub definition: MetricDefinition,
}

/// Body of `GET /runs/{id}/metrics`. Any kind array may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetricsResponse {
    #[serde(default)]
    pub counters: Option<Vec<MetricDefinition>>,
    #[serde(default)]
    pub gauges: Option<Vec<MetricDefinition>>,
    #[serde(default)]
    pub histograms: Option<Vec<MetricDefinition>>,
    #[serde(default)]
    pub summaries: Option<Vec<MetricDefinition>>,
}

impl RunMetricsResponse {
    pub fn flatten(self) -> Vec<FlatMetric> {
        let groups = [
            (MetricKind::Counter, self.counters),
            (MetricKind::Gauge, self.gauges),
            (MetricKind::Histogram, self.histograms),
            (MetricKind::Summary, self.summaries),
        ];
        groups
            .into_iter()
            .flat_map(|(kind, definitions)| {
                definitions
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |definition| FlatMetric { kind, definition })
            })
            .collect()
    }
}

// ============================================================================
// Offload Worker Protocol
// ============================================================================

/// Caller-supplied correlation id. Hosts may send strings or numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(id) => Ok(Self(id)),
            serde_json::Value::Number(id) => Ok(Self(id.to_string())),
            other => Err(D::Error::custom(format!(
                "correlation id must be a string or number, got {other}"
            ))),
        }
    }
}

/// Message `type` vocabulary, shared by requests and responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    ProcessMetrics,
    ParseJson,
    SortData,
    FilterData,
    CalculateStatistics,
    Error,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortKey {
    pub key: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Includes,
    Equals,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterPredicate {
    pub key: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessMetricsPayload {
    pub metrics: Vec<FlatMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParseJsonPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortPayload {
    pub items: Vec<serde_json::Value>,
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterPayload {
    pub items: Vec<serde_json::Value>,
    pub filters: Vec<FilterPredicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsPayload {
    pub items: Vec<serde_json::Value>,
    pub numeric_keys: Vec<String>,
}

/// Operation requested from the offload worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerOp {
    ProcessMetrics(ProcessMetricsPayload),
    ParseJson(ParseJsonPayload),
    SortData(SortPayload),
    FilterData(FilterPayload),
    CalculateStatistics(StatisticsPayload),
}

impl WorkerOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::ProcessMetrics(_) => OpKind::ProcessMetrics,
            Self::ParseJson(_) => OpKind::ParseJson,
            Self::SortData(_) => OpKind::SortData,
            Self::FilterData(_) => OpKind::FilterData,
            Self::CalculateStatistics(_) => OpKind::CalculateStatistics,
        }
    }
}

/// `{ type, data, id }` request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRequest {
    pub id: Option<CorrelationId>,
    pub op: WorkerOp,
}

impl WorkerRequest {
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(&self.op)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("id".to_string(), serde_json::to_value(&self.id)?);
        }
        Ok(value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value()?)
    }

    pub fn from_value(mut value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw_id = match &mut value {
            serde_json::Value::Object(map) => map.remove("id"),
            _ => None,
        };
        let id = match raw_id {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw)?),
        };
        let op = serde_json::from_value(value)?;
        Ok(Self { id, op })
    }
}

/// `{ type, data | error, id }` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerResponse {
    #[serde(rename = "type")]
    pub kind: OpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub id: Option<CorrelationId>,
}

impl WorkerResponse {
    pub fn success(kind: OpKind, id: Option<CorrelationId>, data: serde_json::Value) -> Self {
        Self {
            kind,
            data: Some(data),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<CorrelationId>, error: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Error,
            data: None,
            error: Some(error.into()),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OpKind::Error
    }
}

/// Descriptive statistics over one numeric column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub p25: f64,
    pub p75: f64,
}

/// Per-series digest attached to a metric by `PROCESS_METRICS`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub label: String,
    pub tags: BTreeMap<String, String>,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub latest: f64,
    pub latest_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedMetric {
    #[serde(flatten)]
    pub metric: FlatMetric,
    pub series: Vec<SeriesSummary>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(from: &str, to: &str, content: &str, at: &str) -> TraceRecord {
        serde_json::from_value(json!({
            "from": from,
            "to": to,
            "content": content,
            "created_at": at,
        }))
        .unwrap()
    }

    #[test]
    fn test_agent_ref_accepts_string_and_object() {
        let bare: AgentRef = serde_json::from_value(json!("planner")).unwrap();
        let by_id: AgentRef = serde_json::from_value(json!({"id": "planner"})).unwrap();
        let by_name: AgentRef = serde_json::from_value(json!({"name": "planner"})).unwrap();
        assert_eq!(bare, by_id);
        assert_eq!(bare, by_name);
        assert!(serde_json::from_value::<AgentRef>(json!({})).is_err());
    }

    #[test]
    fn test_trace_identity_uses_content_hash() {
        let a = trace("A", "B", "hello", "2026-02-20T10:00:00Z");
        let same = trace("A", "B", "hello", "2026-02-20T10:00:00Z");
        let other = trace("A", "B", "hello!", "2026-02-20T10:00:00Z");
        assert_eq!(a.identity(), same.identity());
        assert_ne!(a.identity(), other.identity());
        assert_eq!(a.identity().content_hash.len(), 64);
        assert!(!a.is_system_trace);
    }

    #[test]
    fn test_traces_response_shapes() {
        let record = json!({"from": "A", "to": "B", "content": "x", "created_at": "2026-02-20T10:00:00Z"});
        let bare: TracesResponse = serde_json::from_value(json!([record.clone()])).unwrap();
        let wrapped: TracesResponse = serde_json::from_value(json!({"traces": [record]})).unwrap();
        assert_eq!(bare.into_records().len(), 1);
        assert_eq!(wrapped.into_records().len(), 1);
    }

    #[test]
    fn test_run_status_parsing_and_terminal_rules() {
        assert_eq!(RunStatus::parse("in progress"), RunStatus::InProgress);
        assert_eq!(RunStatus::parse("IN_PROGRESS"), RunStatus::InProgress);
        assert_eq!(RunStatus::parse("paused"), RunStatus::Unknown);

        let mut run: RunDetail =
            serde_json::from_value(json!({"id": "42", "status": "completed"})).unwrap();
        assert!(!run.is_terminal_complete(), "completed without summary keeps polling");
        run.summary = Some(json!({"score": 1}));
        assert!(run.is_terminal_complete());

        let failed: RunDetail =
            serde_json::from_value(json!({"id": "42", "status": "failed", "summary": null}))
                .unwrap();
        assert!(failed.is_terminal_complete());
        let created: RunDetail =
            serde_json::from_value(json!({"id": "42", "status": "created"})).unwrap();
        assert!(!created.is_terminal_complete());
    }

    #[test]
    fn test_metrics_flatten_gauges_only() {
        let response: RunMetricsResponse = serde_json::from_value(json!({
            "gauges": [
                {"name": "queue_depth", "description": "pending", "tag_definitions": [], "data": []},
                {"name": "agents_alive", "description": "alive", "data": []}
            ]
        }))
        .unwrap();
        let flat = response.flatten();
        assert_eq!(flat.len(), 2);
        assert!(flat.iter().all(|metric| metric.kind == MetricKind::Gauge));

        let encoded = serde_json::to_value(&flat[0]).unwrap();
        assert_eq!(encoded["type"], "gauge");
        assert_eq!(encoded["name"], "queue_depth");
    }

    #[test]
    fn test_series_recomputed_from_points() {
        let mut metric: MetricDefinition = serde_json::from_value(json!({
            "name": "messages",
            "data": [
                {"time": "2026-02-20T10:00:00Z", "value": 1.0, "tags": {"agent": "a"}},
                {"time": "2026-02-20T10:00:01Z", "value": 2.0, "tags": {"agent": "b"}},
                {"time": "2026-02-20T10:00:02Z", "value": 3.0, "tags": {"agent": "a"}}
            ]
        }))
        .unwrap();
        let series = metric.series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[0].label("messages"), "messages{agent=a}");

        metric.data.push(MetricPoint {
            time: "2026-02-20T10:00:03Z".parse().unwrap(),
            value: 4.0,
            tags: BTreeMap::from([("agent".to_string(), "c".to_string())]),
        });
        assert_eq!(metric.series().len(), 3);
    }

    #[test]
    fn test_worker_request_envelope() {
        let raw = json!({
            "type": "CALCULATE_STATISTICS",
            "data": {"items": [{"v": 1}, {"v": 2}], "numericKeys": ["v"]},
            "id": 7
        });
        let request = WorkerRequest::from_value(raw).unwrap();
        assert_eq!(request.id, Some(CorrelationId::new("7")));
        match &request.op {
            WorkerOp::CalculateStatistics(payload) => {
                assert_eq!(payload.numeric_keys, vec!["v".to_string()]);
                assert_eq!(payload.items.len(), 2);
            }
            other => panic!("unexpected op: {other:?}"),
        }

        let encoded = request.to_value().unwrap();
        assert_eq!(encoded["type"], "CALCULATE_STATISTICS");
        assert_eq!(encoded["id"], "7");
    }

    #[test]
    fn test_worker_error_response_has_null_id() {
        let response = WorkerResponse::failure(None, "bad envelope");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "ERROR");
        assert!(json["id"].is_null());
        assert_eq!(json["error"], "bad envelope");
        assert!(json.get("data").is_none());
    }
}
