use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Resource attribute holding the logical service name
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Service name used for records whose resource carries no `service.name`
pub const UNKNOWN_SERVICE: &str = "unknown";

pub type Attributes = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: {value:?}")]
pub struct IdParseError {
    kind: &'static str,
    value: String,
}

/// 16-byte trace identifier, rendered as 32 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId(Uuid);

impl TraceId {
    pub const EMPTY: TraceId = TraceId(Uuid::nil());

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdParseError {
                kind: "trace",
                value: s.to_string(),
            });
        }
        let raw = u128::from_str_radix(s, 16).map_err(|_| IdParseError {
            kind: "trace",
            value: s.to_string(),
        })?;
        Ok(Self(Uuid::from_u128(raw)))
    }
}

/// 8-byte span identifier, rendered as 16 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(u64);

impl SpanId {
    pub const EMPTY: SpanId = SpanId(0);

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdParseError {
                kind: "span",
                value: s.to_string(),
            });
        }
        u64::from_str_radix(s, 16).map(Self).map_err(|_| IdParseError {
            kind: "span",
            value: s.to_string(),
        })
    }
}

// Ids travel as hex strings; an empty string decodes to the empty id.
macro_rules! hex_id_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                if raw.is_empty() {
                    return Ok(<$ty>::EMPTY);
                }
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_id_serde!(TraceId);
hex_id_serde!(SpanId);

/// Originating process/service of a group of records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    dropped_attributes_count: u32,
    #[serde(skip)]
    service_name: OnceLock<String>,
}

impl Resource {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            dropped_attributes_count: 0,
            service_name: OnceLock::new(),
        }
    }

    pub fn with_service_name(name: impl Into<String>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(
            SERVICE_NAME_KEY.to_string(),
            serde_json::Value::String(name.into()),
        );
        Self::new(attributes)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn dropped_attributes_count(&self) -> u32 {
        self.dropped_attributes_count
    }

    /// Service name from the attribute set, resolved on first use
    pub fn service_name(&self) -> &str {
        self.service_name
            .get_or_init(|| match self.attributes.get(SERVICE_NAME_KEY) {
                Some(serde_json::Value::String(name)) if !name.is_empty() => name.clone(),
                Some(serde_json::Value::Null) | Some(serde_json::Value::String(_)) | None => {
                    UNKNOWN_SERVICE.to_string()
                }
                Some(other) => other.to_string(),
            })
    }
}

/// Instrumentation source within a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Scope {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            attributes: Attributes::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

/// Timestamped annotation recorded during a span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A single timed operation within a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub parent_span_id: SpanId,
    #[serde(default)]
    pub trace_state: String,
    pub name: String,
    #[serde(default)]
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub status: Status,
}

impl Span {
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: SpanId,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            trace_state: String::new(),
            name: name.into(),
            kind: SpanKind::Unspecified,
            start_time: now,
            end_time: now,
            attributes: Attributes::new(),
            events: Vec::new(),
            status: Status::default(),
        }
    }

    pub fn with_times(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_status(mut self, code: StatusCode) -> Self {
        self.status.code = code;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.status.code == StatusCode::Error
    }

    /// `end - start`, clamped at zero for spans reported with inverted clocks
    pub fn duration(&self) -> Duration {
        let elapsed = self.end_time - self.start_time;
        if elapsed < Duration::zero() {
            Duration::zero()
        } else {
            elapsed
        }
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub observed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity_number: i32,
    #[serde(default)]
    pub severity_text: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub trace_id: TraceId,
    #[serde(default)]
    pub span_id: SpanId,
    #[serde(default)]
    pub flags: u32,
}

impl Log {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            observed_time: None,
            severity_number: 0,
            severity_text: String::new(),
            body: body.into(),
            attributes: Attributes::new(),
            trace_id: TraceId::EMPTY,
            span_id: SpanId::EMPTY,
            flags: 0,
        }
    }

    pub fn with_trace(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    pub fn with_severity(mut self, number: i32, text: impl Into<String>) -> Self {
        self.severity_number = number;
        self.severity_text = text.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationTemporality {
    #[default]
    Unspecified,
    Delta,
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Int(v) => *v as f64,
            NumberValue::Double(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberDataPoint {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub value: NumberValue,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramDataPoint {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub count: u64,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub bucket_counts: Vec<u64>,
    #[serde(default)]
    pub explicit_bounds: Vec<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExponentialBuckets {
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub bucket_counts: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialHistogramDataPoint {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub count: u64,
    #[serde(default)]
    pub sum: Option<f64>,
    #[serde(default)]
    pub scale: i32,
    #[serde(default)]
    pub zero_count: u64,
    #[serde(default)]
    pub positive: ExponentialBuckets,
    #[serde(default)]
    pub negative: ExponentialBuckets,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueAtQuantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDataPoint {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub count: u64,
    pub sum: f64,
    #[serde(default)]
    pub quantile_values: Vec<ValueAtQuantile>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Payload shape of a metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MetricData {
    Gauge {
        data_points: Vec<NumberDataPoint>,
    },
    Sum {
        data_points: Vec<NumberDataPoint>,
        #[serde(default)]
        is_monotonic: bool,
        #[serde(default)]
        temporality: AggregationTemporality,
    },
    Histogram {
        data_points: Vec<HistogramDataPoint>,
        #[serde(default)]
        temporality: AggregationTemporality,
    },
    ExponentialHistogram {
        data_points: Vec<ExponentialHistogramDataPoint>,
        #[serde(default)]
        temporality: AggregationTemporality,
    },
    Summary {
        data_points: Vec<SummaryDataPoint>,
    },
}

impl MetricData {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricData::Gauge { .. } => "Gauge",
            MetricData::Sum { .. } => "Sum",
            MetricData::Histogram { .. } => "Histogram",
            MetricData::ExponentialHistogram { .. } => "ExponentialHistogram",
            MetricData::Summary { .. } => "Summary",
        }
    }

    pub fn data_point_count(&self) -> usize {
        match self {
            MetricData::Gauge { data_points } | MetricData::Sum { data_points, .. } => {
                data_points.len()
            }
            MetricData::Histogram { data_points, .. } => data_points.len(),
            MetricData::ExponentialHistogram { data_points, .. } => data_points.len(),
            MetricData::Summary { data_points } => data_points.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    pub data: MetricData,
}

impl Metric {
    pub fn new(name: impl Into<String>, data: MetricData) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A span as held by the store, sharing its resource and scope groups
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub span: Span,
    pub resource: Arc<Resource>,
    pub scope: Arc<Scope>,
    pub received_at: DateTime<Utc>,
}

impl SpanRecord {
    pub fn new(span: Span, resource: Arc<Resource>, scope: Arc<Scope>) -> Self {
        Self {
            span,
            resource,
            scope,
            received_at: Utc::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.resource.service_name()
    }

    pub fn trace_id(&self) -> TraceId {
        self.span.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span.span_id
    }

    pub fn parent_span_id(&self) -> SpanId {
        self.span.parent_span_id
    }

    pub fn is_root(&self) -> bool {
        self.span.is_root()
    }

    pub fn has_error(&self) -> bool {
        self.span.has_error()
    }

    pub fn latency(&self) -> Duration {
        self.span.duration()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub log: Log,
    pub resource: Arc<Resource>,
    pub scope: Arc<Scope>,
    pub received_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(log: Log, resource: Arc<Resource>, scope: Arc<Scope>) -> Self {
        Self {
            log,
            resource,
            scope,
            received_at: Utc::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.resource.service_name()
    }

    pub fn trace_id(&self) -> TraceId {
        self.log.trace_id
    }

    /// Span this log was emitted under, if any
    pub fn span_id(&self) -> Option<SpanId> {
        (!self.log.span_id.is_empty()).then_some(self.log.span_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub metric: Metric,
    pub resource: Arc<Resource>,
    pub scope: Arc<Scope>,
    pub received_at: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(metric: Metric, resource: Arc<Resource>, scope: Arc<Scope>) -> Self {
        Self {
            metric,
            resource,
            scope,
            received_at: Utc::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.resource.service_name()
    }

    pub fn name(&self) -> &str {
        &self.metric.name
    }
}

// ---------------------------------------------------------------------------
// Ingestion batches (resource -> scope -> records)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSpans {
    #[serde(default)]
    pub scope: Arc<Scope>,
    #[serde(default)]
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSpans {
    #[serde(default)]
    pub resource: Arc<Resource>,
    #[serde(default)]
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeLogs {
    #[serde(default)]
    pub scope: Arc<Scope>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLogs {
    #[serde(default)]
    pub resource: Arc<Resource>,
    #[serde(default)]
    pub scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeMetrics {
    #[serde(default)]
    pub scope: Arc<Scope>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    #[serde(default)]
    pub resource: Arc<Resource>,
    #[serde(default)]
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKind {
    Spans,
    Logs,
    Metrics,
}

/// One decoded unit handed over by the ingestion transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryBatch {
    Spans(Vec<ResourceSpans>),
    Logs(Vec<ResourceLogs>),
    Metrics(Vec<ResourceMetrics>),
}

impl TelemetryBatch {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryBatch::Spans(_) => TelemetryKind::Spans,
            TelemetryBatch::Logs(_) => TelemetryKind::Logs,
            TelemetryBatch::Metrics(_) => TelemetryKind::Metrics,
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            TelemetryBatch::Spans(groups) => groups
                .iter()
                .flat_map(|rs| &rs.scope_spans)
                .map(|ss| ss.spans.len())
                .sum(),
            TelemetryBatch::Logs(groups) => groups
                .iter()
                .flat_map(|rl| &rl.scope_logs)
                .map(|sl| sl.logs.len())
                .sum(),
            TelemetryBatch::Metrics(groups) => groups
                .iter()
                .flat_map(|rm| &rm.scope_metrics)
                .map(|sm| sm.metrics.len())
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_renders_as_hex() {
        let id = TraceId::from_bytes([
            0x4b, 0xf9, 0x2f, 0x35, 0x77, 0xb3, 0x4d, 0xa6, 0xa3, 0xce, 0x92, 0x9d, 0x0e, 0x0e,
            0x47, 0x36,
        ]);
        assert_eq!(id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!("4bf92f3577b34da6a3ce929d0e0e4736".parse::<TraceId>().unwrap(), id);
        assert!("not-a-trace".parse::<TraceId>().is_err());
        assert!(TraceId::EMPTY.is_empty());
    }

    #[test]
    fn span_id_renders_as_hex() {
        let id = SpanId::from_bytes([0, 0xf0, 0x67, 0xaa, 0x0b, 0xa9, 0x02, 0xb7]);
        assert_eq!(id.to_string(), "00f067aa0ba902b7");
        assert_eq!("00f067aa0ba902b7".parse::<SpanId>().unwrap(), id);
        assert_eq!(SpanId::EMPTY.to_string(), "0000000000000000");
    }

    #[test]
    fn empty_parent_id_deserializes_as_root() {
        let span: Span = serde_json::from_value(serde_json::json!({
            "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
            "span_id": "00f067aa0ba902b7",
            "parent_span_id": "",
            "name": "GET /",
            "start_time": "2024-01-01T12:00:00Z",
            "end_time": "2024-01-01T12:00:01Z"
        }))
        .unwrap();

        assert!(span.is_root());
        assert_eq!(span.duration(), Duration::seconds(1));
    }

    #[test]
    fn service_name_falls_back_to_unknown() {
        assert_eq!(Resource::default().service_name(), UNKNOWN_SERVICE);
        assert_eq!(Resource::with_service_name("").service_name(), UNKNOWN_SERVICE);
        assert_eq!(
            Resource::with_service_name("checkout").service_name(),
            "checkout"
        );
    }

    #[test]
    fn inverted_span_clock_has_zero_duration() {
        let now = Utc::now();
        let span = Span::new(TraceId::random(), SpanId::from_u64(1), SpanId::EMPTY, "op")
            .with_times(now, now - Duration::milliseconds(5));
        assert_eq!(span.duration(), Duration::zero());
    }

    #[test]
    fn batch_counts_records() {
        let batch = TelemetryBatch::Metrics(vec![ResourceMetrics {
            resource: Arc::new(Resource::with_service_name("api")),
            scope_metrics: vec![ScopeMetrics {
                scope: Arc::new(Scope::default()),
                metrics: vec![Metric::new(
                    "requests",
                    MetricData::Gauge {
                        data_points: Vec::new(),
                    },
                )],
            }],
        }]);
        assert_eq!(batch.kind(), TelemetryKind::Metrics);
        assert_eq!(batch.record_count(), 1);
    }
}
