use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use spanscope_core::record::{
    Log, Metric, MetricData, NumberDataPoint, NumberValue, ScopeLogs, ScopeMetrics, ScopeSpans,
    Span, StatusCode,
};
use spanscope_core::{
    Resource, ResourceLogs, ResourceMetrics, ResourceSpans, Scope, SpanId, TelemetryBatch,
    TraceId,
};
use std::sync::Arc;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

pub fn trace_id(n: u8) -> TraceId {
    TraceId::from_bytes([n; 16])
}

/// Span starting at the base time and lasting `latency_ms`
pub fn span(trace: TraceId, id: u64, parent: u64, name: &str, latency_ms: i64) -> Span {
    let start = base_time();
    Span::new(trace, SpanId::from_u64(id), SpanId::from_u64(parent), name)
        .with_times(start, start + Duration::milliseconds(latency_ms))
}

pub fn span_batch(service: &str, spans: Vec<Span>) -> TelemetryBatch {
    TelemetryBatch::Spans(vec![ResourceSpans {
        resource: Arc::new(Resource::with_service_name(service)),
        scope_spans: vec![ScopeSpans {
            scope: Arc::new(Scope::new("spanscope-test", "0.1.0")),
            spans,
        }],
    }])
}

pub fn log_batch(service: &str, trace: TraceId, span: u64, bodies: &[&str]) -> TelemetryBatch {
    TelemetryBatch::Logs(vec![ResourceLogs {
        resource: Arc::new(Resource::with_service_name(service)),
        scope_logs: vec![ScopeLogs {
            scope: Arc::new(Scope::new("spanscope-test", "0.1.0")),
            logs: bodies
                .iter()
                .map(|body| {
                    Log::new(*body)
                        .with_trace(trace, SpanId::from_u64(span))
                        .with_severity(9, "INFO")
                })
                .collect(),
        }],
    }])
}

pub fn gauge_batch(service: &str, names: &[&str]) -> TelemetryBatch {
    let metrics = names
        .iter()
        .map(|name| {
            Metric::new(
                *name,
                MetricData::Gauge {
                    data_points: vec![NumberDataPoint {
                        time: base_time(),
                        start_time: None,
                        value: NumberValue::Double(1.0),
                        attributes: Default::default(),
                    }],
                },
            )
        })
        .collect();

    TelemetryBatch::Metrics(vec![ResourceMetrics {
        resource: Arc::new(Resource::with_service_name(service)),
        scope_metrics: vec![ScopeMetrics {
            scope: Arc::new(Scope::new("spanscope-test", "0.1.0")),
            metrics,
        }],
    }])
}

pub struct ServiceChainFixture {
    pub trace_id: TraceId,
    pub batches: Vec<TelemetryBatch>,
    pub expected_service_spans: usize,
    pub expected_spans: usize,
    pub expected_diagram: &'static str,
}

/// web -> api -> db -> cache, with api querying db twice and db failing once
pub fn service_chain_fixture() -> ServiceChainFixture {
    let trace = trace_id(7);

    let batches = vec![
        span_batch("web", vec![span(trace, 1, 0, "GET /checkout", 120)]),
        span_batch("api", vec![span(trace, 2, 1, "POST /orders", 90)]),
        span_batch(
            "db",
            vec![
                span(trace, 3, 2, "SELECT orders", 20),
                span(trace, 4, 2, "UPDATE stock", 30).with_status(StatusCode::Error),
            ],
        ),
        span_batch("cache", vec![span(trace, 5, 3, "GET order:42", 2)]),
    ];

    ServiceChainFixture {
        trace_id: trace,
        batches,
        expected_service_spans: 4,
        expected_spans: 5,
        expected_diagram: "web ─[1]→ api ─[2]→ db ─[1]→ cache",
    }
}

/// Decode a transport payload into a batch through the record serde shapes
pub fn batch_from_json(payload: serde_json::Value) -> Result<TelemetryBatch> {
    serde_json::from_value(payload).context("payload is not a telemetry batch")
}

pub const PAYMENT_TRACE_HEX: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

/// gateway -> payments as it would arrive from a JSON transport; the
/// payments span fails
pub fn payment_trace_json() -> serde_json::Value {
    json!({
        "Spans": [
            {
                "resource": { "attributes": { "service.name": "gateway" } },
                "scope_spans": [{
                    "scope": { "name": "http", "version": "1.2.0" },
                    "spans": [{
                        "trace_id": PAYMENT_TRACE_HEX,
                        "span_id": "00f067aa0ba902b7",
                        "parent_span_id": "",
                        "name": "POST /pay",
                        "kind": "Server",
                        "start_time": "2024-05-01T09:30:00Z",
                        "end_time": "2024-05-01T09:30:00.250Z"
                    }]
                }]
            },
            {
                "resource": { "attributes": { "service.name": "payments" } },
                "scope_spans": [{
                    "spans": [{
                        "trace_id": PAYMENT_TRACE_HEX,
                        "span_id": "00f067aa0ba902b8",
                        "parent_span_id": "00f067aa0ba902b7",
                        "name": "charge card",
                        "start_time": "2024-05-01T09:30:00.010Z",
                        "end_time": "2024-05-01T09:30:00.200Z",
                        "status": { "code": "Error", "message": "card declined" }
                    }]
                }]
            }
        ]
    })
}
