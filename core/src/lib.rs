pub mod capture;
pub mod config;
pub mod diagram;
pub mod engine;
pub mod graph;
pub mod logging;
pub mod record;
pub mod sort;
pub mod storage;
pub mod store;

pub use capture::TelemetryCapture;
pub use config::{Config, EngineConfig, LoggingConfig, StoreConfig};
pub use diagram::{DiagramRenderer, LineRenderer, RenderError};
pub use engine::IngestEngine;
pub use graph::{DependencyEdge, DependencyGraph};
pub use record::{
    LogRecord, MetricRecord, Resource, ResourceLogs, ResourceMetrics, ResourceSpans, Scope,
    SpanId, SpanRecord, TelemetryBatch, TelemetryKind, TraceId,
};
pub use sort::SortType;
pub use storage::{InsertOutcome, LogCache, MetricCache, TraceCache};
pub use store::Store;
