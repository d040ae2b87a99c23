use crate::config::StoreConfig;
use crate::diagram::{DiagramRenderer, LineRenderer, RenderError};
use crate::record::{
    LogRecord, MetricRecord, ResourceLogs, ResourceMetrics, ResourceSpans, SpanRecord,
    TelemetryBatch, TelemetryKind, TraceId,
};
use crate::sort::{sort_spans, SortType};
use crate::storage::{LogCache, MetricCache, TraceCache};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub type AddedCallback = Box<dyn Fn(TelemetryKind) + Send>;
pub type FlushedCallback = Box<dyn Fn() + Send>;

struct StoreState {
    config: StoreConfig,

    trace_cache: TraceCache,
    log_cache: LogCache,
    metric_cache: MetricCache,

    service_spans: Vec<Arc<SpanRecord>>,
    filtered_service_spans: Vec<Arc<SpanRecord>>,
    logs: Vec<Arc<LogRecord>>,
    filtered_logs: Vec<Arc<LogRecord>>,
    metrics: Vec<Arc<MetricRecord>>,
    filtered_metrics: Vec<Arc<MetricRecord>>,

    trace_filter: String,
    sort_type: SortType,
    log_filter: String,
    metric_filter: String,

    updated_at: DateTime<Utc>,
    on_added: Option<AddedCallback>,
    on_flushed: Vec<FlushedCallback>,
    renderer: Box<dyn DiagramRenderer>,
}

impl StoreState {
    fn new(config: StoreConfig) -> Self {
        Self {
            config,
            trace_cache: TraceCache::new(),
            log_cache: LogCache::new(),
            metric_cache: MetricCache::new(),
            service_spans: Vec::new(),
            filtered_service_spans: Vec::new(),
            logs: Vec::new(),
            filtered_logs: Vec::new(),
            metrics: Vec::new(),
            filtered_metrics: Vec::new(),
            trace_filter: String::new(),
            sort_type: SortType::default(),
            log_filter: String::new(),
            metric_filter: String::new(),
            updated_at: Utc::now(),
            on_added: None,
            on_flushed: Vec::new(),
            renderer: Box::new(LineRenderer),
        }
    }

    fn ingest_spans(&mut self, batch: Vec<ResourceSpans>) {
        for resource_spans in batch {
            let resource = resource_spans.resource;
            for scope_spans in resource_spans.scope_spans {
                for span in scope_spans.spans {
                    let record = Arc::new(SpanRecord::new(
                        span,
                        Arc::clone(&resource),
                        Arc::clone(&scope_spans.scope),
                    ));
                    self.ingest_span(record);
                }
            }
        }

        let max = self.config.max_service_span_count;
        if self.service_spans.len() > max {
            let excess = self.service_spans.len() - max;
            let evicted: Vec<Arc<SpanRecord>> = self.service_spans.drain(..excess).collect();
            self.trace_cache.delete(&evicted);
            debug!(evicted = evicted.len(), "rotated service spans");
        }

        self.refilter_traces();
    }

    fn ingest_span(&mut self, record: Arc<SpanRecord>) {
        let service_name = record.service_name().to_string();
        let outcome = self.trace_cache.insert(&service_name, Arc::clone(&record));

        if outcome.is_new_service_in_trace {
            self.service_spans.push(record);
            return;
        }

        if let Some(replaced) = outcome.replaced_span_id {
            let trace_id = record.trace_id();
            if let Some(slot) = self
                .service_spans
                .iter_mut()
                .find(|s| s.span_id() == replaced && s.trace_id() == trace_id)
            {
                *slot = record;
            }
        }
    }

    fn ingest_logs(&mut self, batch: Vec<ResourceLogs>) {
        for resource_logs in batch {
            let resource = resource_logs.resource;
            for scope_logs in resource_logs.scope_logs {
                for log in scope_logs.logs {
                    let record = Arc::new(LogRecord::new(
                        log,
                        Arc::clone(&resource),
                        Arc::clone(&scope_logs.scope),
                    ));
                    self.log_cache.insert(Arc::clone(&record));
                    self.logs.push(record);
                }
            }
        }

        let max = self.config.max_log_count;
        if self.logs.len() > max {
            let excess = self.logs.len() - max;
            let evicted: Vec<Arc<LogRecord>> = self.logs.drain(..excess).collect();
            self.log_cache.delete(&evicted);
            debug!(evicted = evicted.len(), "rotated logs");
        }

        self.refilter_logs();
    }

    fn ingest_metrics(&mut self, batch: Vec<ResourceMetrics>) {
        for resource_metrics in batch {
            let resource = resource_metrics.resource;
            for scope_metrics in resource_metrics.scope_metrics {
                for metric in scope_metrics.metrics {
                    let record = Arc::new(MetricRecord::new(
                        metric,
                        Arc::clone(&resource),
                        Arc::clone(&scope_metrics.scope),
                    ));
                    let service_name = record.service_name().to_string();
                    self.metric_cache
                        .insert(&service_name, Arc::clone(&record));
                    self.metrics.push(record);
                }
            }
        }

        let max = self.config.max_metric_count;
        if self.metrics.len() > max {
            let excess = self.metrics.len() - max;
            let evicted: Vec<Arc<MetricRecord>> = self.metrics.drain(..excess).collect();
            self.metric_cache.delete(&evicted);
            debug!(evicted = evicted.len(), "rotated metrics");
        }

        self.refilter_metrics();
    }

    fn refilter_traces(&mut self) {
        let query = self.trace_filter.as_str();
        let mut filtered: Vec<Arc<SpanRecord>> = self
            .service_spans
            .iter()
            .filter(|s| matches_query(query, s.service_name(), &s.span.name))
            .cloned()
            .collect();
        sort_spans(&mut filtered, self.sort_type);
        self.filtered_service_spans = filtered;
    }

    fn refilter_logs(&mut self) {
        let query = self.log_filter.as_str();
        self.filtered_logs = self
            .logs
            .iter()
            .filter(|l| matches_query(query, l.service_name(), &l.log.body))
            .cloned()
            .collect();
    }

    fn refilter_metrics(&mut self) {
        let query = self.metric_filter.as_str();
        self.filtered_metrics = self
            .metrics
            .iter()
            .filter(|m| matches_query(query, m.service_name(), m.name()))
            .cloned()
            .collect();
    }

    /// `updated_at` never stands still, even within one clock tick
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::nanoseconds(1)
        };
    }

    fn notify_added(&self, kind: TelemetryKind) {
        if let Some(callback) = &self.on_added {
            callback(kind);
        }
    }
}

fn matches_query(query: &str, service_name: &str, text: &str) -> bool {
    query.is_empty() || format!("{service_name} {text}").contains(query)
}

/// Aggregates the span, log and metric caches with their bounded view lists.
///
/// Every public method holds the single state lock for its whole body, so a
/// view list and its cache never disagree from a caller's point of view.
/// Callbacks run inside that lock and must not call back into the store.
pub struct Store {
    state: Mutex<StoreState>,
}

impl Store {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate().context("Invalid store configuration")?;
        Ok(Self {
            state: Mutex::new(StoreState::new(config.clone())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Ingestion -------------------------------------------------------------

    pub fn apply(&self, batch: TelemetryBatch) {
        match batch {
            TelemetryBatch::Spans(batch) => self.add_spans(batch),
            TelemetryBatch::Logs(batch) => self.add_logs(batch),
            TelemetryBatch::Metrics(batch) => self.add_metrics(batch),
        }
    }

    pub fn add_spans(&self, batch: Vec<ResourceSpans>) {
        let mut state = self.lock();
        state.ingest_spans(batch);
        state.touch();
        state.notify_added(TelemetryKind::Spans);
    }

    pub fn add_logs(&self, batch: Vec<ResourceLogs>) {
        let mut state = self.lock();
        state.ingest_logs(batch);
        state.touch();
        state.notify_added(TelemetryKind::Logs);
    }

    pub fn add_metrics(&self, batch: Vec<ResourceMetrics>) {
        let mut state = self.lock();
        state.ingest_metrics(batch);
        state.touch();
        state.notify_added(TelemetryKind::Metrics);
    }

    // Filters ---------------------------------------------------------------

    /// Keep service spans whose `"<service> <span name>"` contains `query`,
    /// ordered by `sort_type`
    pub fn apply_filter_traces(&self, query: &str, sort_type: SortType) {
        let mut state = self.lock();
        state.trace_filter = query.to_string();
        state.sort_type = sort_type;
        state.refilter_traces();
    }

    /// Keep logs whose `"<service> <body>"` contains `query`
    pub fn apply_filter_logs(&self, query: &str) {
        let mut state = self.lock();
        state.log_filter = query.to_string();
        state.refilter_logs();
    }

    /// Keep metrics whose `"<service> <metric name>"` contains `query`
    pub fn apply_filter_metrics(&self, query: &str) {
        let mut state = self.lock();
        state.metric_filter = query.to_string();
        state.refilter_metrics();
    }

    pub fn sort_type(&self) -> SortType {
        self.lock().sort_type
    }

    // Positional reads ------------------------------------------------------

    pub fn filtered_service_span_by_idx(&self, idx: usize) -> Option<Arc<SpanRecord>> {
        self.lock().filtered_service_spans.get(idx).cloned()
    }

    pub fn filtered_log_by_idx(&self, idx: usize) -> Option<Arc<LogRecord>> {
        self.lock().filtered_logs.get(idx).cloned()
    }

    pub fn filtered_metric_by_idx(&self, idx: usize) -> Option<Arc<MetricRecord>> {
        self.lock().filtered_metrics.get(idx).cloned()
    }

    pub fn trace_id_by_filtered_idx(&self, idx: usize) -> Option<TraceId> {
        self.lock()
            .filtered_service_spans
            .get(idx)
            .map(|s| s.trace_id())
    }

    // Snapshots -------------------------------------------------------------

    pub fn filtered_service_spans(&self) -> Vec<Arc<SpanRecord>> {
        self.lock().filtered_service_spans.clone()
    }

    pub fn filtered_logs(&self) -> Vec<Arc<LogRecord>> {
        self.lock().filtered_logs.clone()
    }

    pub fn filtered_metrics(&self) -> Vec<Arc<MetricRecord>> {
        self.lock().filtered_metrics.clone()
    }

    pub fn service_span_count(&self) -> usize {
        self.lock().service_spans.len()
    }

    pub fn log_count(&self) -> usize {
        self.lock().logs.len()
    }

    pub fn metric_count(&self) -> usize {
        self.lock().metrics.len()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.lock().updated_at
    }

    // Root correction -------------------------------------------------------

    /// Rescan the (trace, service) pair shown at filtered position `idx` and
    /// put its true root in that slot of both view lists.
    ///
    /// The slot keeps its position even under a latency sort; the new root
    /// takes its sorted place at the next refilter (filter change or
    /// ingestion).
    pub fn recalculate_service_root_span_by_idx(&self, idx: usize) -> Option<Arc<SpanRecord>> {
        let mut state = self.lock();
        let current = state.filtered_service_spans.get(idx).cloned()?;
        let root = state
            .trace_cache
            .recalculate_root(&current.trace_id(), current.service_name())?;

        if let Some(slot) = state
            .service_spans
            .iter_mut()
            .find(|s| Arc::ptr_eq(s, &current))
        {
            *slot = Arc::clone(&root);
        }
        state.filtered_service_spans[idx] = Arc::clone(&root);
        state.touch();

        debug!(
            trace_id = %root.trace_id(),
            service = root.service_name(),
            span_id = %root.span_id(),
            "recalculated service root span"
        );
        Some(root)
    }

    // Cache access ----------------------------------------------------------

    pub fn with_trace_cache<R>(&self, f: impl FnOnce(&TraceCache) -> R) -> R {
        f(&self.lock().trace_cache)
    }

    pub fn with_log_cache<R>(&self, f: impl FnOnce(&LogCache) -> R) -> R {
        f(&self.lock().log_cache)
    }

    pub fn with_metric_cache<R>(&self, f: impl FnOnce(&MetricCache) -> R) -> R {
        f(&self.lock().metric_cache)
    }

    // Subscriptions ---------------------------------------------------------

    /// Replace the callback fired after every ingestion
    pub fn on_added(&self, callback: impl Fn(TelemetryKind) + Send + 'static) {
        self.lock().on_added = Some(Box::new(callback));
    }

    /// Add a subscriber fired after every flush
    pub fn on_flushed(&self, callback: impl Fn() + Send + 'static) {
        self.lock().on_flushed.push(Box::new(callback));
    }

    // Topology --------------------------------------------------------------

    pub fn set_diagram_renderer(&self, renderer: impl DiagramRenderer + 'static) {
        self.lock().renderer = Box::new(renderer);
    }

    pub fn build_dependency_diagram(&self) -> Result<String, RenderError> {
        let state = self.lock();
        let result = state
            .trace_cache
            .build_dependency_diagram(state.renderer.as_ref());
        if let Err(e) = &result {
            warn!("Failed to render dependency diagram: {}", e);
        }
        result
    }

    // Flush -----------------------------------------------------------------

    pub fn flush(&self) {
        let mut state = self.lock();
        state.trace_cache.flush();
        state.log_cache.flush();
        state.metric_cache.flush();

        state.service_spans.clear();
        state.filtered_service_spans.clear();
        state.logs.clear();
        state.filtered_logs.clear();
        state.metrics.clear();
        state.filtered_metrics.clear();

        state.trace_filter.clear();
        state.log_filter.clear();
        state.metric_filter.clear();
        state.sort_type = SortType::default();
        state.touch();

        info!("Flushed telemetry store");
        for callback in &state.on_flushed {
            callback();
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Store")
            .field("service_spans", &state.service_spans.len())
            .field("logs", &state.logs.len())
            .field("metrics", &state.metrics.len())
            .field("updated_at", &state.updated_at)
            .finish()
    }
}
