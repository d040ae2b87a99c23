use crate::record::{LogRecord, SpanId, TraceId};
use std::collections::HashMap;
use std::sync::Arc;

/// Logs indexed by the trace they were emitted under.
///
/// Logs without a trace id are kept in the store's view list only.
#[derive(Debug, Default)]
pub struct LogCache {
    logs_by_trace: HashMap<TraceId, Vec<Arc<LogRecord>>>,
}

impl LogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Arc<LogRecord>) {
        let trace_id = record.trace_id();
        if trace_id.is_empty() {
            return;
        }
        self.logs_by_trace.entry(trace_id).or_default().push(record);
    }

    /// Remove exactly these records, pruning emptied trace buckets
    pub fn delete(&mut self, records: &[Arc<LogRecord>]) {
        for record in records {
            let trace_id = record.trace_id();
            let Some(logs) = self.logs_by_trace.get_mut(&trace_id) else {
                continue;
            };
            if let Some(pos) = logs.iter().position(|l| Arc::ptr_eq(l, record)) {
                logs.remove(pos);
            }
            if logs.is_empty() {
                self.logs_by_trace.remove(&trace_id);
            }
        }
    }

    pub fn logs_by_trace_id(&self, trace_id: &TraceId) -> Option<&[Arc<LogRecord>]> {
        self.logs_by_trace.get(trace_id).map(Vec::as_slice)
    }

    /// Logs emitted under one span of a trace, in arrival order
    pub fn logs_by_span(&self, trace_id: &TraceId, span_id: &SpanId) -> Vec<Arc<LogRecord>> {
        self.logs_by_trace_id(trace_id)
            .map(|logs| {
                logs.iter()
                    .filter(|l| l.span_id() == Some(*span_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trace_count(&self) -> usize {
        self.logs_by_trace.len()
    }

    pub fn len(&self) -> usize {
        self.logs_by_trace.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.logs_by_trace.is_empty()
    }

    pub fn flush(&mut self) {
        self.logs_by_trace.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Log, Resource, Scope};

    fn log(trace_id: TraceId, span_id: u64, body: &str) -> Arc<LogRecord> {
        Arc::new(LogRecord::new(
            Log::new(body).with_trace(trace_id, SpanId::from_u64(span_id)),
            Arc::new(Resource::with_service_name("api")),
            Arc::new(Scope::default()),
        ))
    }

    #[test]
    fn logs_are_grouped_by_trace() {
        let mut cache = LogCache::new();
        let trace_a = TraceId::random();
        let trace_b = TraceId::random();
        cache.insert(log(trace_a, 1, "started"));
        cache.insert(log(trace_b, 2, "other"));
        cache.insert(log(trace_a, 3, "finished"));

        let logs = cache.logs_by_trace_id(&trace_a).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log.body, "started");
        assert_eq!(logs[1].log.body, "finished");
        assert_eq!(cache.logs_by_span(&trace_a, &SpanId::from_u64(3)).len(), 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn logs_without_trace_are_not_indexed() {
        let mut cache = LogCache::new();
        cache.insert(log(TraceId::EMPTY, 0, "boot"));
        assert!(cache.is_empty());
    }

    #[test]
    fn delete_removes_records_and_prunes() {
        let mut cache = LogCache::new();
        let trace_id = TraceId::random();
        let first = log(trace_id, 1, "a");
        let second = log(trace_id, 1, "a");
        cache.insert(Arc::clone(&first));
        cache.insert(Arc::clone(&second));

        cache.delete(&[Arc::clone(&first)]);
        let remaining = cache.logs_by_trace_id(&trace_id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &second));

        cache.delete(&[second]);
        assert!(cache.logs_by_trace_id(&trace_id).is_none());
        assert_eq!(cache.trace_count(), 0);
    }
}
