use crate::diagram::{DiagramRenderer, RenderError};
use crate::graph::DependencyGraph;
use crate::record::{SpanId, SpanRecord, TraceId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Result of recording one span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    /// First span seen for this (trace, service) pair
    pub is_new_service_in_trace: bool,
    /// Representative root displaced by the inserted span
    pub replaced_span_id: Option<SpanId>,
}

/// Entry point of a service within a trace.
///
/// `expected_parent` is the parent id recorded when the representative was
/// seeded; the online heuristic only promotes a span whose id matches it.
#[derive(Debug, Clone)]
struct RepresentativeRoot {
    span: Arc<SpanRecord>,
    expected_parent: SpanId,
}

impl RepresentativeRoot {
    fn seed(span: Arc<SpanRecord>) -> Self {
        let expected_parent = span.parent_span_id();
        Self {
            span,
            expected_parent,
        }
    }
}

/// Span index keyed by span id, trace id and (trace id, service name).
///
/// Not thread-safe on its own; the `Store` lock guards every access.
#[derive(Debug, Default)]
pub struct TraceCache {
    span_by_id: HashMap<SpanId, Arc<SpanRecord>>,
    spans_by_trace: HashMap<TraceId, Vec<Arc<SpanRecord>>>,
    spans_by_trace_service: HashMap<TraceId, HashMap<String, Vec<Arc<SpanRecord>>>>,
    has_error_by_trace_service: HashMap<TraceId, HashMap<String, bool>>,
    root_by_trace_service: HashMap<TraceId, HashMap<String, RepresentativeRoot>>,
}

impl TraceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a span under `service_name`.
    ///
    /// The first span of a (trace, service) pair seeds the representative
    /// root. Later spans replace it only when their id equals the parent id
    /// recorded at seeding time (one generation, no ancestor walk); use
    /// [`TraceCache::recalculate_root`] to correct anything deeper.
    pub fn insert(&mut self, service_name: &str, record: Arc<SpanRecord>) -> InsertOutcome {
        let span_id = record.span_id();
        if self.span_by_id.contains_key(&span_id) {
            debug!(span_id = %span_id, "ignoring span already present in trace cache");
            return InsertOutcome::default();
        }

        let trace_id = record.trace_id();
        let has_error = record.has_error();

        self.span_by_id.insert(span_id, Arc::clone(&record));
        self.spans_by_trace
            .entry(trace_id)
            .or_default()
            .push(Arc::clone(&record));

        let services = self.spans_by_trace_service.entry(trace_id).or_default();
        match services.get_mut(service_name) {
            None => {
                services.insert(service_name.to_string(), vec![Arc::clone(&record)]);
                self.has_error_by_trace_service
                    .entry(trace_id)
                    .or_default()
                    .insert(service_name.to_string(), has_error);
                self.root_by_trace_service
                    .entry(trace_id)
                    .or_default()
                    .insert(service_name.to_string(), RepresentativeRoot::seed(record));

                InsertOutcome {
                    is_new_service_in_trace: true,
                    replaced_span_id: None,
                }
            }
            Some(spans) => {
                spans.push(Arc::clone(&record));

                if has_error {
                    self.has_error_by_trace_service
                        .entry(trace_id)
                        .or_default()
                        .insert(service_name.to_string(), true);
                }

                let mut replaced_span_id = None;
                let roots = self.root_by_trace_service.entry(trace_id).or_default();
                match roots.get_mut(service_name) {
                    Some(root) if !span_id.is_empty() && root.expected_parent == span_id => {
                        replaced_span_id = Some(root.span.span_id());
                        root.span = record;
                    }
                    Some(_) => {}
                    None => {
                        roots.insert(service_name.to_string(), RepresentativeRoot::seed(record));
                    }
                }

                InsertOutcome {
                    is_new_service_in_trace: false,
                    replaced_span_id,
                }
            }
        }
    }

    /// Evict the (trace, service) pair each record stands for.
    ///
    /// Every span of the pair leaves every index; buckets left empty are
    /// pruned, including the trace-level entries once no service remains.
    pub fn delete(&mut self, records: &[Arc<SpanRecord>]) {
        for record in records {
            self.evict_pair(record.trace_id(), record.service_name());
        }
    }

    fn evict_pair(&mut self, trace_id: TraceId, service_name: &str) {
        let Some(services) = self.spans_by_trace_service.get_mut(&trace_id) else {
            return;
        };
        let Some(evicted) = services.remove(service_name) else {
            return;
        };
        let trace_emptied = services.is_empty();

        let evicted_ids: HashSet<SpanId> = evicted.iter().map(|s| s.span_id()).collect();
        for span_id in &evicted_ids {
            self.span_by_id.remove(span_id);
        }
        if let Some(trace_spans) = self.spans_by_trace.get_mut(&trace_id) {
            trace_spans.retain(|s| !evicted_ids.contains(&s.span_id()));
        }
        if let Some(flags) = self.has_error_by_trace_service.get_mut(&trace_id) {
            flags.remove(service_name);
        }
        if let Some(roots) = self.root_by_trace_service.get_mut(&trace_id) {
            roots.remove(service_name);
        }

        if trace_emptied {
            self.spans_by_trace_service.remove(&trace_id);
            self.spans_by_trace.remove(&trace_id);
            self.has_error_by_trace_service.remove(&trace_id);
            self.root_by_trace_service.remove(&trace_id);
        }

        debug!(
            trace_id = %trace_id,
            service = service_name,
            spans = evicted_ids.len(),
            "evicted service spans from trace cache"
        );
    }

    pub fn spans_by_trace_id(&self, trace_id: &TraceId) -> Option<&[Arc<SpanRecord>]> {
        self.spans_by_trace.get(trace_id).map(Vec::as_slice)
    }

    pub fn spans_by_trace_id_and_service(
        &self,
        trace_id: &TraceId,
        service_name: &str,
    ) -> Option<&[Arc<SpanRecord>]> {
        self.spans_by_trace_service
            .get(trace_id)?
            .get(service_name)
            .map(Vec::as_slice)
    }

    /// Sticky: true once any span of the pair carried error status
    pub fn has_error(&self, trace_id: &TraceId, service_name: &str) -> Option<bool> {
        self.has_error_by_trace_service
            .get(trace_id)?
            .get(service_name)
            .copied()
    }

    pub fn span_by_id(&self, span_id: &SpanId) -> Option<&Arc<SpanRecord>> {
        self.span_by_id.get(span_id)
    }

    pub fn representative_root(
        &self,
        trace_id: &TraceId,
        service_name: &str,
    ) -> Option<&Arc<SpanRecord>> {
        self.root_by_trace_service
            .get(trace_id)?
            .get(service_name)
            .map(|root| &root.span)
    }

    /// Full rescan of a pair: installs the first span (arrival order) whose
    /// parent is not among the pair's own spans.
    pub fn recalculate_root(
        &mut self,
        trace_id: &TraceId,
        service_name: &str,
    ) -> Option<Arc<SpanRecord>> {
        let spans = self
            .spans_by_trace_service
            .get(trace_id)?
            .get(service_name)?;

        let ids: HashSet<SpanId> = spans.iter().map(|s| s.span_id()).collect();
        // A pair whose parents all point inside it is a cycle; keep the oldest span.
        let root = spans
            .iter()
            .find(|s| !ids.contains(&s.parent_span_id()))
            .or_else(|| spans.first())
            .cloned()?;

        self.root_by_trace_service
            .entry(*trace_id)
            .or_default()
            .insert(
                service_name.to_string(),
                RepresentativeRoot::seed(Arc::clone(&root)),
            );

        Some(root)
    }

    /// Render the service dependency graph of every cached span
    pub fn build_dependency_diagram(
        &self,
        renderer: &dyn DiagramRenderer,
    ) -> Result<String, RenderError> {
        let graph = DependencyGraph::build(self);
        renderer.render(&graph.to_mermaid())
    }

    /// All spans, by ascending trace id then arrival order
    pub fn iter_spans(&self) -> impl Iterator<Item = &Arc<SpanRecord>> + '_ {
        let mut trace_ids: Vec<&TraceId> = self.spans_by_trace.keys().collect();
        trace_ids.sort();
        trace_ids
            .into_iter()
            .filter_map(move |id| self.spans_by_trace.get(id))
            .flat_map(|spans| spans.iter())
    }

    pub fn span_count(&self) -> usize {
        self.span_by_id.len()
    }

    pub fn trace_count(&self) -> usize {
        self.spans_by_trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.span_by_id.is_empty()
    }

    pub fn flush(&mut self) {
        self.span_by_id.clear();
        self.spans_by_trace.clear();
        self.spans_by_trace_service.clear();
        self.has_error_by_trace_service.clear();
        self.root_by_trace_service.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Resource, Scope, Span, StatusCode};

    fn record(trace_id: TraceId, service: &str, id: u64, parent: u64) -> Arc<SpanRecord> {
        record_with_status(trace_id, service, id, parent, StatusCode::Unset)
    }

    fn record_with_status(
        trace_id: TraceId,
        service: &str,
        id: u64,
        parent: u64,
        status: StatusCode,
    ) -> Arc<SpanRecord> {
        let span = Span::new(
            trace_id,
            SpanId::from_u64(id),
            SpanId::from_u64(parent),
            format!("op-{id}"),
        )
        .with_status(status);
        Arc::new(SpanRecord::new(
            span,
            Arc::new(Resource::with_service_name(service)),
            Arc::new(Scope::default()),
        ))
    }

    fn insert(cache: &mut TraceCache, record: &Arc<SpanRecord>) -> InsertOutcome {
        cache.insert(record.service_name(), Arc::clone(record))
    }

    fn assert_consistent(cache: &TraceCache) {
        let by_trace: usize = cache.spans_by_trace.values().map(Vec::len).sum();
        let by_service: usize = cache
            .spans_by_trace_service
            .values()
            .flat_map(|services| services.values())
            .map(Vec::len)
            .sum();
        assert_eq!(cache.span_by_id.len(), by_trace);
        assert_eq!(cache.span_by_id.len(), by_service);

        for (trace_id, spans) in &cache.spans_by_trace {
            for span in spans {
                assert!(Arc::ptr_eq(&cache.span_by_id[&span.span_id()], span));
                let bucket = &cache.spans_by_trace_service[trace_id][span.service_name()];
                assert!(bucket.iter().any(|s| Arc::ptr_eq(s, span)));
            }
        }
        for (trace_id, services) in &cache.spans_by_trace_service {
            assert!(!services.is_empty());
            for (service, spans) in services {
                assert!(!spans.is_empty());
                assert!(cache.has_error_by_trace_service[trace_id].contains_key(service));
                assert!(cache.root_by_trace_service[trace_id].contains_key(service));
                for span in spans {
                    assert_eq!(span.service_name(), service);
                    assert!(cache.spans_by_trace[trace_id]
                        .iter()
                        .any(|s| Arc::ptr_eq(s, span)));
                }
            }
        }
        assert_eq!(
            cache.spans_by_trace.len(),
            cache.spans_by_trace_service.len()
        );
        assert_eq!(
            cache.spans_by_trace.len(),
            cache.has_error_by_trace_service.len()
        );
        assert_eq!(cache.spans_by_trace.len(), cache.root_by_trace_service.len());
    }

    #[test]
    fn first_span_of_pair_seeds_root() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        let span = record(trace_id, "api", 1, 0);

        let outcome = insert(&mut cache, &span);
        assert!(outcome.is_new_service_in_trace);
        assert_eq!(outcome.replaced_span_id, None);
        assert!(Arc::ptr_eq(
            cache.representative_root(&trace_id, "api").unwrap(),
            &span
        ));

        let other = insert(&mut cache, &record(trace_id, "db", 2, 1));
        assert!(other.is_new_service_in_trace);
        assert_eq!(cache.trace_count(), 1);
        assert_eq!(cache.span_count(), 2);
        assert_consistent(&cache);
    }

    #[test]
    fn adjacent_parent_replaces_root_once() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        let child = record(trace_id, "api", 3, 2);
        let parent = record(trace_id, "api", 2, 1);
        let grandparent = record(trace_id, "api", 1, 0);

        insert(&mut cache, &child);
        assert!(Arc::ptr_eq(
            cache.representative_root(&trace_id, "api").unwrap(),
            &child
        ));

        let outcome = insert(&mut cache, &parent);
        assert!(!outcome.is_new_service_in_trace);
        assert_eq!(outcome.replaced_span_id, Some(SpanId::from_u64(3)));
        assert!(Arc::ptr_eq(
            cache.representative_root(&trace_id, "api").unwrap(),
            &parent
        ));

        let outcome = insert(&mut cache, &grandparent);
        assert_eq!(outcome.replaced_span_id, None);
        assert!(Arc::ptr_eq(
            cache.representative_root(&trace_id, "api").unwrap(),
            &parent
        ));

        let root = cache.recalculate_root(&trace_id, "api").unwrap();
        assert!(Arc::ptr_eq(&root, &grandparent));
        assert!(Arc::ptr_eq(
            cache.representative_root(&trace_id, "api").unwrap(),
            &grandparent
        ));
        assert_consistent(&cache);
    }

    #[test]
    fn recalculate_root_ignores_parents_in_other_services() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        insert(&mut cache, &record(trace_id, "web", 1, 0));
        let nested = record(trace_id, "api", 5, 4);
        let entry = record(trace_id, "api", 4, 1);
        insert(&mut cache, &nested);
        insert(&mut cache, &record(trace_id, "api", 6, 5));
        insert(&mut cache, &entry);

        let root = cache.recalculate_root(&trace_id, "api").unwrap();
        assert!(Arc::ptr_eq(&root, &entry));
        assert!(cache.recalculate_root(&trace_id, "missing").is_none());
    }

    #[test]
    fn error_flag_is_sticky() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        insert(&mut cache, &record(trace_id, "api", 1, 0));
        assert_eq!(cache.has_error(&trace_id, "api"), Some(false));

        insert(
            &mut cache,
            &record_with_status(trace_id, "api", 2, 1, StatusCode::Error),
        );
        insert(
            &mut cache,
            &record_with_status(trace_id, "api", 3, 1, StatusCode::Ok),
        );
        assert_eq!(cache.has_error(&trace_id, "api"), Some(true));
        assert_eq!(cache.has_error(&trace_id, "db"), None);
    }

    #[test]
    fn duplicate_span_ids_are_ignored() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        let span = record(trace_id, "api", 1, 0);
        insert(&mut cache, &span);

        let outcome = insert(&mut cache, &record(trace_id, "api", 1, 0));
        assert_eq!(outcome, InsertOutcome::default());
        assert_eq!(cache.span_count(), 1);
        assert_consistent(&cache);
    }

    #[test]
    fn delete_evicts_pair_and_prunes_buckets() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        let web_root = record(trace_id, "web", 1, 0);
        let api_root = record(trace_id, "api", 2, 1);
        insert(&mut cache, &web_root);
        insert(&mut cache, &api_root);
        insert(&mut cache, &record(trace_id, "api", 3, 2));
        insert(&mut cache, &record(trace_id, "web", 4, 1));

        cache.delete(&[Arc::clone(&api_root)]);
        assert_consistent(&cache);
        assert_eq!(cache.span_count(), 2);
        assert!(cache.spans_by_trace_id_and_service(&trace_id, "api").is_none());
        assert!(cache.has_error(&trace_id, "api").is_none());
        assert!(cache.span_by_id(&SpanId::from_u64(3)).is_none());
        assert_eq!(cache.spans_by_trace_id(&trace_id).unwrap().len(), 2);

        cache.delete(&[web_root]);
        assert_consistent(&cache);
        assert!(cache.is_empty());
        assert!(cache.spans_by_trace_id(&trace_id).is_none());
        assert_eq!(cache.trace_count(), 0);

        // deleting an already evicted pair is a no-op
        cache.delete(&[api_root]);
        assert!(cache.is_empty());
    }

    #[test]
    fn interleaved_inserts_and_deletes_stay_consistent() {
        let mut cache = TraceCache::new();
        let traces: Vec<TraceId> = (0..4).map(|_| TraceId::random()).collect();
        let services = ["web", "api", "db"];
        let mut seeds = Vec::new();

        for id in 1..=60u64 {
            let trace_id = traces[(id % 4) as usize];
            let service = services[(id % 3) as usize];
            let span = record(trace_id, service, id, id.saturating_sub(4));
            if insert(&mut cache, &span).is_new_service_in_trace {
                seeds.push(span);
            }
            if id % 7 == 0 && !seeds.is_empty() {
                let evicted = seeds.remove(0);
                cache.delete(&[evicted]);
            }
            assert_consistent(&cache);
        }

        cache.delete(&seeds);
        assert_consistent(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn iter_spans_is_ordered_by_trace_then_arrival() {
        let mut cache = TraceCache::new();
        let low = TraceId::from_bytes([1; 16]);
        let high = TraceId::from_bytes([2; 16]);
        insert(&mut cache, &record(high, "api", 10, 0));
        insert(&mut cache, &record(low, "api", 20, 0));
        insert(&mut cache, &record(low, "api", 21, 20));

        let order: Vec<SpanId> = cache.iter_spans().map(|s| s.span_id()).collect();
        assert_eq!(
            order,
            vec![SpanId::from_u64(20), SpanId::from_u64(21), SpanId::from_u64(10)]
        );
    }

    #[test]
    fn flush_clears_every_index() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        insert(&mut cache, &record(trace_id, "api", 1, 0));
        cache.flush();
        assert!(cache.is_empty());
        assert_eq!(cache.trace_count(), 0);
        assert!(cache.representative_root(&trace_id, "api").is_none());
        assert_consistent(&cache);
    }
}
