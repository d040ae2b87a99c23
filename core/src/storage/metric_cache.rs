use crate::record::MetricRecord;
use std::collections::HashMap;
use std::sync::Arc;

/// Metrics indexed by service name, then metric name
#[derive(Debug, Default)]
pub struct MetricCache {
    metrics_by_service: HashMap<String, HashMap<String, Vec<Arc<MetricRecord>>>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service_name: &str, record: Arc<MetricRecord>) {
        self.metrics_by_service
            .entry(service_name.to_string())
            .or_default()
            .entry(record.name().to_string())
            .or_default()
            .push(record);
    }

    /// Remove exactly these records, pruning emptied name and service buckets
    pub fn delete(&mut self, records: &[Arc<MetricRecord>]) {
        for record in records {
            let service_name = record.service_name();
            let Some(by_name) = self.metrics_by_service.get_mut(service_name) else {
                continue;
            };
            if let Some(metrics) = by_name.get_mut(record.name()) {
                if let Some(pos) = metrics.iter().position(|m| Arc::ptr_eq(m, record)) {
                    metrics.remove(pos);
                }
                if metrics.is_empty() {
                    by_name.remove(record.name());
                }
            }
            if by_name.is_empty() {
                self.metrics_by_service.remove(service_name);
            }
        }
    }

    pub fn metrics_by_service_and_name(
        &self,
        service_name: &str,
        metric_name: &str,
    ) -> Option<&[Arc<MetricRecord>]> {
        self.metrics_by_service
            .get(service_name)?
            .get(metric_name)
            .map(Vec::as_slice)
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.metrics_by_service.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn metric_names(&self, service_name: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .metrics_by_service
            .get(service_name)
            .map(|by_name| by_name.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.metrics_by_service
            .values()
            .flat_map(|by_name| by_name.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics_by_service.is_empty()
    }

    pub fn flush(&mut self) {
        self.metrics_by_service.clear();
    }
}
