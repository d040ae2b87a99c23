use crate::record::SpanRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Ordering applied to the filtered service-span view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    /// View-list order: each trace/service pair where it was first received
    #[default]
    None,
    LatencyDesc,
    LatencyAsc,
}

impl SortType {
    /// `None` compares everything equal so a stable sort keeps input order
    pub fn compare(self, a: &SpanRecord, b: &SpanRecord) -> Ordering {
        match self {
            SortType::None => Ordering::Equal,
            SortType::LatencyDesc => b.latency().cmp(&a.latency()),
            SortType::LatencyAsc => a.latency().cmp(&b.latency()),
        }
    }

    /// Cycles None -> LatencyDesc -> LatencyAsc -> None
    pub fn next(self) -> Self {
        match self {
            SortType::None => SortType::LatencyDesc,
            SortType::LatencyDesc => SortType::LatencyAsc,
            SortType::LatencyAsc => SortType::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortType::None => "none",
            SortType::LatencyDesc => "latency (desc)",
            SortType::LatencyAsc => "latency (asc)",
        }
    }
}

/// Stable sort: equal keys keep their relative order. `None` leaves the
/// slice untouched.
pub fn sort_spans(spans: &mut [Arc<SpanRecord>], sort_type: SortType) {
    if sort_type == SortType::None {
        return;
    }
    spans.sort_by(|a, b| sort_type.compare(a, b));
}
