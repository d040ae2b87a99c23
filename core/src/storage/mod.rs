mod log_cache;
mod metric_cache;
mod trace_cache;

pub use log_cache::LogCache;
pub use metric_cache::MetricCache;
pub use trace_cache::{InsertOutcome, TraceCache};
