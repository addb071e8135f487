//! Time-series input
//!
//! The engine never stores raw samples. Each evaluation fetches them from an
//! injected [`TimeSeriesSource`] and recomputes the buckets from scratch.

mod bucketer;
mod source;

pub use bucketer::TimeSeriesBucketer;
pub use source::{parse_samples, FileSampleSource, InMemorySource};

pub use crate::models::RawSample;

use crate::error::Result;
use crate::models::Metric;
use async_trait::async_trait;

/// Trait for raw sample providers
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Samples for `metric` with `timestamp_ms >= since_ms`, ascending
    async fn fetch_raw_samples(&self, metric: Metric, since_ms: i64) -> Result<Vec<RawSample>>;
}
