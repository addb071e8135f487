//! One-minute bucketing of raw samples
//!
//! Buckets are calendar-aligned to the minute. The most recent bucket is the
//! one containing `now`; a window of N minutes yields exactly N buckets,
//! oldest first, with empty minutes filled as zero.

use crate::models::{Aggregation, DataPoint, Window, BUCKET_MS};

use super::RawSample;

/// Aggregates raw samples into fixed one-minute buckets
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSeriesBucketer;

impl TimeSeriesBucketer {
    pub fn new() -> Self {
        Self
    }

    /// Start of the oldest bucket covered by `window` at time `now_ms`
    pub fn window_start_ms(window: Window, now_ms: i64) -> i64 {
        let current = now_ms.div_euclid(BUCKET_MS) * BUCKET_MS;
        current - (window.bucket_count() as i64 - 1) * BUCKET_MS
    }

    /// Fold `samples` into `window.bucket_count()` buckets ending at `now_ms`
    ///
    /// Samples outside `[window_start, now_ms]` and non-finite values are
    /// ignored. The output depends only on the arguments.
    pub fn bucket(
        &self,
        window: Window,
        aggregation: Aggregation,
        samples: &[RawSample],
        now_ms: i64,
    ) -> Vec<DataPoint> {
        let count = window.bucket_count();
        let start = Self::window_start_ms(window, now_ms);

        let mut grouped: Vec<Vec<f64>> = vec![Vec::new(); count];
        for sample in samples {
            if sample.timestamp_ms < start || sample.timestamp_ms > now_ms {
                continue;
            }
            if !sample.value.is_finite() {
                continue;
            }
            let idx = ((sample.timestamp_ms - start) / BUCKET_MS) as usize;
            if let Some(bucket) = grouped.get_mut(idx) {
                bucket.push(sample.value);
            }
        }

        grouped
            .into_iter()
            .enumerate()
            .map(|(i, values)| DataPoint {
                bucket_start_ms: start + i as i64 * BUCKET_MS,
                value: aggregate(aggregation, values),
            })
            .collect()
    }
}

fn aggregate(aggregation: Aggregation, mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match aggregation {
        Aggregation::Sum => values.iter().sum(),
        Aggregation::P95 => {
            values.sort_by(|a, b| a.total_cmp(b));
            // Nearest-rank percentile
            let rank = ((0.95 * values.len() as f64).ceil() as usize).max(1);
            values[rank - 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:10:30Z
    const NOW: i64 = 1_704_067_830_000;

    #[test]
    fn test_bucket_count_and_alignment() {
        let points = TimeSeriesBucketer::new().bucket(Window::FiveMinutes, Aggregation::Sum, &[], NOW);

        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p.bucket_start_ms % BUCKET_MS == 0));
        assert!(points.iter().all(|p| p.value == 0.0));
        // Latest bucket contains now
        let last = points.last().unwrap();
        assert!(last.bucket_start_ms <= NOW && NOW < last.bucket_start_ms + BUCKET_MS);
        // Oldest first
        assert!(points.windows(2).all(|w| w[0].bucket_start_ms < w[1].bucket_start_ms));
    }

    #[test]
    fn test_counts_events_per_bucket() {
        let start = TimeSeriesBucketer::window_start_ms(Window::FiveMinutes, NOW);
        let samples = vec![
            RawSample::event(start + 1_000),
            RawSample::event(start + 59_999),
            RawSample::event(start + 60_000),
            RawSample::event(NOW),
            // Outside the window on both sides
            RawSample::event(start - 1),
            RawSample::event(NOW + 1),
        ];

        let points =
            TimeSeriesBucketer::new().bucket(Window::FiveMinutes, Aggregation::Sum, &samples, NOW);
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_p95_aggregation() {
        let start = TimeSeriesBucketer::window_start_ms(Window::OneMinute, NOW);
        let samples: Vec<RawSample> = (1..=20)
            .map(|i| RawSample::new(start + i * 100, i as f64 * 10.0))
            .collect();

        let points =
            TimeSeriesBucketer::new().bucket(Window::OneMinute, Aggregation::P95, &samples, NOW);
        assert_eq!(points.len(), 1);
        // ceil(0.95 * 20) = 19th value
        assert_eq!(points[0].value, 190.0);
    }

    #[test]
    fn test_ignores_non_finite_values() {
        let start = TimeSeriesBucketer::window_start_ms(Window::OneMinute, NOW);
        let samples = vec![
            RawSample::new(start, f64::NAN),
            RawSample::new(start + 1, 3.0),
        ];
        let points =
            TimeSeriesBucketer::new().bucket(Window::OneMinute, Aggregation::Sum, &samples, NOW);
        assert_eq!(points[0].value, 3.0);
    }

    #[test]
    fn test_deterministic_output() {
        let start = TimeSeriesBucketer::window_start_ms(Window::FifteenMinutes, NOW);
        let samples: Vec<RawSample> = (0..500)
            .map(|i| RawSample::new(start + i * 1_777, (i % 7) as f64))
            .collect();
        let bucketer = TimeSeriesBucketer::new();

        let first = bucketer.bucket(Window::FifteenMinutes, Aggregation::Sum, &samples, NOW);
        let second = bucketer.bucket(Window::FifteenMinutes, Aggregation::Sum, &samples, NOW);

        assert_eq!(first.len(), 15);
        assert_eq!(first, second);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.value.to_bits(), b.value.to_bits());
        }
    }

    #[test]
    fn test_now_on_minute_boundary() {
        let now = 1_704_067_800_000; // exactly 00:10:00
        let points = TimeSeriesBucketer::new().bucket(
            Window::FiveMinutes,
            Aggregation::Sum,
            &[RawSample::event(now)],
            now,
        );
        assert_eq!(points.last().unwrap().bucket_start_ms, now);
        assert_eq!(points.last().unwrap().value, 1.0);
    }
}
