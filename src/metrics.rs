use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::time::Duration;

use crate::{ConversionError, ErrorClass};

/// Conversion metrics
///
/// Handles are registered against whatever recorder is installed when the
/// struct is built; without a recorder every call is a no-op.
pub struct Metrics {
    pub conversions: Counter,
    pub conversion_failures: Counter,
    pub conversion_duration: Histogram,
    pub source_bytes: Counter,
    pub output_bytes: Counter,
    pub active_workers: Gauge,
    pub network_errors: Counter,
    pub decode_errors: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            conversions: register_counter!("topng_conversions_total"),
            conversion_failures: register_counter!("topng_conversion_failures_total"),
            conversion_duration: register_histogram!("topng_conversion_duration_seconds"),
            source_bytes: register_counter!("topng_source_bytes_total"),
            output_bytes: register_counter!("topng_output_bytes_total"),
            active_workers: register_gauge!("topng_active_workers"),
            network_errors: register_counter!("topng_network_errors_total"),
            decode_errors: register_counter!("topng_decode_errors_total"),
        }
    }

    pub fn record_conversion(&self, duration: Duration, source_len: usize, output_len: usize) {
        self.conversions.increment(1);
        self.conversion_duration.record(duration.as_secs_f64());
        self.source_bytes.increment(source_len as u64);
        self.output_bytes.increment(output_len as u64);
    }

    pub fn record_failure(&self, duration: Duration, source_len: usize, error: &ConversionError) {
        self.conversion_failures.increment(1);
        self.conversion_duration.record(duration.as_secs_f64());
        self.source_bytes.increment(source_len as u64);

        if error.is_remote() {
            self.network_errors.increment(1);
        } else if error.class() == ErrorClass::Decode {
            self.decode_errors.increment(1);
        }
    }

    pub fn worker_started(&self) {
        self.active_workers.increment(1.0);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.decrement(1.0);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Counters that matter to assertions, readable without a recorder.
    #[derive(Default, Clone)]
    pub(crate) struct Counts {
        pub conversions: Arc<AtomicU64>,
        pub failures: Arc<AtomicU64>,
        pub network_errors: Arc<AtomicU64>,
        pub decode_errors: Arc<AtomicU64>,
    }

    impl Counts {
        pub fn get(counter: &Arc<AtomicU64>) -> u64 {
            counter.load(Ordering::Acquire)
        }
    }

    pub(crate) fn counting() -> (Metrics, Counts) {
        let counts = Counts::default();
        let metrics = Metrics {
            conversions: Counter::from_arc(counts.conversions.clone()),
            conversion_failures: Counter::from_arc(counts.failures.clone()),
            conversion_duration: Histogram::noop(),
            source_bytes: Counter::noop(),
            output_bytes: Counter::noop(),
            active_workers: Gauge::noop(),
            network_errors: Counter::from_arc(counts.network_errors.clone()),
            decode_errors: Counter::from_arc(counts.decode_errors.clone()),
        };
        (metrics, counts)
    }

    #[test]
    fn test_failure_classification() {
        let (metrics, counts) = counting();

        metrics.record_failure(Duration::ZERO, 0, &ConversionError::Network("refused".into()));
        metrics.record_failure(
            Duration::ZERO,
            0,
            &ConversionError::UnexpectedStatus {
                url: "http://images.test/a.jpg".into(),
                code: 502,
            },
        );
        metrics.record_failure(Duration::ZERO, 12, &ConversionError::Decode("bad".into()));
        metrics.record_failure(Duration::ZERO, 0, &ConversionError::Canceled);
        metrics.record_conversion(Duration::ZERO, 10, 20);

        assert_eq!(Counts::get(&counts.failures), 4);
        assert_eq!(Counts::get(&counts.network_errors), 2);
        assert_eq!(Counts::get(&counts.decode_errors), 1);
        assert_eq!(Counts::get(&counts.conversions), 1);
    }
}
