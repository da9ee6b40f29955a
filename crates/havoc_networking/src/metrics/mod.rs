//! # Network Metrics
//!
//! Passive traffic observation: counters increment on every successful
//! send and every successfully parsed inbound envelope, nothing else.
//! No side effects on game state.

use std::time::Duration;

/// Smoothing factor for the decaying latency estimate: each new sample
/// moves the estimate a tenth of the way.
const LATENCY_ALPHA: f64 = 0.1;

/// Point-in-time view of the session's traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetworkMetrics {
    /// Envelopes successfully handed to the transport.
    pub messages_sent: u64,
    /// Envelopes successfully parsed from inbound bytes.
    pub messages_received: u64,
    /// Bytes of the frames behind `messages_sent`.
    pub bytes_sent: u64,
    /// Bytes of the frames behind `messages_received`.
    pub bytes_received: u64,
    /// Exponentially decayed round-trip estimate, milliseconds. Zero
    /// until the first round-trip-able exchange completes.
    pub latency_ms: f64,
    /// Wall-clock cost of the most recent synchronization tick,
    /// milliseconds.
    pub update_time_ms: f64,
}

/// Accumulates [`NetworkMetrics`] for one session.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    current: NetworkMetrics,
}

impl MetricsCollector {
    /// Creates a collector with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one successful outbound frame.
    pub fn on_sent(&mut self, bytes: usize) {
        self.current.messages_sent += 1;
        self.current.bytes_sent += bytes as u64;
    }

    /// Records one successfully parsed inbound frame.
    pub fn on_received(&mut self, bytes: usize) {
        self.current.messages_received += 1;
        self.current.bytes_received += bytes as u64;
    }

    /// Folds one round-trip sample into the decaying latency estimate.
    pub fn record_latency(&mut self, round_trip: Duration) {
        let sample_ms = round_trip.as_secs_f64() * 1000.0;
        if self.current.latency_ms == 0.0 {
            self.current.latency_ms = sample_ms;
        } else {
            self.current.latency_ms =
                self.current.latency_ms * (1.0 - LATENCY_ALPHA) + sample_ms * LATENCY_ALPHA;
        }
    }

    /// Records the processing cost of one synchronization tick.
    pub fn record_update_time(&mut self, elapsed: Duration) {
        self.current.update_time_ms = elapsed.as_secs_f64() * 1000.0;
    }

    /// Current counter values.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> NetworkMetrics {
        self.current
    }
}
