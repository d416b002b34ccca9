//! Liveness metrics published after every evaluation pass

use auto_impl::auto_impl;
use std::fmt::Debug;

/// Number of peers currently considered alive
pub const CONNECTED_NODES: &str = "heartbeat_connected_nodes";

/// Number of alive peers holding a validator role
pub const LIVE_VALIDATOR_NODES: &str = "heartbeat_live_validator_nodes";

/// Receiver of the aggregated liveness counters. Calls are fire-and-forget.
#[auto_impl(&, Arc, Box)]
pub trait MetricsSink: Send + Sync + Debug {
    /// Publish the current value of a counter
    fn set_counter(&self, name: &'static str, value: u64);
}

/// Sink that drops every value
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn set_counter(&self, _name: &'static str, _value: u64) {}
}

/// Sink forwarding to the globally installed `metrics` recorder as gauges
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct MetricsRecorderSink;

impl MetricsSink for MetricsRecorderSink {
    fn set_counter(&self, name: &'static str, value: u64) {
        ::metrics::gauge!(name).set(value as f64);
    }
}

/// Counters produced by one evaluation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LivenessCounters {
    /// Peers active after the pass
    pub connected_nodes: u64,
    /// Active peers with a validator role
    pub live_validators: u64,
}

impl LivenessCounters {
    /// Publish both counters to `sink`
    pub fn publish(&self, sink: &dyn MetricsSink) {
        sink.set_counter(LIVE_VALIDATOR_NODES, self.live_validators);
        sink.set_counter(CONNECTED_NODES, self.connected_nodes);
    }
}
