pub mod counter;
pub mod histogram;

/// Latency buckets in seconds, tuned for request round trips to light servers.
pub const DEFAULT_HISTOGRAM_BUCKETS: [f64; 12] = [
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Name of the label every metric carries, holding the emitting module path.
pub const MODULE_LABEL: &str = "module";
