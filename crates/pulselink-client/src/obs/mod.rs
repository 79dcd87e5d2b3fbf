//! Lightweight in-process metrics (dependency-free).
//!
//! Counters and histograms are stored as atomics behind `DashMap` label
//! sets and rendered as Prometheus text on demand.

pub mod metrics;

pub use metrics::{ClientMetrics, CounterVec, HistogramVec};
