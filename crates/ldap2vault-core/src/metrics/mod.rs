//! Metrics collection for the LDAP bridge.
//!
//! Provides Prometheus-compatible metrics for operation rates, bind
//! outcomes and connection statistics.

pub mod prometheus;

pub use prometheus::BridgeMetrics;
