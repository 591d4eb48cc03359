//! route-monitor - OpenShift route discovery and HTTP probing exporter
//!
//! Watches routes on one or more clusters, probes every route on each
//! Prometheus scrape and exports timings, status checks and certificate
//! expiry as `ormon_*` gauges.

pub mod cli;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod probe;
pub mod telemetry;
