//! On-demand collection
//!
//! Each pull lists the current routes, probes all of them concurrently
//! (one task per route, each under its own deadline) and turns the
//! measurements into samples through the descriptor table.

use crate::cluster::RouteLister;
use crate::metrics::{self, DescriptorSet, NAMESPACE};
use crate::probe::{Measurement, PROBE_TIMEOUT, Prober};
use prometheus::{Gauge, GaugeVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Slack on top of the probe deadline before a probe task is abandoned
const TASK_GRACE: Duration = Duration::from_secs(1);

/// Probes every known route on each pull
#[derive(Clone)]
pub struct Collector {
    routes: Arc<dyn RouteLister>,
    prober: Prober,
    descriptors: Arc<DescriptorSet>,
    probe_timeout: Duration,
}

impl Collector {
    pub fn new(
        routes: Arc<dyn RouteLister>,
        prober: Prober,
        descriptors: Arc<DescriptorSet>,
    ) -> Self {
        Self {
            routes,
            prober,
            descriptors,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    /// Override the per-probe deadline
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Probe every route concurrently and return the non-skipped measurements
    pub async fn probe_all(&self) -> Vec<Measurement> {
        let routes = self.routes.list();
        let mut probes = JoinSet::new();
        for route in routes {
            let prober = self.prober.clone();
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                // The prober honours its own deadline; this only guards against a stuck task
                match tokio::time::timeout(timeout + TASK_GRACE, prober.probe(&route, timeout))
                    .await
                {
                    Ok(measurement) => measurement,
                    Err(_) => {
                        tracing::error!(
                            cluster = %route.cluster,
                            host = %route.host,
                            "probe task overran its deadline"
                        );
                        None
                    }
                }
            });
        }

        let mut measurements = Vec::with_capacity(probes.len());
        while let Some(result) = probes.join_next().await {
            match result {
                Ok(Some(measurement)) => measurements.push(measurement),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "probe task failed"),
            }
        }
        measurements
    }

    /// Run one collection and encode it in the Prometheus text format
    pub async fn gather(&self) -> Result<String, prometheus::Error> {
        let started = Instant::now();
        let measurements = self.probe_all().await;
        let duration = started.elapsed();

        tracing::debug!(
            probes = measurements.len(),
            duration_seconds = duration.as_secs_f64(),
            "collection finished"
        );

        let registry = self.descriptors.registry(&measurements)?;
        self.register_self_metrics(&registry, duration)?;
        metrics::encode(&registry)
    }

    fn register_self_metrics(
        &self,
        registry: &Registry,
        duration: Duration,
    ) -> Result<(), prometheus::Error> {
        let watched_routes = GaugeVec::new(
            Opts::new(
                format!("{NAMESPACE}_watched_routes"),
                "routes currently known per cluster",
            ),
            &["cluster"],
        )?;
        let watch_restarts = IntCounterVec::new(
            Opts::new(
                format!("{NAMESPACE}_watch_restarts_total"),
                "route watch restarts per cluster",
            ),
            &["cluster"],
        )?;
        for stats in self.routes.cluster_stats() {
            watched_routes
                .get_metric_with_label_values(&[stats.cluster.as_str()])?
                .set(stats.routes as f64);
            watch_restarts
                .get_metric_with_label_values(&[stats.cluster.as_str()])?
                .inc_by(stats.restarts);
        }

        let collect_duration = Gauge::new(
            format!("{NAMESPACE}_collect_duration_seconds"),
            "duration of the last probe round",
        )?;
        collect_duration.set(duration.as_secs_f64());

        registry.register(Box::new(watched_routes))?;
        registry.register(Box::new(watch_restarts))?;
        registry.register(Box::new(collect_duration))?;
        Ok(())
    }
}
