//! Prometheus metric descriptors for route probes
//!
//! Every exported per-route metric is a `MetricDescriptor`: a name, help
//! text, label names and a closure extracting the sample value from a
//! `Measurement`. The table is built once at startup and shared by
//! reference with the collector.
//!
//! Samples are rebuilt from scratch on every collection into a fresh
//! registry, so a route that disappears or is skipped leaves no stale series
//! behind.

use crate::probe::Measurement;
use prometheus::core::Desc;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

/// Prefix of every exported metric
pub const NAMESPACE: &str = "ormon";

/// Labels identifying the probed route, in exposition order
pub const ROUTE_LABELS: [&str; 7] = ["host", "path", "ssl", "cluster", "uid", "namespace", "name"];

/// Value extracted from one measurement, plus values for descriptor-specific labels
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub extra_labels: Vec<String>,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            extra_labels: Vec::new(),
        }
    }

    fn flag(set: bool) -> Self {
        Self::new(if set { 1.0 } else { 0.0 })
    }
}

pub type Extractor = Box<dyn Fn(&Measurement) -> Sample + Send + Sync>;

/// One exported metric
pub struct MetricDescriptor {
    name: String,
    help: String,
    labels: Vec<String>,
    extract: Extractor,
}

impl MetricDescriptor {
    /// Describe a metric labeled by the route labels
    pub fn new(
        name: &str,
        help: &str,
        extract: impl Fn(&Measurement) -> Sample + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            labels: ROUTE_LABELS.iter().map(|label| label.to_string()).collect(),
            extract: Box::new(extract),
        }
    }

    /// Append descriptor-specific label names after the route labels
    pub fn with_extra_labels(mut self, labels: &[&str]) -> Self {
        self.labels.extend(labels.iter().map(|label| label.to_string()));
        self
    }

    /// Fully qualified metric name
    pub fn fq_name(&self) -> String {
        format!("{NAMESPACE}_{}", self.name)
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Evaluate the descriptor: label values in declaration order and the sample value
    pub fn evaluate(&self, m: &Measurement) -> (Vec<String>, f64) {
        let sample = (self.extract)(m);
        let mut values = route_label_values(m);
        values.extend(sample.extra_labels);
        (values, sample.value)
    }
}

fn route_label_values(m: &Measurement) -> Vec<String> {
    vec![
        m.spec.host.clone(),
        m.spec.path.clone(),
        m.spec.ssl.to_string(),
        m.spec.cluster.clone(),
        m.spec.uid.clone(),
        m.spec.namespace.clone(),
        m.spec.name.clone(),
    ]
}

/// Immutable descriptor table keyed by metric name
pub struct DescriptorSet {
    descriptors: BTreeMap<String, MetricDescriptor>,
}

impl DescriptorSet {
    /// Build a descriptor table
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid metric or label name, or a name used twice.
    pub fn new(descriptors: Vec<MetricDescriptor>) -> Result<Self, prometheus::Error> {
        let mut table = BTreeMap::new();
        for descriptor in descriptors {
            Desc::new(
                descriptor.fq_name(),
                descriptor.help.clone(),
                descriptor.labels.clone(),
                HashMap::new(),
            )?;
            let name = descriptor.fq_name();
            if table.insert(name.clone(), descriptor).is_some() {
                return Err(prometheus::Error::Msg(format!(
                    "metric {name} is described twice"
                )));
            }
        }
        Ok(Self { descriptors: table })
    }

    /// The per-route health metrics
    pub fn route_health() -> Result<Self, prometheus::Error> {
        Self::new(vec![
            MetricDescriptor::new("resolved_seconds", "time to resolve hostname", |m| {
                Sample::new(m.resolved.as_secs_f64())
            }),
            MetricDescriptor::new("connected_seconds", "time to open the connection", |m| {
                Sample::new(m.connected.as_secs_f64())
            }),
            MetricDescriptor::new(
                "wrote_request_seconds",
                "time until the full request was sent",
                |m| Sample::new(m.wrote_request.as_secs_f64()),
            ),
            MetricDescriptor::new(
                "read_first_byte_seconds",
                "time until first byte was read",
                |m| Sample::new(m.read_first_byte.as_secs_f64()),
            ),
            MetricDescriptor::new("read_body_seconds", "time until full body was read", |m| {
                Sample::new(m.read_body.as_secs_f64())
            }),
            MetricDescriptor::new(
                "ssl_expires_seconds",
                "seconds until the ssl certificate expires, -1 without certificate",
                |m| Sample::new(m.ssl_expires_seconds(SystemTime::now())),
            ),
            MetricDescriptor::new("redirect_count", "number of http redirects", |m| {
                Sample::new(f64::from(m.redirect_count))
            }),
            MetricDescriptor::new(
                "statuscode",
                "final http status code, 0 without response",
                |m| Sample::new(f64::from(m.status_code.unwrap_or(0))),
            ),
            MetricDescriptor::new("body_bytes", "downloaded body size in bytes", |m| {
                Sample::new(m.size as f64)
            }),
            MetricDescriptor::new("invalid_route_error", "route declares no host", |m| {
                Sample::flag(m.errors.invalid_route)
            }),
            MetricDescriptor::new("invalid_request_error", "errors during request", |m| {
                Sample::flag(m.errors.invalid_request)
            }),
            MetricDescriptor::new("connection_error", "errors during connection opening", |m| {
                Sample::flag(m.errors.connection)
            }),
            MetricDescriptor::new("body_download_error", "errors during body download", |m| {
                Sample::flag(m.errors.body_download)
            }),
            MetricDescriptor::new("invalid_statuscode_error", "invalid statuscode", |m| {
                Sample::flag(m.errors.invalid_status_code)
            }),
            MetricDescriptor::new("invalid_body_regex_error", "invalid regex", |m| {
                Sample::flag(m.errors.invalid_body_regex)
            }),
            MetricDescriptor::new("invalid_body_error", "invalid body", |m| {
                Sample::flag(m.errors.invalid_body)
            }),
        ])
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, fq_name: &str) -> Option<&MetricDescriptor> {
        self.descriptors.get(fq_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDescriptor> {
        self.descriptors.values()
    }

    /// Registry holding one sample per (measurement, descriptor)
    ///
    /// A sample whose label values do not fit its descriptor is skipped on its own.
    pub fn registry(&self, measurements: &[Measurement]) -> Result<Registry, prometheus::Error> {
        let registry = Registry::new();
        for descriptor in self.descriptors.values() {
            let labels: Vec<&str> = descriptor.labels.iter().map(String::as_str).collect();
            let gauge = GaugeVec::new(
                Opts::new(descriptor.fq_name(), descriptor.help.clone()),
                &labels,
            )?;

            for m in measurements {
                let (values, value) = descriptor.evaluate(m);
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                match gauge.get_metric_with_label_values(&values) {
                    Ok(sample) => sample.set(value),
                    Err(e) => tracing::debug!(
                        metric = %descriptor.fq_name(),
                        cluster = %m.spec.cluster,
                        host = %m.spec.host,
                        error = %e,
                        "sample skipped"
                    ),
                }
            }

            registry.register(Box::new(gauge))?;
        }
        Ok(registry)
    }
}

/// Encode a registry in the Prometheus text exposition format
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let metric_families = registry.gather();
    let metric_count = metric_families.len();

    tracing::debug!(
        metric_family_count = metric_count,
        "encoding metrics to Prometheus text format"
    );

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .map_err(|e| {
            let metric_names: Vec<_> = metric_families.iter().map(|mf| mf.name()).collect();
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                metric_names = ?metric_names,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "failed to encode {metric_count} metric families: {e}"
            ))
        })?;

    String::from_utf8(buffer).map_err(|e| {
        let valid_up_to = e.utf8_error().valid_up_to();
        tracing::error!(
            invalid_byte_index = valid_up_to,
            "Prometheus encoder produced invalid UTF-8"
        );
        prometheus::Error::Msg(format!(
            "failed to convert metrics to UTF-8 at byte {valid_up_to}: {e}"
        ))
    })
}
