//! Configuration management for route-monitor
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default port for the metrics endpoint
pub const DEFAULT_LISTEN_PORT: u16 = 9142;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub targets: Vec<ClusterConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Metrics exposition server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address, either `host:port` or the port-only form `:port`
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_LISTEN_PORT}")
}

impl ServerConfig {
    /// Resolve the listen address into a socket address
    ///
    /// `":9142"` binds every interface, matching the shorthand most exporters accept.
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        let listen = self.listen.trim();
        let normalized = if listen.starts_with(':') {
            format!("0.0.0.0{listen}")
        } else {
            listen.to_string()
        };
        normalized.parse().map_err(|e| {
            AppError::Config(format!(
                "server.listen '{}' is not a valid socket address: {}",
                self.listen, e
            ))
        })
    }
}

/// One watched cluster
///
/// Fields are private; validation happens in `Config::validate()` and the
/// compiled blacklist is produced by `namespace_blacklist()`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Path to a kubeconfig file. When omitted the client configuration is
    /// inferred (in-cluster service account or `KUBECONFIG`).
    #[serde(default)]
    kubeconfig: Option<PathBuf>,
    /// Routes in namespaces matching this pattern are never probed
    #[serde(default)]
    namespace_blacklist_regex: Option<String>,
    /// Label selector restricting which routes are watched
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl ClusterConfig {
    /// Create a cluster target (used by tests and programmatic setups)
    pub fn new(
        kubeconfig: Option<PathBuf>,
        namespace_blacklist_regex: Option<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kubeconfig,
            namespace_blacklist_regex,
            labels,
        }
    }

    /// Get the kubeconfig path, if any
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    /// Get the configured label map
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Human readable name for logs and errors
    pub fn display_name(&self) -> String {
        match &self.kubeconfig {
            Some(path) => path.display().to_string(),
            None => "<inferred>".to_string(),
        }
    }

    /// Compile the namespace blacklist
    ///
    /// An empty or missing pattern matches nothing, so no namespace is excluded.
    pub fn namespace_blacklist(&self) -> AppResult<Option<Regex>> {
        match self.namespace_blacklist_regex.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(pattern).map(Some).map_err(|e| {
                AppError::Config(format!(
                    "namespace_blacklist_regex '{}' for target {} does not compile: {}",
                    pattern,
                    self.display_name(),
                    e
                ))
            }),
        }
    }

    /// Render the label map as a Kubernetes label selector (`k1=v1,k2=v2`)
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Read, parse and validate are separate phases so each failure keeps its
    /// own context in the returned error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self = toml::from_str(&content).map_err(|source| {
            AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        self.server.socket_addr()?;

        if self.targets.is_empty() {
            return Err(AppError::Config(
                "at least one [[targets]] entry is required".to_string(),
            ));
        }

        for target in &self.targets {
            target.namespace_blacklist()?;

            if let Some((key, _)) = target.labels.iter().find(|(key, _)| key.trim().is_empty()) {
                return Err(AppError::Config(format!(
                    "target {} has an empty label key ('{}')",
                    target.display_name(),
                    key
                )));
            }
        }

        if tracing_subscriber::EnvFilter::try_new(&self.observability.log_level).is_err() {
            return Err(AppError::Config(format!(
                "observability.log_level '{}' is not a valid log level",
                self.observability.log_level
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
