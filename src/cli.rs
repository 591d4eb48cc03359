//! Command-line interface for route-monitor
//!
//! Provides argument parsing and subcommand handling for the route-monitor binary.

use clap::{Parser, Subcommand};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/route-monitor/config.toml";

/// OpenShift route monitor
#[derive(Parser)]
#[command(name = "route-monitor")]
#[command(version)]
#[command(about = "Probes OpenShift routes and exports the results as Prometheus metrics")]
#[command(
    long_about = "route-monitor watches the routes of one or more OpenShift clusters and \
    probes every route on each Prometheus scrape, exporting timings, status codes, body checks \
    and certificate expiry per route."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# route-monitor Configuration
# ===========================
#
# Watches OpenShift routes on one or more clusters and probes each route on
# every Prometheus scrape of /metrics.
#
# Per-route behaviour is controlled with route annotations:
#   thobits.com/ormon-skip               "true" disables probing
#   thobits.com/ormon-method             request method (default GET)
#   thobits.com/ormon-valid-statuscodes  comma separated list (default 200)
#   thobits.com/ormon-body-regex         pattern the body must match

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# Address serving /metrics and /health (":9142" binds all interfaces)
listen = "0.0.0.0:9142"

# ─────────────────────────────────────────────────────────────────────────────
# CLUSTERS
# ─────────────────────────────────────────────────────────────────────────────
#
# One [[targets]] entry per cluster.
#
# Fields:
#   - kubeconfig: path to a kubeconfig file; omit to use the in-cluster
#     service account or $KUBECONFIG
#   - namespace_blacklist_regex: routes in matching namespaces are ignored
#   - [targets.labels]: only routes carrying all of these labels are watched

[[targets]]
# kubeconfig = "/etc/route-monitor/cluster-a.kubeconfig"
namespace_blacklist_regex = "^(kube|openshift)-.*"

[targets.labels]
# router = "public"

# Add additional clusters:
# [[targets]]
# kubeconfig = "/etc/route-monitor/cluster-b.kubeconfig"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
# RUST_LOG overrides this when set
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["route-monitor", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommand() {
        let cli = Cli::parse_from(["route-monitor", "config"]);
        assert!(matches!(cli.command, Some(Command::Config { output: None })));
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["route-monitor", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_is_valid_config() {
        let config: Config = generate_config_template()
            .parse()
            .expect("template should be a valid configuration");
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.server.socket_addr().unwrap().port(), 9142);
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[server]"));
        assert!(template.contains("[[targets]]"));
        assert!(template.contains("[targets.labels]"));
        assert!(template.contains("[observability]"));
    }
}
