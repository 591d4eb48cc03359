//! Multi-cluster fan-out
//!
//! Owns one `ClusterWatcher` per configured target and merges their
//! snapshots into a single route list.

use super::source::{KubeRouteSource, connect};
use super::{ClusterWatcher, Route, WatcherState};
use crate::config::ClusterConfig;
use crate::error::AppResult;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Watch status of one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub cluster: String,
    pub state: &'static str,
    pub routes: usize,
    pub restarts: u64,
}

/// Anything that can produce the current set of probe-able routes
pub trait RouteLister: Send + Sync {
    /// Routes currently known, already tagged with their cluster
    fn list(&self) -> Vec<Route>;

    /// Per-cluster watch status
    fn cluster_stats(&self) -> Vec<ClusterStats> {
        Vec::new()
    }
}

/// Route watchers for every configured cluster
pub struct MultiWatcher {
    watchers: Vec<Arc<ClusterWatcher>>,
}

impl MultiWatcher {
    pub fn new(watchers: Vec<ClusterWatcher>) -> Self {
        Self {
            watchers: watchers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Connect to every target
    ///
    /// Fails on the first target whose client cannot be built; nothing is
    /// watched until all of them succeed.
    pub async fn connect(targets: &[ClusterConfig]) -> AppResult<Self> {
        let mut watchers = Vec::with_capacity(targets.len());
        for target in targets {
            let (client, cluster) = connect(target).await?;
            let selector = target.label_selector();
            let source = KubeRouteSource::new(client, selector.as_deref());
            tracing::info!(
                cluster = %cluster,
                kubeconfig = %target.display_name(),
                label_selector = selector.as_deref().unwrap_or(""),
                "cluster client ready"
            );
            watchers.push(
                ClusterWatcher::new(cluster, Arc::new(source))
                    .with_namespace_blacklist(target.namespace_blacklist()?),
            );
        }
        Ok(Self::new(watchers))
    }

    /// Number of watched clusters
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Run every cluster watcher until shutdown
    pub async fn watch(&self, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for watcher in &self.watchers {
            let watcher = Arc::clone(watcher);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { watcher.watch(shutdown).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "cluster watcher task failed");
            }
        }
    }
}

impl RouteLister for MultiWatcher {
    fn list(&self) -> Vec<Route> {
        self.watchers.iter().flat_map(|watcher| watcher.list()).collect()
    }

    fn cluster_stats(&self) -> Vec<ClusterStats> {
        self.watchers
            .iter()
            .map(|watcher| ClusterStats {
                cluster: watcher.cluster().to_string(),
                state: watcher.state().as_str(),
                routes: watcher.list().len(),
                restarts: watcher.restarts(),
            })
            .collect()
    }
}

impl ClusterStats {
    /// Whether this cluster currently has a live subscription
    pub fn is_watching(&self) -> bool {
        self.state == WatcherState::Watching.as_str()
    }
}
