//! Cluster watcher
//!
//! Keeps the route cache of one cluster current. The watch loop is an
//! explicit state machine:
//!
//! ```text
//! Starting ──listed──▶ Watching ──stream ended/failed──▶ Restarting
//!    ▲                        │                                  │
//!    └──────resync due────────┘◀──────────backoff elapsed────────┘
//!
//! any state ──shutdown──▶ Stopped
//! ```
//!
//! Subscriptions are lazy, so a watcher only counts as `Watching` once the
//! API has answered: the first event past the relist marker. Watch failures
//! are never fatal; the loop retries for as long as the process runs.

use super::source::{RouteSource, WatchError};
use super::{Route, RouteCache, RouteEvent};
use futures::StreamExt;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Delay between a failed watch and the next subscription
pub const RESTART_BACKOFF: Duration = Duration::from_secs(10);

/// Interval after which a healthy subscription is replaced by a fresh relist
pub const RESYNC_PERIOD: Duration = Duration::from_secs(600);

/// Lifecycle state of a cluster watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Starting,
    Watching,
    Restarting,
    Stopped,
}

impl WatcherState {
    /// Label used in logs and the health endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherState::Starting => "starting",
            WatcherState::Watching => "watching",
            WatcherState::Restarting => "restarting",
            WatcherState::Stopped => "stopped",
        }
    }
}

/// Why a subscription stopped delivering events
#[derive(Debug)]
enum WatchEnd {
    Closed,
    Failed(WatchError),
}

/// Watches the routes of one cluster
pub struct ClusterWatcher {
    cluster: String,
    source: Arc<dyn RouteSource>,
    cache: RouteCache,
    namespace_blacklist: Option<Regex>,
    backoff: Duration,
    resync_period: Duration,
    state: watch::Sender<WatcherState>,
    restarts: AtomicU64,
}

impl ClusterWatcher {
    /// Create a watcher for `cluster` fed by `source`
    pub fn new(cluster: impl Into<String>, source: Arc<dyn RouteSource>) -> Self {
        let (state, _) = watch::channel(WatcherState::Starting);
        Self {
            cluster: cluster.into(),
            source,
            cache: RouteCache::new(),
            namespace_blacklist: None,
            backoff: RESTART_BACKOFF,
            resync_period: RESYNC_PERIOD,
            state,
            restarts: AtomicU64::new(0),
        }
    }

    /// Exclude routes whose namespace matches `pattern`
    pub fn with_namespace_blacklist(mut self, pattern: Option<Regex>) -> Self {
        self.namespace_blacklist = pattern;
        self
    }

    /// Override the restart backoff
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the resync period
    pub fn with_resync_period(mut self, resync_period: Duration) -> Self {
        self.resync_period = resync_period;
        self
    }

    /// Cluster identifier attached to every listed route
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Receiver observing state transitions
    pub fn state_changes(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Number of times the watch has been restarted after ending or failing
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Snapshot of the watched routes, minus blacklisted namespaces
    pub fn list(&self) -> Vec<Route> {
        self.cache
            .snapshot()
            .into_iter()
            .filter(|route| !self.is_blacklisted(&route.namespace))
            .map(|route| route.with_cluster(&self.cluster))
            .collect()
    }

    fn is_blacklisted(&self, namespace: &str) -> bool {
        self.namespace_blacklist
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(namespace))
    }

    fn set_state(&self, state: WatcherState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                cluster = %self.cluster,
                from = previous.as_str(),
                to = state.as_str(),
                "watcher state changed"
            );
        }
    }

    fn mark_watching(&self) {
        if self.state() != WatcherState::Watching {
            self.set_state(WatcherState::Watching);
            tracing::info!(cluster = %self.cluster, "watching routes");
        }
    }

    /// Run the watch loop until `shutdown` flips to `true` (or its sender is dropped)
    pub async fn watch(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(WatcherState::Starting);
            let mut events = self.source.subscribe();

            let end = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                end = self.consume(&mut events) => end,
                _ = tokio::time::sleep(self.resync_period) => {
                    tracing::debug!(cluster = %self.cluster, "resyncing route watch");
                    continue;
                }
            };
            drop(events);

            self.set_state(WatcherState::Restarting);
            self.restarts.fetch_add(1, Ordering::Relaxed);
            match &end {
                WatchEnd::Closed => tracing::warn!(
                    cluster = %self.cluster,
                    backoff_seconds = self.backoff.as_secs_f64(),
                    "route watch ended, restarting"
                ),
                WatchEnd::Failed(error) => tracing::warn!(
                    cluster = %self.cluster,
                    error = %error,
                    backoff_seconds = self.backoff.as_secs_f64(),
                    "route watch failed, restarting"
                ),
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }

        self.set_state(WatcherState::Stopped);
        tracing::info!(cluster = %self.cluster, "route watcher stopped");
    }

    async fn consume(&self, events: &mut super::source::RouteEventStream) -> WatchEnd {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !matches!(event, RouteEvent::RelistStarted) {
                        self.mark_watching();
                    }
                    self.cache.apply(event);
                }
                Err(error) => return WatchEnd::Failed(error),
            }
        }
        WatchEnd::Closed
    }
}

/// Resolves once shutdown is signalled or the signalling side is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
