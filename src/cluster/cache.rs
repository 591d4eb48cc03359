//! Per-cluster route cache
//!
//! Holds the current set of routes of one cluster, keyed by `namespace/name`.
//! Only the owning watcher applies events; everyone else reads snapshots.

use super::Route;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Change notification relayed from a watch subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    /// Route was added or updated
    Applied(Route),
    /// Route was deleted
    Deleted(Route),
    /// A full relist begins; the following `Listed` events form the new state
    RelistStarted,
    /// One route of an in-progress relist
    Listed(Route),
    /// The relist is complete and replaces the cached state
    RelistDone,
}

#[derive(Debug, Default)]
struct CacheState {
    routes: HashMap<String, Route>,
    relist: Option<HashMap<String, Route>>,
}

/// Thread-safe route store for one cluster
#[derive(Debug, Default)]
pub struct RouteCache {
    state: RwLock<CacheState>,
}

impl RouteCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one watch event
    pub fn apply(&self, event: RouteEvent) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            RouteEvent::Applied(route) => {
                tracing::debug!(route = %route.key(), host = %route.host, "route applied");
                state.routes.insert(route.key(), route);
            }
            RouteEvent::Deleted(route) => {
                tracing::debug!(route = %route.key(), "route deleted");
                state.routes.remove(&route.key());
            }
            RouteEvent::RelistStarted => {
                state.relist = Some(HashMap::new());
            }
            RouteEvent::Listed(route) => {
                // A relist item without a preceding start is treated as a plain apply
                match state.relist.as_mut() {
                    Some(pending) => {
                        pending.insert(route.key(), route);
                    }
                    None => {
                        state.routes.insert(route.key(), route);
                    }
                }
            }
            RouteEvent::RelistDone => {
                if let Some(pending) = state.relist.take() {
                    tracing::debug!(routes = pending.len(), "route relist complete");
                    state.routes = pending;
                }
            }
        }
    }

    /// Snapshot of every cached route
    pub fn snapshot(&self) -> Vec<Route> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.routes.values().cloned().collect()
    }

    /// Number of cached routes
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .len()
    }

    /// Whether the cache holds no routes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
