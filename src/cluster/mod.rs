//! Route discovery
//!
//! Watches OpenShift Routes on one or more clusters and keeps an in-memory
//! view of them per cluster.

pub mod cache;
pub mod multi;
pub mod route;
pub mod source;
pub mod watcher;

pub use cache::{RouteCache, RouteEvent};
pub use multi::{ClusterStats, MultiWatcher, RouteLister};
pub use route::{Route, RouteObject, RouteSpec, RouteTls, route_api_resource};
pub use source::{KubeRouteSource, RouteEventStream, RouteSource, WatchError, cluster_id, connect};
pub use watcher::{ClusterWatcher, RESTART_BACKOFF, RESYNC_PERIOD, WatcherState};
