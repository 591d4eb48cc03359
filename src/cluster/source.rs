//! Watch subscriptions
//!
//! `RouteSource` is the seam between the watcher state machine and the
//! cluster API. `KubeRouteSource` is the production implementation backed by
//! `kube::runtime::watcher`.

use super::route::{Route, RouteObject, route_api_resource};
use super::RouteEvent;
use crate::config::ClusterConfig;
use crate::error::{AppError, AppResult};
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use thiserror::Error;

/// Error raised by a watch subscription
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("route watch failed: {0}")]
    Watch(#[from] watcher::Error),

    #[error("route watch failed: {0}")]
    Other(String),
}

/// Stream of route events produced by one subscription
pub type RouteEventStream = BoxStream<'static, Result<RouteEvent, WatchError>>;

/// Something that can open a route watch subscription against one cluster
pub trait RouteSource: Send + Sync {
    /// Open a new subscription
    ///
    /// Each call starts from a full list of the current state.
    fn subscribe(&self) -> RouteEventStream;
}

/// Route source backed by the Kubernetes/OpenShift API
pub struct KubeRouteSource {
    api: Api<RouteObject>,
    config: watcher::Config,
}

impl KubeRouteSource {
    /// Create a source watching routes in all namespaces
    pub fn new(client: kube::Client, label_selector: Option<&str>) -> Self {
        let api = Api::all_with(client, &route_api_resource());
        let mut config = watcher::Config::default();
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }
        Self { api, config }
    }
}

impl RouteSource for KubeRouteSource {
    fn subscribe(&self) -> RouteEventStream {
        watcher(self.api.clone(), self.config.clone())
            .map(|event| {
                event
                    .map(|event| match event {
                        watcher::Event::Apply(object) => RouteEvent::Applied(Route::from(&object)),
                        watcher::Event::Delete(object) => {
                            RouteEvent::Deleted(Route::from(&object))
                        }
                        watcher::Event::Init => RouteEvent::RelistStarted,
                        watcher::Event::InitApply(object) => {
                            RouteEvent::Listed(Route::from(&object))
                        }
                        watcher::Event::InitDone => RouteEvent::RelistDone,
                    })
                    .map_err(WatchError::from)
            })
            .boxed()
    }
}

/// Build a cluster client for one configured target
///
/// Returns the client together with the cluster identifier: the authority
/// (`host[:port]`) of the API server URL.
pub async fn connect(target: &ClusterConfig) -> AppResult<(kube::Client, String)> {
    let setup_error = |reason: String| AppError::ClusterSetup {
        target: target.display_name(),
        reason,
    };

    let config = match target.kubeconfig() {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| setup_error(e.to_string()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| setup_error(e.to_string()))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| setup_error(e.to_string()))?,
    };

    let cluster = cluster_id(&config.cluster_url);
    let client = kube::Client::try_from(config).map_err(|e| setup_error(e.to_string()))?;
    Ok((client, cluster))
}

/// Cluster identifier derived from the API server URL
pub fn cluster_id(url: &http::Uri) -> String {
    url.authority()
        .map(|authority| authority.as_str().to_string())
        .unwrap_or_default()
}
