//! Route entity
//!
//! `Route` is the crate's own view of an OpenShift `route.openshift.io/v1`
//! Route. The cluster object is decoded into `RouteObject` and flattened
//! into `Route` as soon as it leaves the watch stream.

use kube::ResourceExt;
use kube::api::{ApiResource, GroupVersionKind, NotUsed, Object};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A discovered, externally exposed HTTP(S) endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    /// Cluster identifier (API server authority of the watching cluster)
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub host: String,
    pub path: String,
    /// Whether the route terminates TLS
    pub tls: bool,
    pub annotations: BTreeMap<String, String>,
}

impl Route {
    /// Cache key, unique per cluster
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Copy of this route tagged with the given cluster identifier
    pub fn with_cluster(&self, cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            ..self.clone()
        }
    }
}

/// `spec` of an OpenShift Route, reduced to the fields the prober needs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tls: Option<RouteTls>,
}

/// TLS section of a Route spec; its presence marks the route as HTTPS
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    #[serde(default)]
    pub termination: String,
}

/// Route object as served by the cluster API
pub type RouteObject = Object<RouteSpec, NotUsed>;

/// API resource descriptor for `route.openshift.io/v1` Routes
pub fn route_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("route.openshift.io", "v1", "Route"),
        "routes",
    )
}

impl From<&RouteObject> for Route {
    fn from(object: &RouteObject) -> Self {
        Self {
            cluster: String::new(),
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            uid: object.uid().unwrap_or_default(),
            host: object.spec.host.clone(),
            path: object.spec.path.clone(),
            tls: object.spec.tls.is_some(),
            annotations: object.annotations().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_object(json: serde_json::Value) -> RouteObject {
        serde_json::from_value(json).expect("route object should deserialize")
    }

    #[test]
    fn test_route_from_object_copies_metadata_and_spec() {
        let object = route_object(serde_json::json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": {
                "name": "svc",
                "namespace": "prod",
                "uid": "3f2a",
                "annotations": { "thobits.com/ormon-method": "head" }
            },
            "spec": {
                "host": "svc.example.com",
                "path": "/api",
                "tls": { "termination": "edge" }
            }
        }));

        let route = Route::from(&object);
        assert_eq!(route.namespace, "prod");
        assert_eq!(route.name, "svc");
        assert_eq!(route.uid, "3f2a");
        assert_eq!(route.host, "svc.example.com");
        assert_eq!(route.path, "/api");
        assert!(route.tls);
        assert_eq!(
            route.annotations.get("thobits.com/ormon-method").map(String::as_str),
            Some("head")
        );
        assert!(route.cluster.is_empty());
    }

    #[test]
    fn test_route_without_tls_section_is_plain_http() {
        let object = route_object(serde_json::json!({
            "metadata": { "name": "svc", "namespace": "prod" },
            "spec": { "host": "svc.example.com" }
        }));

        let route = Route::from(&object);
        assert!(!route.tls);
        assert!(route.path.is_empty());
        assert!(route.annotations.is_empty());
    }

    #[test]
    fn test_with_cluster_tags_copy() {
        let route = Route {
            namespace: "prod".to_string(),
            name: "svc".to_string(),
            ..Default::default()
        };
        let tagged = route.with_cluster("api.c1:6443");
        assert_eq!(tagged.cluster, "api.c1:6443");
        assert_eq!(tagged.key(), "prod/svc");
        assert!(route.cluster.is_empty());
    }

    #[test]
    fn test_route_api_resource_targets_openshift_routes() {
        let resource = route_api_resource();
        assert_eq!(resource.group, "route.openshift.io");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.kind, "Route");
        assert_eq!(resource.plural, "routes");
        assert_eq!(resource.api_version, "route.openshift.io/v1");
    }
}
