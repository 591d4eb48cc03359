//! Health check endpoint
//!
//! Reports the watch state of every cluster. The exporter stays `OK` while
//! watches restart; a restart is recoverable and never fails the process.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::cluster::ClusterStats;
use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "operational" when every cluster has a live watch, otherwise "degraded"
    pub watch_status: &'static str,
    pub clusters: Vec<ClusterStats>,
}

pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let clusters = state.routes().cluster_stats();
    let watch_status = if clusters.iter().all(ClusterStats::is_watching) {
        "operational"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            watch_status,
            clusters,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    fn stats(cluster: &str, state: &'static str) -> ClusterStats {
        ClusterStats {
            cluster: cluster.to_string(),
            state,
            routes: 4,
            restarts: 0,
        }
    }

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = test_support::state(Vec::new(), vec![stats("c1", "watching")]);
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.watch_status, "operational");
        assert_eq!(body.clusters.len(), 1);
        assert_eq!(body.clusters[0].routes, 4);
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_while_restarting() {
        let state = test_support::state(
            Vec::new(),
            vec![stats("c1", "watching"), stats("c2", "restarting")],
        );
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.watch_status, "degraded");
    }

    #[test]
    fn test_health_response_serializes_clusters() {
        let body = HealthResponse {
            status: "OK",
            watch_status: "operational",
            clusters: vec![stats("api.c1:6443", "watching")],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["clusters"][0]["cluster"], "api.c1:6443");
        assert_eq!(json["clusters"][0]["state"], "watching");
    }
}
