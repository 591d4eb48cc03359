//! Prometheus metrics endpoint
//!
//! Every scrape runs a full collection: all known routes are probed and the
//! results are encoded in the Prometheus text format.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::error::AppResult;
use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with one sample per probed route and metric
/// - `500 Internal Server Error` if encoding fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:9142/metrics
/// # HELP ormon_connection_error errors during connection opening
/// # TYPE ormon_connection_error gauge
/// ormon_connection_error{host="svc.example.com",path="",ssl="true",...} 0
/// ```
pub async fn handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let output = state.collector().gather().await.inspect_err(|e| {
        tracing::error!(error = %e, "failed to gather metrics for Prometheus scraping");
    })?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], output))
}
