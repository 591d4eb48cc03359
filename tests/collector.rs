//! Integration tests for collection: routes in, Prometheus text out

use route_monitor::cluster::{Route, RouteLister};
use route_monitor::collector::Collector;
use route_monitor::metrics::DescriptorSet;
use route_monitor::probe::Prober;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticRoutes(Vec<Route>);

impl RouteLister for StaticRoutes {
    fn list(&self) -> Vec<Route> {
        self.0.clone()
    }
}

fn route(name: &str, host: &str) -> Route {
    Route {
        cluster: "c1".to_string(),
        namespace: "prod".to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        host: host.to_string(),
        ..Default::default()
    }
}

fn collector(routes: Vec<Route>) -> Collector {
    Collector::new(
        Arc::new(StaticRoutes(routes)),
        Prober::new().unwrap(),
        Arc::new(DescriptorSet::route_health().unwrap()),
    )
    .with_probe_timeout(Duration::from_secs(2))
}

fn sample_lines<'a>(output: &'a str, metric: &str) -> Vec<&'a str> {
    output
        .lines()
        .filter(|line| line.starts_with(&format!("{metric}{{")))
        .collect()
}

#[tokio::test]
async fn test_every_probed_route_gets_every_metric() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    let host = server.address().to_string();

    let mut acme = route("acme", &host);
    acme.path = "/.well-known/acme-challenge/token".to_string();
    let output = collector(vec![route("web", &host), route("api", &host), acme])
        .gather()
        .await
        .unwrap();

    for metric in [
        "ormon_resolved_seconds",
        "ormon_connected_seconds",
        "ormon_wrote_request_seconds",
        "ormon_read_first_byte_seconds",
        "ormon_read_body_seconds",
        "ormon_ssl_expires_seconds",
        "ormon_redirect_count",
        "ormon_statuscode",
        "ormon_body_bytes",
        "ormon_invalid_route_error",
        "ormon_invalid_request_error",
        "ormon_connection_error",
        "ormon_body_download_error",
        "ormon_invalid_statuscode_error",
        "ormon_invalid_body_regex_error",
        "ormon_invalid_body_error",
    ] {
        let lines = sample_lines(&output, metric);
        assert_eq!(lines.len(), 2, "{metric} should have one sample per probed route");
        assert!(lines.iter().all(|line| !line.contains("name=\"acme\"")));
    }

    let status = sample_lines(&output, "ormon_statuscode");
    assert!(status.iter().all(|line| line.ends_with(" 200")));
    assert!(
        status
            .iter()
            .any(|line| line.contains(&format!("host=\"{host}\"")) && line.contains("name=\"web\""))
    );
}

#[tokio::test]
async fn test_failing_route_does_not_affect_others() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = listener.local_addr().unwrap().to_string();
    drop(listener);

    let measurements = collector(vec![
        route("up", &server.address().to_string()),
        route("down", &closed),
    ])
    .probe_all()
    .await;

    assert_eq!(measurements.len(), 2);
    let up = measurements.iter().find(|m| m.spec.name == "up").unwrap();
    let down = measurements.iter().find(|m| m.spec.name == "down").unwrap();
    assert!(!up.errors.connection);
    assert!(down.errors.connection);
}

#[tokio::test]
async fn test_probes_run_concurrently() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let host = server.address().to_string();
    let routes = (0..5).map(|i| route(&format!("svc-{i}"), &host)).collect();

    let started = std::time::Instant::now();
    let measurements = collector(routes).probe_all().await;

    assert_eq!(measurements.len(), 5);
    assert!(
        started.elapsed() < Duration::from_millis(2000),
        "five 500ms probes should overlap, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_collection_is_repeatable() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let collector = collector(vec![route("web", &server.address().to_string())]);

    let first = collector.gather().await.unwrap();
    let second = collector.gather().await.unwrap();
    assert_eq!(
        sample_lines(&first, "ormon_statuscode"),
        sample_lines(&second, "ormon_statuscode")
    );
}
