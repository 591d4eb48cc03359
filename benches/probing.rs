//! Probe pipeline benchmarks
//!
//! Measures the non-I/O parts of a collection: probe spec derivation per
//! route and descriptor evaluation plus text encoding per scrape.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use route_monitor::cluster::Route;
use route_monitor::metrics::{DescriptorSet, encode};
use route_monitor::probe::{Measurement, ProbeSpec};
use std::hint::black_box;
use std::time::{Duration, SystemTime};

fn route(index: usize) -> Route {
    Route {
        cluster: "api.c1.example.com:6443".to_string(),
        namespace: format!("team-{}", index % 20),
        name: format!("svc-{index}"),
        uid: format!("0000-{index:08}"),
        host: format!("svc-{index}.apps.c1.example.com"),
        path: "/".to_string(),
        tls: index % 2 == 0,
        annotations: [
            ("thobits.com/ormon-method".to_string(), "get".to_string()),
            (
                "thobits.com/ormon-valid-statuscodes".to_string(),
                "200,301,302".to_string(),
            ),
            ("thobits.com/ormon-body-regex".to_string(), "ok".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

fn measurement(index: usize) -> Measurement {
    let mut m = Measurement::new(ProbeSpec::from_route(&route(index)), SystemTime::now());
    m.resolved = Duration::from_micros(300);
    m.connected = Duration::from_millis(2);
    m.wrote_request = Duration::from_millis(3);
    m.read_first_byte = Duration::from_millis(25);
    m.read_body = Duration::from_millis(27);
    m.status_code = Some(200);
    m.size = 1024;
    m
}

/// Spec derivation happens once per route per scrape
fn bench_spec_derivation(c: &mut Criterion) {
    let route = route(1);
    c.bench_function("probe_spec_from_route", |b| {
        b.iter(|| ProbeSpec::from_route(black_box(&route)))
    });
}

/// Descriptor evaluation and encoding for growing route counts
fn bench_encoding(c: &mut Criterion) {
    let descriptors = DescriptorSet::route_health().expect("descriptors should build");
    let mut group = c.benchmark_group("encode_measurements");

    for routes in [10usize, 100, 1000] {
        let measurements: Vec<Measurement> = (0..routes).map(measurement).collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(routes),
            &measurements,
            |b, measurements| {
                b.iter(|| {
                    let registry = descriptors
                        .registry(black_box(measurements))
                        .expect("registry should build");
                    encode(&registry).expect("encoding should succeed")
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spec_derivation, bench_encoding);
criterion_main!(benches);
