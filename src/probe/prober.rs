//! HTTP prober
//!
//! One probe is one request/response cycle against a route, driven over a
//! raw hyper HTTP/1 connection so each phase can be timed. Redirects are
//! followed by hand (up to `MAX_REDIRECTS` hops), certificates are never
//! verified, and everything runs under a single deadline.

use super::io::{MaybeTls, Phase, PhaseClock, TimedStream};
use super::{Measurement, ProbeSpec, tls};
use crate::cluster::Route;
use crate::error::AppResult;
use bytes::{Bytes, BytesMut};
use http::header::{HOST, LOCATION, USER_AGENT};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, ServerName};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsConnector;

/// Redirect hops followed before the probe fails
pub const MAX_REDIRECTS: u32 = 10;

/// Deadline of a single probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(9);

const PROBE_USER_AGENT: &str = concat!("route-monitor/", env!("CARGO_PKG_VERSION"));

/// Why a probe failed
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("route has no host")]
    MissingHost,

    #[error("invalid method '{0}'")]
    InvalidMethod(String),

    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} resolved to no addresses")]
    NoAddresses(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tls server name '{0}'")]
    InvalidServerName(String),

    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("http handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to build request: {0}")]
    BuildRequest(#[from] http::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("too many redirects ({0})")]
    TooManyRedirects(u32),

    #[error("invalid redirect location '{0}'")]
    InvalidLocation(String),

    #[error("failed to read body: {0}")]
    Body(#[source] hyper::Error),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Final response of a request after following redirects
struct Exchange {
    response: Response<Incoming>,
    redirects: u32,
    peer_certificates: Option<Vec<CertificateDer<'static>>>,
}

/// Executes instrumented probes
#[derive(Clone)]
pub struct Prober {
    tls: Arc<rustls::ClientConfig>,
}

impl Prober {
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            tls: tls::client_config()?,
        })
    }

    /// Probe one route
    ///
    /// Returns `None` when the route is skipped; a skipped route yields no
    /// samples at all.
    pub async fn probe(&self, route: &Route, timeout: Duration) -> Option<Measurement> {
        let spec = ProbeSpec::from_route(route);
        if spec.skip {
            tracing::debug!(
                cluster = %spec.cluster,
                host = %spec.host,
                path = %spec.path,
                "route skipped"
            );
            return None;
        }
        let deadline = Instant::now() + timeout;
        Some(self.measure(spec, deadline).await)
    }

    async fn measure(&self, spec: ProbeSpec, deadline: Instant) -> Measurement {
        let mut m = Measurement::new(spec, SystemTime::now());

        if m.spec.host.is_empty() {
            m.errors.invalid_route = true;
            log_failure(&m.spec, &ProbeError::MissingHost);
            return m;
        }

        let (method, uri) = match request_target(&m.spec) {
            Ok(target) => target,
            Err(e) => {
                m.errors.invalid_request = true;
                log_failure(&m.spec, &e);
                return m;
            }
        };

        let clock = PhaseClock::start();
        let exchange = match timeout_at(deadline, self.exchange(method, uri, &clock)).await {
            Ok(Ok(exchange)) => exchange,
            Ok(Err(e)) => {
                m.errors.connection = true;
                log_failure(&m.spec, &e);
                return m;
            }
            Err(_) => {
                m.errors.connection = true;
                log_failure(&m.spec, &ProbeError::DeadlineExceeded);
                return m;
            }
        };

        m.resolved = clock.get(Phase::Resolved);
        m.connected = clock.get(Phase::Connected);
        m.wrote_request = clock.get(Phase::WroteRequest);
        m.read_first_byte = clock.get(Phase::FirstByte);
        m.redirect_count = exchange.redirects;

        let status = exchange.response.status();
        m.status_code = Some(status.as_u16());
        if !m.spec.accepts_status(status.as_str()) {
            m.errors.invalid_status_code = true;
            tracing::error!(
                cluster = %m.spec.cluster,
                host = %m.spec.host,
                status = status.as_u16(),
                valid = %m.spec.valid_status_codes.join(","),
                "status code not accepted"
            );
        }

        let incoming = exchange.response.into_body();
        let mut body = BytesMut::new();
        let download = timeout_at(deadline, read_body(incoming, &mut body)).await;
        m.size = body.len() as u64;
        match download {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                m.errors.body_download = true;
                log_failure(&m.spec, &ProbeError::Body(e));
                return m;
            }
            Err(_) => {
                m.errors.body_download = true;
                log_failure(&m.spec, &ProbeError::DeadlineExceeded);
                return m;
            }
        }
        m.read_body = clock.elapsed();

        let pattern = match regex::bytes::Regex::new(&m.spec.body_regex) {
            Ok(pattern) => pattern,
            Err(e) => {
                m.errors.invalid_body_regex = true;
                log_failure(&m.spec, &e);
                return m;
            }
        };
        if !pattern.is_match(&body) {
            m.errors.invalid_body = true;
            tracing::error!(
                cluster = %m.spec.cluster,
                host = %m.spec.host,
                pattern = %m.spec.body_regex,
                "body does not match pattern"
            );
            return m;
        }

        if let Some(chain) = &exchange.peer_certificates {
            m.expires = tls::chain_expiry(chain);
        }

        m
    }

    /// Send the request, following redirects
    async fn exchange(
        &self,
        mut method: Method,
        mut uri: Uri,
        clock: &PhaseClock,
    ) -> Result<Exchange, ProbeError> {
        let mut redirects = 0;
        loop {
            let (mut sender, peer_certificates) = self.connect(&uri, clock).await?;
            let response = sender
                .send_request(build_request(&method, &uri)?)
                .await
                .map_err(ProbeError::Request)?;

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
            let Some(location) = location.filter(|_| is_redirect(status)) else {
                return Ok(Exchange {
                    response,
                    redirects,
                    peer_certificates,
                });
            };

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(ProbeError::TooManyRedirects(redirects));
            }
            uri = resolve_location(&uri, &location)?;
            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) && method != Method::GET
                && method != Method::HEAD
            {
                method = Method::GET;
            }
            tracing::trace!(%uri, redirects, "following redirect");
        }
    }

    /// Open one HTTP/1 connection to the authority of `uri`
    async fn connect(
        &self,
        uri: &Uri,
        clock: &PhaseClock,
    ) -> Result<(SendRequest<Empty<Bytes>>, Option<Vec<CertificateDer<'static>>>), ProbeError> {
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => return Err(ProbeError::UnsupportedScheme(other.unwrap_or("").to_string())),
        };
        let host = uri
            .host()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
            .filter(|host| !host.is_empty())
            .ok_or(ProbeError::MissingHost)?;
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| ProbeError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();
        clock.mark(Phase::Resolved);

        let tcp = connect_any(host, &addrs).await?;
        let (stream, peer_certificates) = if secure {
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| ProbeError::InvalidServerName(host.to_string()))?;
            let stream = TlsConnector::from(Arc::clone(&self.tls))
                .connect(server_name, tcp)
                .await
                .map_err(ProbeError::Tls)?;
            let chain = stream.get_ref().1.peer_certificates().map(|chain| chain.to_vec());
            (MaybeTls::Tls(Box::new(stream)), chain)
        } else {
            (MaybeTls::Plain(tcp), None)
        };
        clock.mark(Phase::Connected);

        let io = TokioIo::new(TimedStream::new(stream, clock.clone()));
        let (sender, connection) = http1::handshake(io).await.map_err(ProbeError::Handshake)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "probe connection closed with error");
            }
        });

        Ok((sender, peer_certificates))
    }
}

/// Read a response body into `buf`, keeping whatever arrived before a failure
async fn read_body(mut body: Incoming, buf: &mut BytesMut) -> Result<(), hyper::Error> {
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            buf.extend_from_slice(&data);
        }
    }
    Ok(())
}

/// Parse method and URL of a probe spec
fn request_target(spec: &ProbeSpec) -> Result<(Method, Uri), ProbeError> {
    let method = Method::from_bytes(spec.method.as_bytes())
        .map_err(|_| ProbeError::InvalidMethod(spec.method.clone()))?;
    let uri: Uri = spec.url.parse().map_err(|source| ProbeError::InvalidUrl {
        url: spec.url.clone(),
        source,
    })?;
    Ok((method, uri))
}

fn build_request(method: &Method, uri: &Uri) -> Result<Request<Empty<Bytes>>, ProbeError> {
    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
    let request = Request::builder()
        .method(method.clone())
        .uri(target)
        .header(HOST, authority)
        .header(USER_AGENT, PROBE_USER_AGENT)
        .body(Empty::<Bytes>::new())?;
    Ok(request)
}

async fn connect_any(host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, ProbeError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) => last_error = Some(ProbeError::Connect { addr: *addr, source }),
        }
    }
    Err(last_error.unwrap_or_else(|| ProbeError::NoAddresses(host.to_string())))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve a `Location` header against the URL that produced it
///
/// Bytes that may not appear in a URI are percent-encoded first and dot
/// segments are removed from the resolved path. The fragment is dropped.
fn resolve_location(base: &Uri, location: &str) -> Result<Uri, ProbeError> {
    let invalid = || ProbeError::InvalidLocation(location.to_string());
    let escaped = escape_location(location);
    let reference = escaped.split('#').next().unwrap_or_default();
    let base_scheme = base.scheme_str().unwrap_or("http");
    let base_authority = base.authority().map(|a| a.as_str()).unwrap_or_default();

    let (scheme, authority, target) = if let Some((scheme, rest)) = split_scheme(reference) {
        let (authority, target) = split_authority(rest);
        (scheme, authority, target.to_string())
    } else if let Some(rest) = reference.strip_prefix("//") {
        let (authority, target) = split_authority(rest);
        (base_scheme, authority, target.to_string())
    } else if reference.is_empty() || reference.starts_with('?') {
        (base_scheme, base_authority, format!("{}{reference}", base.path()))
    } else if reference.starts_with('/') {
        (base_scheme, base_authority, reference.to_string())
    } else {
        let path = base.path();
        let directory = &path[..path.rfind('/').map_or(0, |i| i + 1)];
        let directory = if directory.is_empty() { "/" } else { directory };
        (base_scheme, base_authority, format!("{directory}{reference}"))
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target.as_str(), None),
    };
    let mut absolute = format!("{scheme}://{authority}{}", remove_dot_segments(path));
    if let Some(query) = query {
        absolute.push('?');
        absolute.push_str(query);
    }

    let uri: Uri = absolute.parse().map_err(|_| invalid())?;
    if uri.authority().is_none() {
        return Err(invalid());
    }
    Ok(uri)
}

/// `scheme://rest` split into its scheme and the remainder
fn split_scheme(reference: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = reference.split_once("://")?;
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

/// Authority and request target of a reference without its scheme
fn split_authority(rest: &str) -> (&str, &str) {
    match rest.find(['/', '?']) {
        Some(end) => rest.split_at(end),
        None => (rest, ""),
    }
}

/// Percent-encode spaces, control characters and non-ASCII bytes
fn escape_location(location: &str) -> Cow<'_, str> {
    let needs_escape = |b: u8| !b.is_ascii_graphic() || b"\"<>\\^`{|}".contains(&b);
    if !location.bytes().any(needs_escape) {
        return Cow::Borrowed(location);
    }
    let mut escaped = String::with_capacity(location.len() * 3);
    for b in location.bytes() {
        if needs_escape(b) {
            escaped.push_str(&format!("%{b:02X}"));
        } else {
            escaped.push(char::from(b));
        }
    }
    Cow::Owned(escaped)
}

/// Remove `.` and `..` segments from an absolute path
fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in path.strip_prefix('/').unwrap_or(path).split('/') {
        trailing_slash = matches!(segment, "." | "..");
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    let mut resolved = format!("/{}", segments.join("/"));
    if trailing_slash && resolved.len() > 1 {
        resolved.push('/');
    }
    resolved
}

fn log_failure(spec: &ProbeSpec, error: &dyn std::fmt::Display) {
    tracing::error!(
        cluster = %spec.cluster,
        host = %spec.host,
        error = %error,
        "probe failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Uri {
        "https://svc.example.com/app/index.html".parse().unwrap()
    }

    #[test]
    fn test_resolve_absolute_location() {
        let uri = resolve_location(&base(), "http://other.example.com/x").unwrap();
        assert_eq!(uri.to_string(), "http://other.example.com/x");
    }

    #[test]
    fn test_resolve_scheme_relative_location() {
        let uri = resolve_location(&base(), "//cdn.example.com/x").unwrap();
        assert_eq!(uri.to_string(), "https://cdn.example.com/x");
    }

    #[test]
    fn test_resolve_root_relative_location() {
        let uri = resolve_location(&base(), "/login?next=%2F").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/login?next=%2F");
    }

    #[test]
    fn test_resolve_path_relative_location() {
        let uri = resolve_location(&base(), "other.html").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/app/other.html");

        let root: Uri = "http://svc.example.com".parse().unwrap();
        let uri = resolve_location(&root, "start").unwrap();
        assert_eq!(uri.to_string(), "http://svc.example.com/start");
    }

    #[test]
    fn test_resolve_removes_dot_segments() {
        let uri = resolve_location(&base(), "../x").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/x");

        let uri = resolve_location(&base(), "/a/./b/../c?q=1").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/a/c?q=1");

        let uri = resolve_location(&base(), "./").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/app/");

        let uri = resolve_location(&base(), "../../../up").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/up");
    }

    #[test]
    fn test_resolve_escapes_spaces_and_non_ascii() {
        let uri = resolve_location(&base(), "/caf\u{e9} menu").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/caf%C3%A9%20menu");

        let uri = resolve_location(&base(), "http://other.example.com/a b").unwrap();
        assert_eq!(uri.to_string(), "http://other.example.com/a%20b");
    }

    #[test]
    fn test_resolve_query_only_and_fragment() {
        let uri = resolve_location(&base(), "?page=2#top").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/app/index.html?page=2");

        let uri = resolve_location(&base(), "/next#section").unwrap();
        assert_eq!(uri.to_string(), "https://svc.example.com/next");
    }

    #[test]
    fn test_remove_dot_segments() {
        assert_eq!(remove_dot_segments(""), "/");
        assert_eq!(remove_dot_segments("/"), "/");
        assert_eq!(remove_dot_segments("/app/"), "/app/");
        assert_eq!(remove_dot_segments("/a/b/.."), "/a/");
        assert_eq!(remove_dot_segments("/../x"), "/x");
    }

    #[test]
    fn test_resolve_garbage_location_fails() {
        assert!(matches!(
            resolve_location(&base(), "http://[::1/x"),
            Err(ProbeError::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_request_target_rejects_bad_method() {
        let spec = ProbeSpec {
            method: "BAD METHOD".to_string(),
            url: "http://svc.example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            request_target(&spec),
            Err(ProbeError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_request_target_rejects_bad_url() {
        let spec = ProbeSpec {
            method: "GET".to_string(),
            url: "http://svc example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            request_target(&spec),
            Err(ProbeError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_build_request_targets_root_with_host_header() {
        let uri: Uri = "http://svc.example.com:8080".parse().unwrap();
        let request = build_request(&Method::HEAD, &uri).unwrap();
        assert_eq!(request.method(), Method::HEAD);
        assert_eq!(request.uri(), "/");
        assert_eq!(request.headers()[HOST], "svc.example.com:8080");
    }

    #[test]
    fn test_redirect_statuses() {
        assert!(is_redirect(StatusCode::FOUND));
        assert!(is_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
        assert!(!is_redirect(StatusCode::OK));
    }
}
