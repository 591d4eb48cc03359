use super::ProbeSpec;
use std::time::{Duration, SystemTime};

/// Independent failure flags of one probe; several may be set at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeErrors {
    /// The route declares no host
    pub invalid_route: bool,
    /// The request could not be built (bad method or URL)
    pub invalid_request: bool,
    /// Resolve, connect, TLS, request or redirect failure
    pub connection: bool,
    pub body_download: bool,
    pub invalid_status_code: bool,
    /// The body pattern does not compile
    pub invalid_body_regex: bool,
    /// The body does not match the pattern
    pub invalid_body: bool,
}

/// Result of one probe
///
/// Phase durations are measured from `start`. A phase that was never
/// reached stays at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub spec: ProbeSpec,
    pub start: SystemTime,

    pub resolved: Duration,
    pub connected: Duration,
    pub wrote_request: Duration,
    pub read_first_byte: Duration,
    pub read_body: Duration,

    pub redirect_count: u32,
    /// Downloaded body bytes
    pub size: u64,
    /// Final status code, if a response arrived
    pub status_code: Option<u16>,
    /// Earliest certificate expiry of the peer chain, if served over TLS
    pub expires: Option<SystemTime>,

    pub errors: ProbeErrors,
}

impl Measurement {
    /// Fresh measurement with every timing at zero and no flag set
    pub fn new(spec: ProbeSpec, start: SystemTime) -> Self {
        Self {
            spec,
            start,
            resolved: Duration::ZERO,
            connected: Duration::ZERO,
            wrote_request: Duration::ZERO,
            read_first_byte: Duration::ZERO,
            read_body: Duration::ZERO,
            redirect_count: 0,
            size: 0,
            status_code: None,
            expires: None,
            errors: ProbeErrors::default(),
        }
    }

    /// Seconds until the certificate expires, negative once expired, `-1` without TLS
    pub fn ssl_expires_seconds(&self, now: SystemTime) -> f64 {
        match self.expires {
            None => -1.0,
            Some(expires) => match expires.duration_since(now) {
                Ok(remaining) => remaining.as_secs_f64(),
                Err(e) => -e.duration().as_secs_f64(),
            },
        }
    }
}
