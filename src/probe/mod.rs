//! Route probing
//!
//! Turns a route into a `ProbeSpec`, executes one instrumented HTTP(S)
//! request against it and records the outcome as a `Measurement`.

pub mod io;
pub mod measurement;
pub mod prober;
pub mod spec;
pub mod tls;

pub use measurement::{Measurement, ProbeErrors};
pub use prober::{MAX_REDIRECTS, PROBE_TIMEOUT, ProbeError, Prober};
pub use spec::ProbeSpec;
