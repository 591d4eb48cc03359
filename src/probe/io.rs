//! Instrumented transport
//!
//! `TimedStream` wraps the connection handed to hyper and records when the
//! request finished writing and when the first response byte arrived.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;

/// Probe phases recorded by the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolved,
    Connected,
    WroteRequest,
    FirstByte,
}

impl Phase {
    fn index(self) -> usize {
        match self {
            Phase::Resolved => 0,
            Phase::Connected => 1,
            Phase::WroteRequest => 2,
            Phase::FirstByte => 3,
        }
    }
}

#[derive(Debug)]
struct ClockInner {
    start: Instant,
    marks: [AtomicU64; 4],
}

/// Shared phase clock of one probe
///
/// Every mark is the elapsed time since the clock started. Across redirect
/// hops the last mark of a phase wins.
#[derive(Debug, Clone)]
pub struct PhaseClock {
    inner: Arc<ClockInner>,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                start: Instant::now(),
                marks: Default::default(),
            }),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.start.elapsed()
    }

    pub fn mark(&self, phase: Phase) {
        let nanos = u64::try_from(self.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.inner.marks[phase.index()].store(nanos, Ordering::Relaxed);
    }

    /// Recorded elapsed time of a phase, zero if never reached
    pub fn get(&self, phase: Phase) -> Duration {
        Duration::from_nanos(self.inner.marks[phase.index()].load(Ordering::Relaxed))
    }
}

/// Plain or TLS client connection
pub enum MaybeTls {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTls {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTls::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTls {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTls::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTls::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTls::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTls::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Stream wrapper marking request-written and first-byte phases
pub struct TimedStream<S> {
    inner: S,
    clock: PhaseClock,
    first_byte_seen: bool,
}

impl<S> TimedStream<S> {
    pub fn new(inner: S, clock: PhaseClock) -> Self {
        Self {
            inner,
            clock,
            first_byte_seen: false,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        let read_bytes = buf.filled().len() > before;
        if matches!(poll, Poll::Ready(Ok(()))) && read_bytes && !this.first_byte_seen {
            this.first_byte_seen = true;
            this.clock.mark(Phase::FirstByte);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        // Writes after the response started belong to no request phase
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) && !this.first_byte_seen {
            this.clock.mark(Phase::WroteRequest);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
