//! In-memory scale transport for testing.
//!
//! Every successful open creates a `tokio::io::duplex` pair. The session gets
//! one end as its link; the other end is kept as a [`MockScale`] that a test
//! picks up with [`MockTransport::take_scale`] to play the scale: send frames,
//! read what the session wrote, notice when the port is closed and inject a
//! read fault.
//!
//! Like the hardware mocks it is modelled on, it also provides:
//! - Simulated open latency
//! - Controllable failure injection
//! - Call logging for test verification

use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use super::{ScaleLink, ScaleTransport};
use crate::error::{AppResult, ScaleError};
use crate::framing::LineSettings;

const DUPLEX_CAPACITY: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport for testing sessions without hardware.
///
/// # Example
///
/// ```
/// use scale_reader::adapters::{MockTransport, ScaleTransport};
/// use scale_reader::framing::FramingMode;
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new();
/// let line = FramingMode::DelimitedAscii.line_settings();
/// let _link = transport.open("/dev/ttyUSB0", &line).await.unwrap();
/// assert_eq!(transport.open_count(), 1);
/// assert!(transport.take_scale("/dev/ttyUSB0").is_some());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    latency_ms: Arc<Mutex<u64>>,
    should_fail_next: Arc<AtomicBool>,
    unavailable: Arc<Mutex<HashSet<String>>>,
    opens: Arc<AtomicUsize>,
    call_log: Arc<Mutex<Vec<String>>>,
    scales: Arc<Mutex<Vec<MockScale>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated open latency in milliseconds
    pub fn with_latency(self, ms: u64) -> Self {
        *lock(&self.latency_ms) = ms;
        self
    }

    /// Fail the next open, whatever the endpoint
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every open of `endpoint` fail until [`set_available`](Self::set_available)
    pub fn set_unavailable(&self, endpoint: &str) {
        lock(&self.unavailable).insert(endpoint.to_string());
    }

    pub fn set_available(&self, endpoint: &str) {
        lock(&self.unavailable).remove(endpoint);
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn call_log(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.call_log).clear();
    }

    /// Takes the scale side of the most recent link opened on `endpoint`.
    pub fn take_scale(&self, endpoint: &str) -> Option<MockScale> {
        let mut scales = lock(&self.scales);
        let index = scales.iter().rposition(|s| s.endpoint == endpoint)?;
        Some(scales.remove(index))
    }

    fn log_call(&self, call: String) {
        lock(&self.call_log).push(call);
    }

    fn check_failure(&self, endpoint: &str) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
            || lock(&self.unavailable).contains(endpoint)
    }
}

#[async_trait]
impl ScaleTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, endpoint: &str, line: &LineSettings) -> AppResult<Box<dyn ScaleLink>> {
        let latency = *lock(&self.latency_ms);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.log_call(format!("open {} {}", endpoint, line));

        if self.check_failure(endpoint) {
            return Err(ScaleError::Open {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let (session_end, scale_end) = tokio::io::duplex(DUPLEX_CAPACITY);
        let fault = Arc::new(AtomicBool::new(false));
        lock(&self.scales).push(MockScale {
            endpoint: endpoint.to_string(),
            line: *line,
            stream: scale_end,
            fault: Arc::clone(&fault),
        });
        self.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockLink {
            stream: session_end,
            fault,
        }))
    }
}

/// Session side of a mock link.
struct MockLink {
    stream: DuplexStream,
    fault: Arc<AtomicBool>,
}

impl AsyncRead for MockLink {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled = buf.filled().len();
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if this.fault.load(Ordering::SeqCst) => {
                buf.set_filled(filled);
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "injected transport fault",
                )))
            }
            other => other,
        }
    }
}

impl AsyncWrite for MockLink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Scale side of a mock link.
pub struct MockScale {
    endpoint: String,
    line: LineSettings,
    stream: DuplexStream,
    fault: Arc<AtomicBool>,
}

impl MockScale {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Line settings the session opened the link with.
    pub fn line(&self) -> LineSettings {
        self.line
    }

    /// Sends bytes to the session as if the scale transmitted them.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Reads exactly `n` bytes written by the session.
    pub async fn read_exact_within(&mut self, n: usize, within: Duration) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        match tokio::time::timeout(within, self.stream.read_exact(&mut buf)).await {
            Ok(result) => result.map(|_| buf),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("fewer than {} bytes written within {:?}", n, within),
            )),
        }
    }

    /// Collects everything the session writes during `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<u8> {
        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return collected,
                Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Whether the session closed its end of the link within `within`.
    ///
    /// Pending writes from the session are discarded while waiting.
    pub async fn closed_within(&mut self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Makes the session's next read fail with an I/O error.
    pub async fn inject_read_fault(&mut self) -> io::Result<()> {
        self.fault.store(true, Ordering::SeqCst);
        // Wake a reader parked on the duplex.
        self.send(&[0]).await
    }
}
