//! Byte transports a scale session runs over.
//!
//! A session never talks to a serial driver directly. It asks a
//! [`ScaleTransport`] to open an endpoint with the line settings of its
//! framing mode and gets back a [`ScaleLink`], an ordinary async byte stream.
//! Reading the link is the session's subscription to incoming bytes; writing
//! it is how poll bytes and diagnostic commands go out. Dropping the link
//! closes the port.
//!
//! Two transports ship with the crate:
//!
//! - [`SerialPortTransport`]: real serial ports through `tokio-serial`
//!   (feature `instrument_serial`, on by default).
//! - [`MockTransport`]: in-memory links for tests, with failure injection.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockScale, MockTransport};
pub use serial_adapter::{list_ports, PortInfo, SerialPortTransport};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::AppResult;
use crate::framing::LineSettings;

/// An open, bidirectional byte stream to one scale.
pub trait ScaleLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ScaleLink for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens links to scale endpoints.
///
/// Implementations must report a failed open as `ScaleError::Open` carrying
/// the underlying I/O cause, and must not retry on their own.
#[async_trait]
pub trait ScaleTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Opens `endpoint` with the given line settings.
    async fn open(&self, endpoint: &str, line: &LineSettings) -> AppResult<Box<dyn ScaleLink>>;
}
