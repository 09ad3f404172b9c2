//! One open scale line and the task that owns it.
//!
//! A session task is the single owner of everything scoped to one open port:
//! the link, the poll timer and the [`DecodePipeline`]. It multiplexes three
//! event sources with `tokio::select!`:
//!
//! - control messages from the manager (write, status, stop),
//! - poll ticks, only for poll-based framing modes,
//! - bytes read from the link.
//!
//! Because ticks are handled inside the same loop that closes the link, a
//! poll byte can never be written after the session has been stopped.
//!
//! A read or write failure moves the session to [`SessionState::Closed`] with
//! `last_error` set. The task then stops reading and polling but keeps
//! answering control messages, so the degraded session stays visible in
//! status reports until an explicit stop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::adapters::ScaleLink;
use crate::core::{SessionState, WeightEvent};
use crate::error::{AppResult, ScaleError};
use crate::framing::{BufferLimits, DecimalPolicy, FramingMode, LineSettings, ENQ};
use crate::pipeline::DecodePipeline;

/// Commands written by the diagnostic test sequence, in order.
pub const DIAGNOSTIC_SEQUENCE: [&[u8]; 4] = [&[ENQ], b"Z\r\n", b"T\r\n", b"P\r\n"];

const CONTROL_CHANNEL_CAPACITY: usize = 16;
/// Floor for the poll period; a zero period would panic the interval timer.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Everything a session needs to know before it starts.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub endpoint: String,
    pub mode: FramingMode,
    pub policy: DecimalPolicy,
    pub limits: BufferLimits,
    pub poll_interval: Duration,
    pub poll_byte: u8,
    pub read_buffer_size: usize,
}

/// Counters describing what a session has seen so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    pub bytes_received: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub buffer_trims: u64,
    pub weights_emitted: u64,
    pub polls_sent: u64,
    pub buffered_bytes: usize,
}

/// Snapshot of one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub endpoint: String,
    pub session_id: Uuid,
    pub mode: FramingMode,
    pub line: LineSettings,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Last transport error, set when the session was closed by a failure.
    pub last_error: Option<String>,
    pub diagnostics: SessionDiagnostics,
}

/// Messages accepted by a running session task.
#[derive(Debug)]
pub enum SessionControl {
    /// Write raw bytes to the line.
    Write {
        bytes: Vec<u8>,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Report the current status.
    Status {
        response: oneshot::Sender<SessionStatus>,
    },

    /// Close the line, clear decode state and end the task.
    Stop {
        response: oneshot::Sender<SessionStatus>,
    },
}

impl SessionControl {
    pub fn write(bytes: Vec<u8>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Write { bytes, response: tx }, rx)
    }

    pub fn status() -> (Self, oneshot::Receiver<SessionStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::Status { response: tx }, rx)
    }

    pub fn stop() -> (Self, oneshot::Receiver<SessionStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }
}

/// Owner's handle to a running session task.
///
/// Dropping the handle without calling [`stop`](Self::stop) still ends the
/// task once every [`SessionWriter`] is gone, closing the port.
#[derive(Debug)]
pub struct SessionHandle {
    endpoint: String,
    id: Uuid,
    control_tx: mpsc::Sender<SessionControl>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawns the session task over an already opened link.
    pub fn spawn(
        config: SessionConfig,
        link: Box<dyn ScaleLink>,
        events: broadcast::Sender<WeightEvent>,
    ) -> Self {
        let id = Uuid::new_v4();
        let endpoint = config.endpoint.clone();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let span = info_span!("scale_session", endpoint = %endpoint, session = %id);

        let session = ScaleSession {
            pipeline: DecodePipeline::new(config.mode, config.policy, config.limits),
            config,
            id,
            link,
            events,
            control_rx,
            state: SessionState::Active,
            started_at: Utc::now(),
            last_error: None,
            polls_sent: 0,
        };
        let task = tokio::spawn(session.run().instrument(span));

        Self {
            endpoint,
            id,
            control_tx,
            task,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn status(&self) -> AppResult<SessionStatus> {
        let (cmd, rx) = SessionControl::status();
        self.control_tx
            .send(cmd)
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// A cloneable writer that outlives borrows of this handle.
    pub fn writer(&self) -> SessionWriter {
        SessionWriter {
            endpoint: self.endpoint.clone(),
            control_tx: self.control_tx.clone(),
        }
    }

    /// Stops the session and waits until its task, and so the port, is gone.
    pub async fn stop(self) -> AppResult<SessionStatus> {
        let (cmd, rx) = SessionControl::stop();
        let acknowledged = match self.control_tx.send(cmd).await {
            Ok(()) => rx.await.ok(),
            Err(_) => None,
        };
        drop(self.control_tx);

        if let Err(e) = self.task.await {
            warn!(endpoint = %self.endpoint, error = %e, "Session task ended abnormally");
        }
        acknowledged.ok_or(ScaleError::SessionUnavailable(self.endpoint))
    }

    fn unavailable(&self) -> ScaleError {
        ScaleError::SessionUnavailable(self.endpoint.clone())
    }
}

/// Sends writes to a session from outside its owner.
#[derive(Clone, Debug)]
pub struct SessionWriter {
    endpoint: String,
    control_tx: mpsc::Sender<SessionControl>,
}

impl SessionWriter {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Writes `bytes` and waits for the session to confirm.
    ///
    /// Fails with `SessionUnavailable` once the session has been stopped.
    pub async fn write(&self, bytes: Vec<u8>) -> AppResult<()> {
        let (cmd, rx) = SessionControl::write(bytes);
        self.control_tx
            .send(cmd)
            .await
            .map_err(|_| ScaleError::SessionUnavailable(self.endpoint.clone()))?;
        rx.await
            .map_err(|_| ScaleError::SessionUnavailable(self.endpoint.clone()))?
    }
}

struct ScaleSession {
    config: SessionConfig,
    id: Uuid,
    link: Box<dyn ScaleLink>,
    pipeline: DecodePipeline,
    events: broadcast::Sender<WeightEvent>,
    control_rx: mpsc::Receiver<SessionControl>,
    state: SessionState,
    started_at: DateTime<Utc>,
    last_error: Option<String>,
    polls_sent: u64,
}

impl ScaleSession {
    async fn run(mut self) {
        let mode = self.config.mode;
        info!(mode = %mode, line = %mode.line_settings(), "Scale session active");

        let mut read_buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let mut poll = mode.is_polled().then(|| {
            let mut interval = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let active = self.state == SessionState::Active;
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(SessionControl::Stop { response }) => {
                        self.close().await;
                        let _ = response.send(self.status());
                        break;
                    }
                    Some(SessionControl::Write { bytes, response }) => {
                        let result = self.write(&bytes).await;
                        let _ = response.send(result);
                    }
                    Some(SessionControl::Status { response }) => {
                        let _ = response.send(self.status());
                    }
                    None => {
                        debug!("Control channel closed");
                        self.close().await;
                        break;
                    }
                },

                _ = next_tick(&mut poll), if active => {
                    let poll_byte = self.config.poll_byte;
                    if self.write(&[poll_byte]).await.is_ok() {
                        self.polls_sent += 1;
                    }
                }

                result = self.link.read(&mut read_buf), if active => match result {
                    Ok(0) => self.fail(&io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "port closed by the device",
                    )),
                    Ok(n) => self.publish(&read_buf[..n]),
                    Err(e) => self.fail(&e),
                },
            }
        }

        info!("Scale session closed");
    }

    fn publish(&mut self, bytes: &[u8]) {
        trace!(len = bytes.len(), "Received bytes");
        for emission in self.pipeline.consume(bytes) {
            debug!(weight = %emission.weight, "Weight changed");
            let event = WeightEvent::new(&self.config.endpoint, emission.weight, emission.timestamp);
            if self.events.send(event).is_err() {
                trace!("No weight subscribers");
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        if self.state != SessionState::Active {
            return Err(ScaleError::NotConnected);
        }
        match write_link(self.link.as_mut(), bytes).await {
            Ok(()) => Ok(()),
            Err(source) => {
                self.fail(&source);
                Err(ScaleError::Transport {
                    endpoint: self.config.endpoint.clone(),
                    source,
                })
            }
        }
    }

    fn fail(&mut self, err: &io::Error) {
        error!(error = %err, "Transport error; session stays closed until restarted");
        self.state = SessionState::Closed;
        self.last_error = Some(err.to_string());
    }

    async fn close(&mut self) {
        if let Err(e) = self.link.shutdown().await {
            debug!(error = %e, "Ignoring error while closing port");
        }
        self.pipeline.reset();
        self.state = SessionState::Closed;
    }

    fn status(&self) -> SessionStatus {
        let stats = self.pipeline.stats();
        SessionStatus {
            endpoint: self.config.endpoint.clone(),
            session_id: self.id,
            mode: self.config.mode,
            line: self.config.mode.line_settings(),
            state: self.state,
            started_at: self.started_at,
            last_error: self.last_error.clone(),
            diagnostics: SessionDiagnostics {
                bytes_received: stats.bytes,
                frames_decoded: stats.decoded,
                frames_dropped: stats.dropped,
                buffer_trims: stats.trims,
                weights_emitted: stats.emitted,
                polls_sent: self.polls_sent,
                buffered_bytes: self.pipeline.buffered_len(),
            },
        }
    }
}

async fn write_link(link: &mut dyn ScaleLink, bytes: &[u8]) -> io::Result<()> {
    link.write_all(bytes).await?;
    link.flush().await
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
