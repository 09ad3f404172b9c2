//! Actor-based scale session management
//!
//! All session bookkeeping happens in a single async task, the
//! [`ScaleManagerActor`], which processes [`ScaleCommand`]s in order. The
//! endpoint map it owns is the one-session-per-endpoint guard: a start on an
//! endpoint that already has a session stops that session, and waits for its
//! port to close, before the transport is asked to open the endpoint again.
//!
//! [`ScaleManager`] is the cloneable handle callers use. Weight events do not
//! pass through the actor; subscribers receive them directly from the
//! session tasks over a `broadcast` channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::adapters::ScaleTransport;
use crate::config::ScaleSettings;
use crate::core::{DecimalPlaces, SessionState, WeightEvent};
use crate::error::{AppResult, ScaleError};
use crate::framing::DecimalPolicy;
use crate::messages::ScaleCommand;
use crate::session::{
    SessionConfig, SessionHandle, SessionStatus, SessionWriter, DIAGNOSTIC_SEQUENCE,
};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Actor that owns every scale session
pub struct ScaleManagerActor {
    settings: Arc<ScaleSettings>,
    transport: Arc<dyn ScaleTransport>,
    events: broadcast::Sender<WeightEvent>,
    sessions: HashMap<String, SessionHandle>,
}

impl ScaleManagerActor {
    pub fn new(
        settings: Arc<ScaleSettings>,
        transport: Arc<dyn ScaleTransport>,
        events: broadcast::Sender<WeightEvent>,
    ) -> Self {
        Self {
            settings,
            transport,
            events,
            sessions: HashMap::new(),
        }
    }

    /// Runs the actor event loop, processing commands until shutdown
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<ScaleCommand>) {
        info!(transport = self.transport.name(), "ScaleManagerActor started");

        while let Some(command) = command_rx.recv().await {
            match command {
                ScaleCommand::Start {
                    endpoint,
                    policy,
                    response,
                } => {
                    let result = self.start_session(endpoint, policy).await;
                    let _ = response.send(result);
                }

                ScaleCommand::Stop { endpoint, response } => {
                    let stopped = self.stop_sessions(endpoint).await;
                    let _ = response.send(stopped);
                }

                ScaleCommand::RunDiagnostics { response } => {
                    let result = self.run_diagnostics().await;
                    let _ = response.send(result);
                }

                ScaleCommand::GetStatus { response } => {
                    let _ = response.send(self.status().await);
                }

                ScaleCommand::Shutdown { response } => {
                    info!("Shutting down ScaleManagerActor");
                    self.stop_sessions(None).await;
                    let _ = response.send(());
                    return;
                }
            }
        }

        // Every handle was dropped without an explicit shutdown.
        self.stop_sessions(None).await;
        info!("ScaleManagerActor stopped");
    }

    async fn start_session(
        &mut self,
        endpoint: Option<String>,
        policy: Option<DecimalPolicy>,
    ) -> AppResult<SessionStatus> {
        self.settings.validate()?;
        let endpoint = endpoint.unwrap_or_else(|| self.settings.port.clone());
        let policy = match policy {
            Some(policy) => policy,
            None => self.settings.decimal_policy()?,
        };

        if let Some(existing) = self.sessions.remove(&endpoint) {
            info!(endpoint = %endpoint, "Closing existing session before reopening");
            self.stop_handle(existing).await;
        }

        let mode = self.settings.mode;
        let line = mode.line_settings();
        info!(
            endpoint = %endpoint,
            mode = %mode,
            line = %line,
            state = %SessionState::Opening,
            "Opening scale endpoint"
        );

        let link = match self.transport.open(&endpoint, &line).await {
            Ok(link) => link,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "Failed to open scale endpoint");
                return Err(e);
            }
        };

        let config = SessionConfig {
            endpoint: endpoint.clone(),
            mode,
            policy,
            limits: self.settings.buffer,
            poll_interval: self.settings.poll_interval,
            poll_byte: self.settings.poll_byte,
            read_buffer_size: self.settings.read_buffer_size,
        };
        let handle = SessionHandle::spawn(config, link, self.events.clone());
        match handle.status().await {
            Ok(status) => {
                self.sessions.insert(endpoint, handle);
                Ok(status)
            }
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "Scale session ended before reporting status");
                Err(e)
            }
        }
    }

    async fn stop_sessions(&mut self, endpoint: Option<String>) -> Vec<SessionStatus> {
        let targets: Vec<String> = match endpoint {
            Some(endpoint) => vec![endpoint],
            None => self.sessions.keys().cloned().collect(),
        };

        let mut stopped = Vec::new();
        for name in targets {
            match self.sessions.remove(&name) {
                Some(handle) => stopped.extend(self.stop_handle(handle).await),
                None => debug!(endpoint = %name, "No session to stop"),
            }
        }
        stopped.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stopped
    }

    async fn stop_handle(&self, handle: SessionHandle) -> Option<SessionStatus> {
        let endpoint = handle.endpoint().to_string();
        match handle.stop().await {
            Ok(status) => {
                info!(endpoint = %endpoint, "Scale session stopped");
                Some(status)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Scale session did not acknowledge stop");
                None
            }
        }
    }

    async fn run_diagnostics(&self) -> AppResult<Vec<String>> {
        let mut writers = Vec::new();
        for handle in self.sessions.values() {
            match handle.status().await {
                Ok(status) if status.state == SessionState::Active => writers.push(handle.writer()),
                Ok(_) | Err(_) => {}
            }
        }
        if writers.is_empty() {
            return Err(ScaleError::NotConnected);
        }

        let delay = self.settings.test_command_delay;
        let mut endpoints = Vec::with_capacity(writers.len());
        for writer in writers {
            endpoints.push(writer.endpoint().to_string());
            let span = info_span!("diagnostics", endpoint = %writer.endpoint());
            tokio::spawn(send_diagnostic_sequence(writer, delay).instrument(span));
        }
        endpoints.sort();
        Ok(endpoints)
    }

    async fn status(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::with_capacity(self.sessions.len());
        for handle in self.sessions.values() {
            match handle.status().await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(endpoint = %handle.endpoint(), error = %e, "Session status unavailable"),
            }
        }
        statuses.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        statuses
    }
}

/// Writes the diagnostic commands with `delay` between them.
///
/// Stops early if the session is stopped or its line fails.
async fn send_diagnostic_sequence(writer: SessionWriter, delay: Duration) {
    for (i, command) in DIAGNOSTIC_SEQUENCE.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        match writer.write(command.to_vec()).await {
            Ok(()) => debug!(command = ?String::from_utf8_lossy(command), "Sent diagnostic command"),
            Err(e) => {
                warn!(error = %e, "Diagnostic sequence aborted");
                return;
            }
        }
    }
    info!("Diagnostic sequence complete");
}

/// Cloneable handle to the [`ScaleManagerActor`].
#[derive(Clone, Debug)]
pub struct ScaleManager {
    command_tx: mpsc::Sender<ScaleCommand>,
    events: broadcast::Sender<WeightEvent>,
}

impl ScaleManager {
    /// Spawns the actor on the current Tokio runtime.
    pub fn spawn(settings: ScaleSettings, transport: Arc<dyn ScaleTransport>) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let actor = ScaleManagerActor::new(Arc::new(settings), transport, events.clone());
        tokio::spawn(actor.run(command_rx));
        Self { command_tx, events }
    }

    /// Opens a session on `endpoint`, or on the configured port when `None`.
    ///
    /// Any session already running on that endpoint is closed first. A
    /// failed open is returned as `ScaleError::Open` and is not retried.
    pub async fn start(&self, endpoint: Option<&str>) -> AppResult<SessionStatus> {
        let (cmd, rx) = ScaleCommand::start(endpoint.map(str::to_string), None);
        self.request(cmd, rx).await?
    }

    /// Like [`start`](Self::start), but frames without a decimal marker are
    /// read with exactly `places` decimal places.
    pub async fn start_with_forced_decimal_places(
        &self,
        endpoint: Option<&str>,
        places: u8,
    ) -> AppResult<SessionStatus> {
        let places = DecimalPlaces::new(places)?;
        let (cmd, rx) =
            ScaleCommand::start(endpoint.map(str::to_string), Some(DecimalPolicy::Forced(places)));
        self.request(cmd, rx).await?
    }

    /// Stops every session. Calling it with nothing running is a no-op.
    pub async fn stop(&self) -> AppResult<Vec<SessionStatus>> {
        let (cmd, rx) = ScaleCommand::stop(None);
        self.request(cmd, rx).await
    }

    /// Stops the session on `endpoint`, if there is one.
    pub async fn stop_endpoint(&self, endpoint: &str) -> AppResult<Option<SessionStatus>> {
        let (cmd, rx) = ScaleCommand::stop(Some(endpoint.to_string()));
        Ok(self.request(cmd, rx).await?.into_iter().next())
    }

    /// Schedules the diagnostic sequence (ENQ, `Z`, `T`, `P`) on every active
    /// session and returns the endpoints it was scheduled on.
    ///
    /// Returns once the sequence is scheduled, not once it has been sent.
    pub async fn test(&self) -> AppResult<Vec<String>> {
        let (cmd, rx) = ScaleCommand::run_diagnostics();
        self.request(cmd, rx).await?
    }

    /// Status of every registered session, sorted by endpoint.
    pub async fn status(&self) -> AppResult<Vec<SessionStatus>> {
        let (cmd, rx) = ScaleCommand::get_status();
        self.request(cmd, rx).await
    }

    /// Receives every accepted weight from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<WeightEvent> {
        self.events.subscribe()
    }

    /// Stops every session and ends the actor.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (cmd, rx) = ScaleCommand::shutdown();
        self.request(cmd, rx).await
    }

    async fn request<T>(&self, cmd: ScaleCommand, rx: oneshot::Receiver<T>) -> AppResult<T> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| ScaleError::ManagerUnavailable)?;
        rx.await.map_err(|_| ScaleError::ManagerUnavailable)
    }
}
