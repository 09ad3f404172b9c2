//! Message types for actor-based communication
//!
//! Commands sent from [`ScaleManager`](crate::app_actor::ScaleManager) handles
//! to the [`ScaleManagerActor`](crate::app_actor::ScaleManagerActor). Every
//! command carries a oneshot sender for its reply, so callers await the
//! outcome without sharing any state with the actor.

use tokio::sync::oneshot;

use crate::error::AppResult;
use crate::framing::DecimalPolicy;
use crate::session::SessionStatus;

/// Commands that can be sent to the ScaleManagerActor
#[derive(Debug)]
pub enum ScaleCommand {
    /// Open a session, tearing down any existing one on the same endpoint.
    ///
    /// `endpoint: None` means the configured port. `policy: None` means the
    /// policy derived from configuration.
    Start {
        endpoint: Option<String>,
        policy: Option<DecimalPolicy>,
        response: oneshot::Sender<AppResult<SessionStatus>>,
    },

    /// Stop one session, or every session when `endpoint` is `None`.
    Stop {
        endpoint: Option<String>,
        response: oneshot::Sender<Vec<SessionStatus>>,
    },

    /// Schedule the diagnostic command sequence on every active session.
    RunDiagnostics {
        response: oneshot::Sender<AppResult<Vec<String>>>,
    },

    /// Get the status of every registered session
    GetStatus {
        response: oneshot::Sender<Vec<SessionStatus>>,
    },

    /// Stop everything and end the actor
    Shutdown { response: oneshot::Sender<()> },
}

impl ScaleCommand {
    /// Helper to create a Start command
    pub fn start(
        endpoint: Option<String>,
        policy: Option<DecimalPolicy>,
    ) -> (Self, oneshot::Receiver<AppResult<SessionStatus>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Start {
                endpoint,
                policy,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Stop command
    pub fn stop(endpoint: Option<String>) -> (Self, oneshot::Receiver<Vec<SessionStatus>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { endpoint, response: tx }, rx)
    }

    /// Helper to create a RunDiagnostics command
    pub fn run_diagnostics() -> (Self, oneshot::Receiver<AppResult<Vec<String>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::RunDiagnostics { response: tx }, rx)
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<Vec<SessionStatus>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
