pub mod artifact;
pub mod capture;
pub mod clock;
pub mod effects;
pub mod error;
pub mod metrics;
pub mod preview;
pub mod reclaim;
pub mod recorder;
pub mod session;
pub mod settings;
pub mod state_machine;

use serde::Serialize;
use tokio::sync::mpsc;

use artifact::{Artifact, ArtifactInfo};
use capture::FailureKind;
use state_machine::{Event, State};

pub use error::SessionError;
pub use session::SessionManager;

/// UI state published to the presentation layer.
/// Uses tagged union format: { "status": "idle" } or { "status": "recording", "elapsedSecs": 5 }
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Acquiring,
    /// Permission prompt with a single "try again" action. `message` is
    /// cleared by a reset.
    Denied {
        cause: FailureKind,
        message: Option<String>,
    },
    /// Resources released; acquire again to resume.
    Released,
    Previewing {
        error: Option<String>,
    },
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
        #[serde(rename = "limitSecs")]
        limit_secs: Option<u64>,
    },
    Finalizing {
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
    },
    Recorded {
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
        reviewing: bool,
        artifact: Option<ArtifactInfo>,
    },
}

/// Convert internal State to UiState for the presentation layer
pub fn state_to_ui(state: &State, artifact: Option<&Artifact>) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Acquiring { .. } => UiState::Acquiring,
        State::Denied { failure, dismissed } => UiState::Denied {
            cause: failure.kind,
            message: (!dismissed).then(|| failure.message()),
        },
        State::Released => UiState::Released,
        State::Previewing { error } => UiState::Previewing {
            error: error.clone(),
        },
        State::Arming { .. } => UiState::Arming,
        State::Recording {
            elapsed_secs,
            limit_secs,
            ..
        } => UiState::Recording {
            elapsed_secs: *elapsed_secs,
            limit_secs: *limit_secs,
        },
        State::Finalizing { duration_secs, .. } => UiState::Finalizing {
            duration_secs: *duration_secs,
        },
        State::Recorded {
            session_id,
            duration_secs,
            reviewing,
        } => UiState::Recorded {
            duration_secs: *duration_secs,
            reviewing: *reviewing,
            artifact: artifact
                .filter(|a| a.session_id == *session_id)
                .map(Artifact::info),
        },
    }
}

/// Cloneable sender for session commands. Lets any task drive a session
/// running under `run_session_loop`; the loop ends once the last handle is
/// dropped.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Send an event to the state machine
    pub fn send(&self, event: Event) -> Result<(), SessionError> {
        self.tx.send(event).map_err(|_| SessionError::LoopClosed)
    }

    pub fn acquire(&self) -> Result<(), SessionError> {
        self.send(Event::Acquire)
    }

    pub fn start(&self) -> Result<(), SessionError> {
        self.send(Event::StartRecording)
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.send(Event::StopRecording)
    }

    pub fn view_artifact(&self) -> Result<(), SessionError> {
        self.send(Event::ViewArtifact)
    }

    pub fn reset(&self) -> Result<(), SessionError> {
        self.send(Event::Reset)
    }

    pub fn reclaim(&self) -> Result<(), SessionError> {
        self.send(Event::Reclaim)
    }

    /// Tear the session down and end its loop.
    pub fn exit(&self) -> Result<(), SessionError> {
        self.send(Event::Exit)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Run the session loop until `Exit` is received or every `SessionHandle`
/// has been dropped. Either way the session is torn down before returning.
pub async fn run_session_loop(mut manager: SessionManager) {
    // From here on only outside handles keep the loop alive
    manager.release_control();
    log::info!("Session loop started");

    loop {
        match manager.next_event().await {
            // Handle Exit at the edge
            Some(Event::Exit) => {
                log::info!("Exit requested, shutting down session loop");
                break;
            }
            Some(event) => manager.dispatch(event),
            None => {
                log::info!("All session handles dropped, shutting down session loop");
                break;
            }
        }
    }

    manager.teardown();
    log::info!("Session loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AcquireFailure, HostError};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn ui_state_uses_status_tag() {
        let state = State::Recording {
            session_id: Uuid::new_v4(),
            elapsed_secs: 5,
            limit_secs: None,
        };
        let value = serde_json::to_value(state_to_ui(&state, None)).unwrap();
        assert_eq!(
            value,
            json!({ "status": "recording", "elapsedSecs": 5, "limitSecs": null })
        );

        let value = serde_json::to_value(state_to_ui(&State::Idle, None)).unwrap();
        assert_eq!(value, json!({ "status": "idle" }));
    }

    #[test]
    fn denied_ui_carries_cause_and_message() {
        let failure = AcquireFailure::classify(&HostError::NotFound("no camera".into()));
        let state = State::Denied {
            failure: failure.clone(),
            dismissed: false,
        };
        let value = serde_json::to_value(state_to_ui(&state, None)).unwrap();
        assert_eq!(value["status"], "denied");
        assert_eq!(value["cause"], "notFound");
        assert_eq!(value["message"], failure.message());

        let dismissed = State::Denied {
            failure,
            dismissed: true,
        };
        let value = serde_json::to_value(state_to_ui(&dismissed, None)).unwrap();
        assert_eq!(value["cause"], "notFound");
        assert!(value["message"].is_null());
    }

    #[test]
    fn handle_reports_closed_loop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(tx);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.start(), Err(SessionError::LoopClosed));
    }
}
