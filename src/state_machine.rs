//! State machine for the clip recording session
//!
//! Single-writer pattern: every transition goes through `reduce()`, which
//! returns the next state and the effects to execute. The reducer never
//! touches resources; `SessionEffects` owns those.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::capture::{AcquireFailure, CaptureStream};
use crate::error::SessionError;

/// Whether the user has let us use the camera/microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied(AcquireFailure),
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

/// Authoritative session state.
#[derive(Debug, Clone)]
pub enum State {
    /// Nothing requested yet.
    Idle,
    /// A device request is in flight.
    Acquiring {
        attempt_id: Uuid,
        previous: PermissionState,
    },
    /// The last request failed. The permission prompt stays up; the failure
    /// message is hidden once `dismissed` (after a reset).
    Denied {
        failure: AcquireFailure,
        dismissed: bool,
    },
    /// Permission was granted earlier but every resource has been reclaimed.
    Released,
    /// Device live and bound to the preview. `error` holds the last encoder
    /// start failure, if any.
    Previewing { error: Option<String> },
    /// Encoder being opened for a new recording.
    Arming { session_id: Uuid },
    Recording {
        session_id: Uuid,
        elapsed_secs: u64,
        limit_secs: Option<u64>,
    },
    /// Stop signalled; waiting for the encoder's finalize notification.
    Finalizing {
        session_id: Uuid,
        duration_secs: u64,
    },
    /// Artifact available. `reviewing` is set once the user chose to play it back.
    Recorded {
        session_id: Uuid,
        duration_secs: u64,
        reviewing: bool,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl State {
    pub fn permission(&self) -> PermissionState {
        match self {
            State::Idle => PermissionState::Unknown,
            State::Acquiring { previous, .. } => previous.clone(),
            State::Denied { failure, .. } => PermissionState::Denied(failure.clone()),
            _ => PermissionState::Granted,
        }
    }

    /// True while a capture device is expected to be live.
    pub fn holds_device(&self) -> bool {
        matches!(
            self,
            State::Previewing { .. } | State::Arming { .. } | State::Recording { .. }
        )
    }

    /// Id of the recording session in progress or last completed.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Arming { session_id }
            | State::Recording { session_id, .. }
            | State::Finalizing { session_id, .. }
            | State::Recorded { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// Whole seconds recorded so far (or in total, once stopped).
    pub fn elapsed_secs(&self) -> u64 {
        match self {
            State::Recording { elapsed_secs, .. } => *elapsed_secs,
            State::Finalizing { duration_secs, .. } | State::Recorded { duration_secs, .. } => {
                *duration_secs
            }
            _ => 0,
        }
    }
}

/// Inputs to the state machine: user intents and host notifications.
#[derive(Debug, Clone)]
pub enum Event {
    /// Request the capture device (initial mount, "try again").
    Acquire,
    StartRecording,
    StopRecording,
    ViewArtifact,
    /// Discard the artifact and, if permission was granted, re-acquire.
    Reset,
    /// Release every resource (stop+discard, teardown).
    Reclaim,
    /// Shut the session loop down. Handled at the loop edge.
    Exit,

    // Acquisition results
    DeviceAcquired {
        id: Uuid,
        device: Arc<dyn CaptureStream>,
    },
    DeviceFailed {
        id: Uuid,
        failure: AcquireFailure,
    },

    // Encoder notifications
    EncoderStarted {
        id: Uuid,
        limit_secs: Option<u64>,
    },
    EncoderFailed {
        id: Uuid,
        err: String,
    },
    Fragment {
        id: Uuid,
        bytes: Bytes,
    },
    EncoderFinalized {
        id: Uuid,
    },

    /// One second of recording elapsed.
    ClockTick {
        id: Uuid,
    },
}

/// Effects to execute after a transition, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    RequestDevice { id: Uuid },
    InstallDevice { device: Arc<dyn CaptureStream> },
    /// A device arrived for an attempt nobody is waiting on anymore.
    ReleaseStaleDevice { device: Arc<dyn CaptureStream> },
    BindPreview,
    UnbindPreview,
    OpenEncoder { id: Uuid },
    AppendFragment { bytes: Bytes },
    StopEncoder,
    /// Abandon the in-progress recording without finalizing.
    DiscardRecording,
    StartClock { id: Uuid },
    StopClock,
    ReleaseDevice,
    PublishArtifact { id: Uuid, duration_secs: u64 },
    Reclaim,
    ReportError { error: SessionError },
    EmitUi,
}

/// Start a fresh acquisition attempt after releasing whatever is held.
fn reacquire(previous: PermissionState, discard_recording: bool) -> (State, Vec<Effect>) {
    let id = Uuid::new_v4();
    let mut effects = Vec::with_capacity(5);
    if discard_recording {
        effects.push(Effect::DiscardRecording);
    }
    effects.extend([
        Effect::Reclaim,
        Effect::UnbindPreview,
        Effect::RequestDevice { id },
        Effect::EmitUi,
    ]);
    (
        State::Acquiring {
            attempt_id: id,
            previous,
        },
        effects,
    )
}

/// Transition taken when a recording stops with `duration_secs` on the clock.
fn stop_recording(session_id: Uuid, duration_secs: u64) -> (State, Vec<Effect>) {
    (
        State::Finalizing {
            session_id,
            duration_secs,
        },
        vec![
            Effect::StopClock,
            Effect::StopEncoder,
            Effect::ReleaseDevice,
            Effect::UnbindPreview,
            Effect::EmitUi,
        ],
    )
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore host notifications with stale attempt/session ids
/// - A stale device is released, never dropped silently
/// - Always emit EmitUi after a visible state change
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use State::*;

    match (state, event) {
        // -----------------
        // Acquire / try again
        // -----------------
        (Idle, Event::Acquire) => {
            let id = Uuid::new_v4();
            (
                Acquiring {
                    attempt_id: id,
                    previous: PermissionState::Unknown,
                },
                vec![RequestDevice { id }, EmitUi],
            )
        }
        (Denied { failure, .. }, Event::Acquire) => {
            reacquire(PermissionState::Denied(failure.clone()), false)
        }
        (Released | Previewing { .. } | Recorded { .. }, Event::Acquire) => {
            reacquire(PermissionState::Granted, false)
        }
        (Acquiring { .. }, Event::Acquire) => (state.clone(), vec![]),
        (Arming { .. } | Recording { .. } | Finalizing { .. }, Event::Acquire) => {
            log::warn!("Acquire ignored while a recording is in progress");
            (state.clone(), vec![])
        }

        // -----------------
        // Acquisition results
        // -----------------
        (Acquiring { attempt_id, .. }, Event::DeviceAcquired { id, device }) if *attempt_id == id => (
            Previewing { error: None },
            vec![InstallDevice { device }, BindPreview, EmitUi],
        ),
        (_, Event::DeviceAcquired { id, device }) => {
            log::warn!("Releasing device {} from stale attempt {}", device.id(), id);
            (state.clone(), vec![ReleaseStaleDevice { device }])
        }
        (Acquiring { attempt_id, .. }, Event::DeviceFailed { id, failure }) if *attempt_id == id => (
            Denied {
                failure: failure.clone(),
                dismissed: false,
            },
            vec![
                Reclaim,
                ReportError {
                    error: SessionError::Acquisition(failure),
                },
                EmitUi,
            ],
        ),
        (_, Event::DeviceFailed { .. }) => (state.clone(), vec![]),

        // -----------------
        // Start
        // -----------------
        (Previewing { .. }, Event::StartRecording) => {
            let id = Uuid::new_v4();
            (Arming { session_id: id }, vec![OpenEncoder { id }, EmitUi])
        }
        (Arming { .. } | Recording { .. } | Finalizing { .. }, Event::StartRecording) => (
            state.clone(),
            vec![ReportError {
                error: SessionError::AlreadyRecording,
            }],
        ),
        (_, Event::StartRecording) => (
            state.clone(),
            vec![ReportError {
                error: SessionError::NoDevice,
            }],
        ),
        (Arming { session_id }, Event::EncoderStarted { id, limit_secs }) if *session_id == id => (
            Recording {
                session_id: id,
                elapsed_secs: 0,
                limit_secs,
            },
            vec![StartClock { id }, EmitUi],
        ),
        (Arming { session_id }, Event::EncoderFailed { id, err }) if *session_id == id => (
            Previewing {
                error: Some(err.clone()),
            },
            vec![
                DiscardRecording,
                ReportError {
                    error: SessionError::EncoderStart(err),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Recording
        // -----------------
        (
            Recording {
                session_id,
                elapsed_secs,
                limit_secs,
            },
            Event::ClockTick { id },
        ) if *session_id == id => {
            let elapsed = elapsed_secs + 1;
            match limit_secs {
                Some(limit) if elapsed >= *limit => {
                    log::warn!(
                        "Recording {} auto-stopped after {}s (max duration reached)",
                        session_id,
                        elapsed
                    );
                    stop_recording(*session_id, elapsed)
                }
                _ => (
                    Recording {
                        session_id: *session_id,
                        elapsed_secs: elapsed,
                        limit_secs: *limit_secs,
                    },
                    vec![EmitUi],
                ),
            }
        }
        (
            Recording {
                session_id,
                elapsed_secs,
                ..
            },
            Event::StopRecording,
        ) => stop_recording(*session_id, *elapsed_secs),
        (
            Recording { session_id, .. } | Finalizing { session_id, .. },
            Event::Fragment { id, bytes },
        ) if *session_id == id => {
            if bytes.is_empty() {
                (state.clone(), vec![])
            } else {
                (state.clone(), vec![AppendFragment { bytes }])
            }
        }
        // Encoder finalized on its own (device lost mid-recording)
        (
            Recording {
                session_id,
                elapsed_secs,
                ..
            },
            Event::EncoderFinalized { id },
        ) if *session_id == id => (
            Recorded {
                session_id: id,
                duration_secs: *elapsed_secs,
                reviewing: false,
            },
            vec![
                StopClock,
                ReleaseDevice,
                UnbindPreview,
                PublishArtifact {
                    id,
                    duration_secs: *elapsed_secs,
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Finalizing
        // -----------------
        (
            Finalizing {
                session_id,
                duration_secs,
            },
            Event::EncoderFinalized { id },
        ) if *session_id == id => (
            Recorded {
                session_id: id,
                duration_secs: *duration_secs,
                reviewing: false,
            },
            vec![
                PublishArtifact {
                    id,
                    duration_secs: *duration_secs,
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Review
        // -----------------
        (
            Recorded {
                session_id,
                duration_secs,
                reviewing: false,
            },
            Event::ViewArtifact,
        ) => (
            Recorded {
                session_id: *session_id,
                duration_secs: *duration_secs,
                reviewing: true,
            },
            vec![UnbindPreview, ReleaseDevice, EmitUi],
        ),
        (_, Event::ViewArtifact) => (state.clone(), vec![]),

        // -----------------
        // Reset
        // -----------------
        (Idle, Event::Reset) => (Idle, vec![Reclaim, EmitUi]),
        (Denied { failure, .. }, Event::Reset) => (
            Denied {
                failure: failure.clone(),
                dismissed: true,
            },
            vec![Reclaim, EmitUi],
        ),
        (Acquiring { .. }, Event::Reset) => (state.clone(), vec![]),
        (Released | Previewing { .. } | Recorded { .. }, Event::Reset) => {
            reacquire(PermissionState::Granted, false)
        }
        (Arming { .. } | Recording { .. } | Finalizing { .. }, Event::Reset) => {
            reacquire(PermissionState::Granted, true)
        }

        // -----------------
        // Reclaim (stop+discard, teardown)
        // -----------------
        (Idle, Event::Reclaim) => (Idle, vec![Reclaim, UnbindPreview, EmitUi]),
        (Denied { .. }, Event::Reclaim) => (state.clone(), vec![Reclaim, UnbindPreview, EmitUi]),
        (Acquiring { previous, .. }, Event::Reclaim) => {
            let next = match previous {
                PermissionState::Unknown => Idle,
                PermissionState::Granted => Released,
                PermissionState::Denied(failure) => Denied {
                    failure: failure.clone(),
                    dismissed: false,
                },
            };
            (next, vec![Reclaim, UnbindPreview, EmitUi])
        }
        (Arming { .. } | Recording { .. } | Finalizing { .. }, Event::Reclaim) => (
            Released,
            vec![DiscardRecording, Reclaim, UnbindPreview, EmitUi],
        ),
        (_, Event::Reclaim) => (Released, vec![Reclaim, UnbindPreview, EmitUi]),

        // -----------------
        // Unhandled: stop with nothing recording, stale ticks/fragments, Exit
        // -----------------
        (_, Event::Fragment { id, .. }) => {
            log::debug!("Dropping fragment for inactive session {}", id);
            (state.clone(), vec![])
        }
        _ => (state.clone(), vec![]),
    }
}
