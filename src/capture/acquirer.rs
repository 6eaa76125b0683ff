//! Device acquisition and failure classification
//!
//! Requests the capture stream from the host on a background task and reports
//! the outcome to the session loop as `DeviceAcquired` / `DeviceFailed`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{CaptureConstraints, CaptureHost, HostError};
use crate::state_machine::Event;

/// Why acquiring the capture device failed, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    PermissionDenied,
    NotFound,
    DeviceBusy,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PermissionDenied => "permission-denied",
            FailureKind::NotFound => "not-found",
            FailureKind::DeviceBusy => "device-busy",
            FailureKind::Unknown => "unknown",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::PermissionDenied => {
                "Camera and microphone access was denied. Allow access and try again."
            }
            FailureKind::NotFound => {
                "No camera or microphone was found. Connect a device and try again."
            }
            FailureKind::DeviceBusy => {
                "Your camera or microphone is already in use by another application."
            }
            FailureKind::Unknown => "Could not access your camera and microphone.",
        }
    }
}

/// A classified acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireFailure {
    pub kind: FailureKind,
    /// Host-provided detail, kept for logs and the unknown-cause message.
    pub detail: String,
}

impl AcquireFailure {
    pub fn classify(err: &HostError) -> Self {
        let kind = match err {
            HostError::NotAllowed(_) => FailureKind::PermissionDenied,
            HostError::NotFound(_) | HostError::Overconstrained { .. } => FailureKind::NotFound,
            HostError::NotReadable(_) | HostError::Aborted(_) => FailureKind::DeviceBusy,
            HostError::Other(_) => FailureKind::Unknown,
        };
        Self {
            kind,
            detail: err.to_string(),
        }
    }

    /// Message for the error view.
    pub fn message(&self) -> String {
        match self.kind {
            FailureKind::Unknown if !self.detail.is_empty() => {
                format!("{} ({})", self.kind.user_message(), self.detail)
            }
            kind => kind.user_message().to_string(),
        }
    }
}

impl std::fmt::Display for AcquireFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.detail)
    }
}

/// Issues device requests against the host.
pub struct DeviceAcquirer {
    host: Arc<dyn CaptureHost>,
    constraints: CaptureConstraints,
    attempts: u64,
}

impl DeviceAcquirer {
    pub fn new(host: Arc<dyn CaptureHost>, constraints: CaptureConstraints) -> Self {
        Self {
            host,
            constraints,
            attempts: 0,
        }
    }

    pub fn host(&self) -> &Arc<dyn CaptureHost> {
        &self.host
    }

    /// Number of requests issued so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Request a device for `attempt_id`. Fire-and-forget: the outcome comes
    /// back through `tx`. Must be called from within a tokio runtime.
    pub fn request(&mut self, attempt_id: Uuid, tx: mpsc::UnboundedSender<Event>) {
        self.attempts += 1;
        let host = self.host.clone();
        let constraints = self.constraints.clone();

        log::info!(
            "Requesting capture device (attempt {}, {}x{}@{}, audio={})",
            attempt_id,
            constraints.width,
            constraints.height,
            constraints.frame_rate,
            constraints.audio
        );

        tokio::spawn(async move {
            let event = match host.request_device(&constraints).await {
                Ok(device) => {
                    log::info!("Capture device acquired: {:?}", device);
                    Event::DeviceAcquired {
                        id: attempt_id,
                        device,
                    }
                }
                Err(err) => {
                    let failure = AcquireFailure::classify(&err);
                    log::warn!("Capture device request failed: {}", failure);
                    Event::DeviceFailed {
                        id: attempt_id,
                        failure,
                    }
                }
            };

            if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                // Nobody will ever own this device; stop it here.
                if let Event::DeviceAcquired { device, .. } = event {
                    let stopped = crate::reclaim::stop_tracks(&device);
                    log::debug!(
                        "Session loop gone, released late device {} ({} tracks)",
                        device.id(),
                        stopped
                    );
                }
            }
        });
    }
}
