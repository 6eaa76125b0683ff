//! Capture host seam for clipcam
//!
//! The host platform's camera/microphone API and its encoder are external
//! collaborators. This module defines the traits the session core calls into,
//! plus the acquirer that turns raw host failures into user-facing causes.

pub mod acquirer;
pub mod simulated;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state_machine::Event;

pub use acquirer::{AcquireFailure, DeviceAcquirer, FailureKind};
pub use simulated::SimulatedHost;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// A single stoppable track of a live capture stream.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Stop the track. Must be safe to call on an already stopped track.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Opaque handle to an active audio+video capture stream.
pub trait CaptureStream: Send + Sync + fmt::Debug {
    fn id(&self) -> Uuid;

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Number of tracks still live.
    fn live_tracks(&self) -> usize {
        self.tracks().iter().filter(|t| t.is_live()).count()
    }
}

/// Constraints passed to the host when requesting a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    /// Preferred (ideal) frame width in pixels
    pub width: u32,
    /// Preferred (ideal) frame height in pixels
    pub height: u32,
    pub frame_rate: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            audio: true,
        }
    }
}

/// Container format requested from the host encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub mime_type: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
        }
    }
}

/// Failure reported by the host when a device request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("access to capture devices was not allowed: {0}")]
    NotAllowed(String),
    #[error("no matching capture device: {0}")]
    NotFound(String),
    #[error("constraint could not be satisfied: {constraint}")]
    Overconstrained { constraint: String },
    #[error("capture device could not be read: {0}")]
    NotReadable(String),
    #[error("device start aborted: {0}")]
    Aborted(String),
    #[error("{0}")]
    Other(String),
}

/// Failure to open or start the host encoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("encoder could not use the device: {0}")]
    Device(String),
}

/// The host capture/encoding platform.
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Request a combined audio+video stream.
    async fn request_device(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn CaptureStream>, HostError>;

    /// Open an encoder bound to `device`. The encoder does not emit anything
    /// until `Encoder::start` is called.
    fn create_encoder(
        &self,
        device: &Arc<dyn CaptureStream>,
        format: &OutputFormat,
    ) -> Result<Box<dyn Encoder>, EncoderError>;
}

/// Host encoder producing container fragments.
pub trait Encoder: Send {
    /// Begin encoding. Fragments and the final notification go to `sink`.
    fn start(&mut self, sink: FragmentSink) -> Result<(), EncoderError>;

    /// Ask the encoder to flush and finalize. The encoder must push any
    /// remaining data and then call `FragmentSink::finish` exactly once.
    fn stop(&mut self);
}

/// Where an encoder delivers its output for one recording session.
///
/// Every call becomes an event on the session loop, so fragments keep their
/// emission order and all precede the finalize notification.
#[derive(Debug, Clone)]
pub struct FragmentSink {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<Event>,
}

impl FragmentSink {
    pub fn new(session_id: Uuid, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Deliver one encoded fragment.
    pub fn push(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if self
            .tx
            .send(Event::Fragment {
                id: self.session_id,
                bytes,
            })
            .is_err()
        {
            log::debug!("Fragment dropped, session loop closed ({})", self.session_id);
        }
    }

    /// Signal that the encoder has flushed everything.
    pub fn finish(&self) {
        if self
            .tx
            .send(Event::EncoderFinalized {
                id: self.session_id,
            })
            .is_err()
        {
            log::debug!("Finalize dropped, session loop closed ({})", self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_sink_preserves_order_and_finishes_last() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let sink = FragmentSink::new(id, tx);

        sink.push(&b"a"[..]);
        sink.push(Bytes::from_static(b"b"));
        sink.finish();

        match rx.try_recv().unwrap() {
            Event::Fragment { id: got, bytes } => {
                assert_eq!(got, id);
                assert_eq!(&bytes[..], b"a");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), Event::Fragment { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::EncoderFinalized { id: got } if got == id));
    }

    #[test]
    fn fragment_sink_tolerates_closed_loop() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = FragmentSink::new(Uuid::new_v4(), tx);
        sink.push(vec![1u8, 2, 3]);
        sink.finish();
    }

    #[test]
    fn default_constraints_prefer_720p_with_audio() {
        let c = CaptureConstraints::default();
        assert_eq!((c.width, c.height), (1280, 720));
        assert!(c.audio);
    }
}
