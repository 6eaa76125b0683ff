//! Recorder engine: wraps the host encoder and accumulates its fragments
//!
//! One `Recorder` lives for the whole session; each `start` begins a new
//! recording session with an empty fragment list.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::capture::{CaptureHost, CaptureStream, Encoder, EncoderError, FragmentSink, OutputFormat};

/// Errors that can occur when starting a recording.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("no live capture device")]
    NoDevice,
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    Idle,
    Recording,
    Stopped,
}

pub struct Recorder {
    format: OutputFormat,
    status: RecorderStatus,
    session_id: Option<Uuid>,
    encoder: Option<Box<dyn Encoder>>,
    fragments: Vec<Bytes>,
}

impl Recorder {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            status: RecorderStatus::Idle,
            session_id: None,
            encoder: None,
            fragments: Vec::new(),
        }
    }

    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }

    /// Open an encoder on `device` and start a new recording session.
    ///
    /// On failure the status stays `Idle` and nothing is held.
    pub fn start(
        &mut self,
        host: &dyn CaptureHost,
        device: Option<&Arc<dyn CaptureStream>>,
        sink: FragmentSink,
    ) -> Result<(), RecorderError> {
        if self.status == RecorderStatus::Recording {
            return Err(RecorderError::AlreadyRecording);
        }
        let device = device.ok_or(RecorderError::NoDevice)?;

        self.abandon();
        let session_id = sink.session_id();

        let mut encoder = host.create_encoder(device, &self.format)?;
        encoder.start(sink)?;

        log::info!(
            "Recording {} started ({}) on device {}",
            session_id,
            self.format.mime_type,
            device.id()
        );
        self.encoder = Some(encoder);
        self.session_id = Some(session_id);
        self.status = RecorderStatus::Recording;
        Ok(())
    }

    /// Append one encoder fragment. Empty fragments are ignored.
    pub fn append(&mut self, bytes: Bytes) -> bool {
        if bytes.is_empty() || self.session_id.is_none() {
            return false;
        }
        self.fragments.push(bytes);
        true
    }

    /// Ask the encoder to finalize. No-op unless recording.
    pub fn stop(&mut self) -> bool {
        if self.status != RecorderStatus::Recording {
            return false;
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.stop();
        }
        self.status = RecorderStatus::Stopped;
        log::info!(
            "Recording {:?} stopping ({} fragments buffered)",
            self.session_id,
            self.fragments.len()
        );
        true
    }

    /// Concatenate every fragment of `session_id` into the artifact blob.
    /// Returns `None` if `session_id` is not the current session.
    pub fn finalize(&mut self, session_id: Uuid) -> Option<Bytes> {
        if self.session_id != Some(session_id) {
            return None;
        }
        let mut blob = BytesMut::with_capacity(self.buffered_bytes());
        for fragment in self.fragments.drain(..) {
            blob.extend_from_slice(&fragment);
        }
        self.encoder = None;
        self.status = RecorderStatus::Stopped;
        Some(blob.freeze())
    }

    /// Drop the encoder and any buffered fragments without finalizing.
    pub fn abandon(&mut self) {
        if self.encoder.is_some() || !self.fragments.is_empty() {
            log::info!(
                "Discarding recording {:?} ({} fragments)",
                self.session_id,
                self.fragments.len()
            );
        }
        self.encoder = None;
        self.fragments.clear();
        self.session_id = None;
        self.status = RecorderStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConstraints, SimulatedHost};
    use crate::state_machine::Event;
    use tokio::sync::mpsc;

    async fn device(host: &SimulatedHost) -> Arc<dyn CaptureStream> {
        host.request_device(&CaptureConstraints::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_requires_device() {
        let host = SimulatedHost::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(OutputFormat::default());

        let err = recorder
            .start(&host, None, FragmentSink::new(Uuid::new_v4(), tx))
            .unwrap_err();
        assert_eq!(err, RecorderError::NoDevice);
        assert_eq!(recorder.status(), RecorderStatus::Idle);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_recording() {
        let host = SimulatedHost::new();
        let dev = device(&host).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(OutputFormat::default());

        recorder
            .start(&host, Some(&dev), FragmentSink::new(Uuid::new_v4(), tx.clone()))
            .unwrap();
        let err = recorder
            .start(&host, Some(&dev), FragmentSink::new(Uuid::new_v4(), tx))
            .unwrap_err();
        assert_eq!(err, RecorderError::AlreadyRecording);
        assert_eq!(host.encoders_opened(), 1);
    }

    #[tokio::test]
    async fn encoder_failure_leaves_idle() {
        let host = SimulatedHost::new();
        let dev = device(&host).await;
        host.fail_next_encoder(EncoderError::UnsupportedFormat("video/x-test".into()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(OutputFormat::default());

        let err = recorder
            .start(&host, Some(&dev), FragmentSink::new(Uuid::new_v4(), tx))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Encoder(_)));
        assert_eq!(recorder.status(), RecorderStatus::Idle);
        assert!(recorder.session_id().is_none());
    }

    #[tokio::test]
    async fn finalize_concatenates_in_arrival_order() {
        let host = SimulatedHost::new();
        let dev = device(&host).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut recorder = Recorder::new(OutputFormat::default());
        recorder
            .start(&host, Some(&dev), FragmentSink::new(id, tx))
            .unwrap();

        for part in [&b"a"[..], b"", b"b", b"c"] {
            host.emit(part);
        }
        assert!(recorder.stop());
        assert!(!recorder.stop());

        while let Ok(event) = rx.try_recv() {
            if let Event::Fragment { bytes, .. } = event {
                recorder.append(bytes);
            }
        }
        assert_eq!(recorder.fragment_count(), 3);
        assert_eq!(recorder.finalize(Uuid::new_v4()), None);
        assert_eq!(recorder.finalize(id).as_deref(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn next_start_clears_previous_fragments() {
        let host = SimulatedHost::new();
        let dev = device(&host).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new(OutputFormat::default());

        recorder
            .start(&host, Some(&dev), FragmentSink::new(Uuid::new_v4(), tx.clone()))
            .unwrap();
        recorder.append(Bytes::from_static(b"old"));
        recorder.stop();

        recorder
            .start(&host, Some(&dev), FragmentSink::new(Uuid::new_v4(), tx))
            .unwrap();
        assert_eq!(recorder.fragment_count(), 0);
        assert_eq!(recorder.status(), RecorderStatus::Recording);
    }
}
