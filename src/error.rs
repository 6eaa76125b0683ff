//! Error types shared across the session core

use thiserror::Error;

use crate::capture::AcquireFailure;

/// Errors reported on the session's error channel.
///
/// None of these are fatal: the session recovers locally and the UI shows
/// the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No live capture device; acquire one before recording")]
    NoDevice,

    #[error("A recording is already in progress; stop it first")]
    AlreadyRecording,

    #[error("Could not start the recorder: {0}")]
    EncoderStart(String),

    #[error("{}", .0.message())]
    Acquisition(AcquireFailure),

    #[error("Session loop is no longer running")]
    LoopClosed,
}

impl SessionError {
    /// Category used for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::NoDevice => "no-device",
            SessionError::AlreadyRecording => "already-recording",
            SessionError::EncoderStart(_) => "encoder-start",
            SessionError::Acquisition(failure) => failure.kind.as_str(),
            SessionError::LoopClosed => "loop-closed",
        }
    }
}

/// Failures loading or saving recorder settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Settings I/O failed for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
