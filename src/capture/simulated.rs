//! In-process fake capture host
//!
//! Stands in for a real camera/microphone. Used by the demo binary and tests;
//! it records every stream it hands out so leaked tracks can be detected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    CaptureConstraints, CaptureHost, CaptureStream, Encoder, EncoderError, FragmentSink,
    HostError, MediaTrack, OutputFormat, TrackKind,
};

#[derive(Debug)]
pub struct SimulatedTrack {
    kind: TrackKind,
    live: AtomicBool,
}

impl MediaTrack for SimulatedTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SimulatedStream {
    id: Uuid,
    tracks: Vec<Arc<SimulatedTrack>>,
}

impl CaptureStream for SimulatedStream {
    fn id(&self) -> Uuid {
        self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|t| t.clone() as Arc<dyn MediaTrack>)
            .collect()
    }
}

#[derive(Default)]
struct SimState {
    failures: VecDeque<HostError>,
    encoder_failure: Option<EncoderError>,
    requests: usize,
    encoders_opened: usize,
    streams: Vec<Arc<SimulatedStream>>,
    active_sink: Option<FragmentSink>,
}

/// Fake host. Cloning shares the same underlying state.
#[derive(Clone, Default)]
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
    fragment_interval: Option<Duration>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoders created by this host emit a fragment every `interval` on their own.
    pub fn with_fragment_interval(interval: Duration) -> Self {
        Self {
            state: Arc::default(),
            fragment_interval: Some(interval),
        }
    }

    /// Make the next device request fail with `err`.
    pub fn fail_next_request(&self, err: HostError) {
        self.state.lock().failures.push_back(err);
    }

    /// Make the next encoder creation fail with `err`.
    pub fn fail_next_encoder(&self, err: EncoderError) {
        self.state.lock().encoder_failure = Some(err);
    }

    pub fn requests(&self) -> usize {
        self.state.lock().requests
    }

    pub fn encoders_opened(&self) -> usize {
        self.state.lock().encoders_opened
    }

    pub fn streams_created(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Live tracks across every stream this host ever handed out.
    pub fn live_track_count(&self) -> usize {
        self.state
            .lock()
            .streams
            .iter()
            .map(|s| s.live_tracks())
            .sum()
    }

    pub fn is_encoding(&self) -> bool {
        self.state.lock().active_sink.is_some()
    }

    /// Push a fragment through the currently running encoder.
    /// Returns false when no encoder is running.
    pub fn emit(&self, bytes: impl Into<Bytes>) -> bool {
        match self.state.lock().active_sink.as_ref() {
            Some(sink) => {
                sink.push(bytes);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CaptureHost for SimulatedHost {
    async fn request_device(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn CaptureStream>, HostError> {
        let mut state = self.state.lock();
        state.requests += 1;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let mut tracks = vec![Arc::new(SimulatedTrack {
            kind: TrackKind::Video,
            live: AtomicBool::new(true),
        })];
        if constraints.audio {
            tracks.push(Arc::new(SimulatedTrack {
                kind: TrackKind::Audio,
                live: AtomicBool::new(true),
            }));
        }

        let stream = Arc::new(SimulatedStream {
            id: Uuid::new_v4(),
            tracks,
        });
        state.streams.push(stream.clone());
        Ok(stream)
    }

    fn create_encoder(
        &self,
        device: &Arc<dyn CaptureStream>,
        format: &OutputFormat,
    ) -> Result<Box<dyn Encoder>, EncoderError> {
        let mut state = self.state.lock();
        if let Some(err) = state.encoder_failure.take() {
            return Err(err);
        }
        if !format.mime_type.starts_with("video/") {
            return Err(EncoderError::UnsupportedFormat(format.mime_type.clone()));
        }
        if device.live_tracks() == 0 {
            return Err(EncoderError::Device(format!(
                "stream {} has no live tracks",
                device.id()
            )));
        }
        state.encoders_opened += 1;

        Ok(Box::new(SimulatedEncoder {
            state: self.state.clone(),
            interval: self.fragment_interval,
            sink: None,
            ticker: None,
        }))
    }
}

struct SimulatedEncoder {
    state: Arc<Mutex<SimState>>,
    interval: Option<Duration>,
    sink: Option<FragmentSink>,
    ticker: Option<CancellationToken>,
}

impl SimulatedEncoder {
    fn halt_ticker(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
    }

    fn detach(&mut self) -> Option<FragmentSink> {
        let sink = self.sink.take()?;
        let mut state = self.state.lock();
        if state
            .active_sink
            .as_ref()
            .is_some_and(|s| s.session_id() == sink.session_id())
        {
            state.active_sink = None;
        }
        Some(sink)
    }
}

impl Encoder for SimulatedEncoder {
    fn start(&mut self, sink: FragmentSink) -> Result<(), EncoderError> {
        self.state.lock().active_sink = Some(sink.clone());

        if let Some(interval) = self.interval {
            let token = CancellationToken::new();
            let cancelled = token.clone();
            let ticker_sink = sink.clone();
            tokio::spawn(async move {
                let mut frame: u64 = 0;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancelled.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            ticker_sink.push(format!("frame-{};", frame).into_bytes());
                            frame += 1;
                        }
                    }
                }
            });
            self.ticker = Some(token);
        }

        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.halt_ticker();
        if let Some(sink) = self.detach() {
            sink.finish();
        }
    }
}

impl Drop for SimulatedEncoder {
    fn drop(&mut self) {
        // Dropped without stop(): abandoned, no finalize.
        self.halt_ticker();
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Event;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn request_failures_are_consumed_in_order() {
        let host = SimulatedHost::new();
        host.fail_next_request(HostError::NotFound("no camera".into()));

        let constraints = CaptureConstraints::default();
        assert!(host.request_device(&constraints).await.is_err());
        let stream = host.request_device(&constraints).await.unwrap();

        assert_eq!(host.requests(), 2);
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(host.live_track_count(), 2);

        for track in stream.tracks() {
            track.stop();
        }
        assert_eq!(host.live_track_count(), 0);
    }

    #[tokio::test]
    async fn encoder_finishes_once_on_stop() {
        let host = SimulatedHost::new();
        let stream = host
            .request_device(&CaptureConstraints::default())
            .await
            .unwrap();
        let mut encoder = host
            .create_encoder(&stream, &OutputFormat::default())
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        encoder.start(FragmentSink::new(id, tx)).unwrap();
        assert!(host.emit(&b"x"[..]));
        encoder.stop();
        encoder.stop();

        assert!(matches!(rx.try_recv().unwrap(), Event::Fragment { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::EncoderFinalized { .. }));
        assert!(rx.try_recv().is_err());
        assert!(!host.emit(&b"y"[..]));
    }

    #[tokio::test]
    async fn dropped_encoder_never_finalizes() {
        let host = SimulatedHost::new();
        let stream = host
            .request_device(&CaptureConstraints::default())
            .await
            .unwrap();
        let mut encoder = host
            .create_encoder(&stream, &OutputFormat::default())
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        encoder.start(FragmentSink::new(Uuid::new_v4(), tx)).unwrap();
        drop(encoder);

        assert!(!host.is_encoding());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn encoder_rejects_non_video_format_and_dead_stream() {
        let host = SimulatedHost::new();
        let stream = host
            .request_device(&CaptureConstraints::default())
            .await
            .unwrap();

        let audio_only = OutputFormat {
            mime_type: "audio/ogg".into(),
        };
        assert!(matches!(
            host.create_encoder(&stream, &audio_only),
            Err(EncoderError::UnsupportedFormat(_))
        ));

        for track in stream.tracks() {
            track.stop();
        }
        assert!(matches!(
            host.create_encoder(&stream, &OutputFormat::default()),
            Err(EncoderError::Device(_))
        ));
    }
}
