//! Effect runner for the recording session
//!
//! Executes the effects produced by the state machine. Everything that can
//! leak (device, encoder, timer, playback handle) is owned here, so the
//! reducer stays pure.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use crate::artifact::Artifact;
use crate::capture::{CaptureHost, DeviceAcquirer, FragmentSink};
use crate::error::SessionError;
use crate::metrics::SessionMetrics;
use crate::preview::{DisplaySink, PreviewBinder};
use crate::reclaim::{stop_tracks, ReclaimReport, ResourceSet};
use crate::recorder::Recorder;
use crate::settings::RecorderSettings;
use crate::state_machine::{Effect, Event};

/// Called once per finished recording with the artifact bytes and its
/// duration in whole seconds.
pub type CompletionCallback = Box<dyn FnMut(&Bytes, u64) + Send>;

/// Capacity of the error broadcast channel. Slow subscribers lag rather
/// than block the session.
const ERROR_CHANNEL_CAPACITY: usize = 16;

pub struct SessionEffects {
    resources: ResourceSet,
    recorder: Recorder,
    preview: PreviewBinder,
    acquirer: DeviceAcquirer,
    metrics: SessionMetrics,
    settings: RecorderSettings,
    on_complete: Option<CompletionCallback>,
    errors: broadcast::Sender<SessionError>,
    tx: mpsc::UnboundedSender<Event>,
}

impl SessionEffects {
    pub fn new(
        host: Arc<dyn CaptureHost>,
        sink: Box<dyn DisplaySink>,
        settings: RecorderSettings,
        tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            resources: ResourceSet::new(),
            recorder: Recorder::new(settings.output_format()),
            preview: PreviewBinder::new(sink),
            acquirer: DeviceAcquirer::new(host, settings.constraints()),
            metrics: SessionMetrics::new(),
            settings,
            on_complete: None,
            errors,
            tx,
        }
    }

    pub fn set_on_complete(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn preview(&self) -> &PreviewBinder {
        &self.preview
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Number of device requests issued so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquirer.attempts()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<SessionError> {
        self.errors.subscribe()
    }

    /// Release everything immediately, bypassing the state machine. Used
    /// when the session is going away.
    pub fn shutdown(&mut self) -> ReclaimReport {
        self.recorder.abandon();
        self.metrics.cycle_discarded();
        self.preview.unbind();
        self.resources.reclaim()
    }

    /// Execute one effect. Events that must be handled before anything
    /// else on the channel are pushed onto `followups`.
    pub fn apply(&mut self, effect: Effect, followups: &mut VecDeque<Event>) {
        match effect {
            Effect::RequestDevice { id } => {
                self.metrics.acquisition_requested();
                self.acquirer.request(id, self.tx.clone());
            }

            Effect::InstallDevice { device } => {
                self.resources.install_device(device);
            }

            Effect::ReleaseStaleDevice { device } => {
                let stopped = stop_tracks(&device);
                log::info!("Stale device {} released ({} tracks)", device.id(), stopped);
            }

            Effect::BindPreview => self.preview.bind(self.resources.device()),

            Effect::UnbindPreview => self.preview.unbind(),

            Effect::OpenEncoder { id } => {
                self.metrics.cycle_started(id);
                let sink = FragmentSink::new(id, self.tx.clone());
                let host = self.acquirer.host().as_ref();
                match self.recorder.start(host, self.resources.device(), sink) {
                    Ok(()) => followups.push_back(Event::EncoderStarted {
                        id,
                        limit_secs: self.settings.recording_limit(),
                    }),
                    Err(e) => {
                        log::error!("Failed to start recording {}: {}", id, e);
                        self.metrics.cycle_failed();
                        followups.push_back(Event::EncoderFailed {
                            id,
                            err: e.to_string(),
                        });
                    }
                }
            }

            Effect::AppendFragment { bytes } => {
                let len = bytes.len();
                if self.recorder.append(bytes) {
                    self.metrics.fragment_received();
                    log::debug!(
                        "Fragment appended ({} bytes, {} buffered)",
                        len,
                        self.recorder.buffered_bytes()
                    );
                }
            }

            Effect::StopEncoder => {
                self.recorder.stop();
            }

            Effect::DiscardRecording => {
                self.recorder.abandon();
                self.metrics.cycle_discarded();
            }

            Effect::StartClock { id } => {
                self.resources.clock_mut().begin(id, self.tx.clone());
            }

            Effect::StopClock => {
                self.resources.clock_mut().end();
            }

            Effect::ReleaseDevice => {
                self.resources.release_device();
            }

            Effect::PublishArtifact { id, duration_secs } => {
                self.publish(id, duration_secs);
            }

            Effect::Reclaim => {
                self.resources.reclaim();
            }

            Effect::ReportError { error } => {
                log::warn!("Session error ({}): {}", error.category(), error);
                self.metrics.record_error(error.category(), error.to_string());
                // No subscribers is fine
                let _ = self.errors.send(error);
            }

            Effect::EmitUi => {
                log::debug!("EmitUi reached the effect runner; ignored");
            }
        }
    }

    fn publish(&mut self, id: uuid::Uuid, duration_secs: u64) {
        let Some(bytes) = self.recorder.finalize(id) else {
            log::error!("No buffered recording for session {}", id);
            self.metrics.cycle_failed();
            return;
        };

        let mime_type = self.recorder.format().mime_type.clone();
        let artifact = self.resources.publish(|registry| Artifact {
            session_id: id,
            playback: registry.create(bytes.clone()),
            bytes,
            mime_type,
            duration_secs,
            created_at: Utc::now(),
        });

        log::info!(
            "Artifact ready: {} ({} bytes, {}s)",
            artifact.playback.url(),
            artifact.bytes.len(),
            artifact.duration_secs
        );

        if let Some(callback) = self.on_complete.as_mut() {
            callback(&artifact.bytes, duration_secs);
        }
        self.metrics.cycle_completed(duration_secs, artifact.bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConstraints, EncoderError, SimulatedHost};
    use crate::preview::NullSink;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn runner(host: &SimulatedHost) -> (SessionEffects, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let effects = SessionEffects::new(
            Arc::new(host.clone()),
            Box::new(NullSink),
            RecorderSettings::default(),
            tx,
        );
        (effects, rx)
    }

    async fn install(host: &SimulatedHost, effects: &mut SessionEffects) {
        let device = host
            .request_device(&CaptureConstraints::default())
            .await
            .unwrap();
        effects.apply(Effect::InstallDevice { device }, &mut VecDeque::new());
    }

    #[tokio::test]
    async fn open_encoder_queues_started_event() {
        let host = SimulatedHost::new();
        let (mut effects, _rx) = runner(&host);
        install(&host, &mut effects).await;

        let id = Uuid::new_v4();
        let mut followups = VecDeque::new();
        effects.apply(Effect::OpenEncoder { id }, &mut followups);

        assert!(matches!(
            followups.pop_front(),
            Some(Event::EncoderStarted { id: got, limit_secs: None }) if got == id
        ));
        assert!(host.is_encoding());
    }

    #[tokio::test]
    async fn open_encoder_failure_queues_failed_event() {
        let host = SimulatedHost::new();
        let (mut effects, _rx) = runner(&host);
        install(&host, &mut effects).await;
        host.fail_next_encoder(EncoderError::Device("camera unplugged".into()));

        let mut followups = VecDeque::new();
        effects.apply(
            Effect::OpenEncoder { id: Uuid::new_v4() },
            &mut followups,
        );

        match followups.pop_front() {
            Some(Event::EncoderFailed { err, .. }) => assert!(err.contains("camera unplugged")),
            other => panic!("unexpected followup: {:?}", other),
        }
        assert_eq!(effects.metrics().summary().failed_cycles, 1);
        assert!(effects.resources().device().is_some());
    }

    #[tokio::test]
    async fn publish_invokes_callback_and_stores_artifact() {
        let host = SimulatedHost::new();
        let (mut effects, _rx) = runner(&host);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        effects.set_on_complete(Box::new(move |bytes, secs| {
            sink.lock().push((bytes.clone(), secs));
        }));
        install(&host, &mut effects).await;

        let id = Uuid::new_v4();
        let mut followups = VecDeque::new();
        effects.apply(Effect::OpenEncoder { id }, &mut followups);
        for part in [&b"a"[..], b"b"] {
            effects.apply(
                Effect::AppendFragment {
                    bytes: Bytes::from_static(part),
                },
                &mut followups,
            );
        }
        effects.apply(Effect::StopEncoder, &mut followups);
        effects.apply(
            Effect::PublishArtifact {
                id,
                duration_secs: 2,
            },
            &mut followups,
        );

        assert_eq!(
            seen.lock().as_slice(),
            &[(Bytes::from_static(b"ab"), 2)]
        );
        let artifact = effects.resources().artifact().unwrap();
        assert_eq!(artifact.duration_secs, 2);
        assert!(effects.resources().playback().is_live(&artifact.playback));
    }

    #[tokio::test]
    async fn report_error_is_broadcast() {
        let host = SimulatedHost::new();
        let (mut effects, _rx) = runner(&host);
        let mut errors = effects.subscribe_errors();

        effects.apply(
            Effect::ReportError {
                error: SessionError::NoDevice,
            },
            &mut VecDeque::new(),
        );

        assert_eq!(errors.try_recv().unwrap(), SessionError::NoDevice);
        assert_eq!(
            effects.metrics().summary().last_error.unwrap().error_type,
            "no-device"
        );
    }

    #[tokio::test]
    async fn stale_device_is_stopped() {
        let host = SimulatedHost::new();
        let (mut effects, _rx) = runner(&host);
        let device = host
            .request_device(&CaptureConstraints::default())
            .await
            .unwrap();

        effects.apply(Effect::ReleaseStaleDevice { device }, &mut VecDeque::new());
        assert_eq!(host.live_track_count(), 0);
        assert!(effects.resources().device().is_none());
    }
}
