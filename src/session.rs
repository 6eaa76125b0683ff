//! Recording session manager
//!
//! Owns the authoritative `State` and the effect runner. Every user intent
//! and host notification goes through `dispatch`, one event at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};

use crate::artifact::Artifact;
use crate::capture::CaptureHost;
use crate::effects::SessionEffects;
use crate::error::SessionError;
use crate::metrics::SessionMetrics;
use crate::preview::DisplaySink;
use crate::reclaim::stop_tracks;
use crate::settings::RecorderSettings;
use crate::state_machine::{reduce, Effect, Event, PermissionState, State};
use crate::{state_to_ui, SessionHandle, UiState};

pub struct SessionManager {
    state: State,
    effects: SessionEffects,
    /// Host, clock and encoder notifications.
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    /// Commands from `SessionHandle`s. The manager's own sender is dropped
    /// by `release_control`, after which the channel closes with the last
    /// handle.
    control_tx: Option<mpsc::UnboundedSender<Event>>,
    control_rx: mpsc::UnboundedReceiver<Event>,
    ui: watch::Sender<UiState>,
    /// Follow-up events produced while applying effects; drained before
    /// `dispatch` returns.
    pending: VecDeque<Event>,
}

impl SessionManager {
    pub fn new(
        host: Arc<dyn CaptureHost>,
        sink: Box<dyn DisplaySink>,
        settings: RecorderSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let state = State::default();
        let (ui, _) = watch::channel(state_to_ui(&state, None));
        Self {
            effects: SessionEffects::new(host, sink, settings, tx.clone()),
            state,
            tx,
            rx,
            control_tx: Some(control_tx),
            control_rx,
            ui,
            pending: VecDeque::new(),
        }
    }

    /// Register the callback that receives each finished recording.
    pub fn on_complete(mut self, callback: impl FnMut(&Bytes, u64) + Send + 'static) -> Self {
        self.effects.set_on_complete(Box::new(callback));
        self
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Request the capture device. Also serves as "try again" from the
    /// error view.
    pub fn acquire(&mut self) {
        self.dispatch(Event::Acquire);
    }

    pub fn try_again(&mut self) {
        self.acquire();
    }

    pub fn start(&mut self) {
        self.dispatch(Event::StartRecording);
    }

    pub fn stop(&mut self) {
        self.dispatch(Event::StopRecording);
    }

    pub fn view_artifact(&mut self) {
        self.dispatch(Event::ViewArtifact);
    }

    pub fn reset(&mut self) {
        self.dispatch(Event::Reset);
    }

    /// Discard any recording in progress and release every resource.
    pub fn reclaim(&mut self) {
        self.dispatch(Event::Reclaim);
    }

    /// Final cleanup when the owner goes away. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.dispatch(Event::Reclaim);
        let report = self.effects.shutdown();
        if !report.is_empty() {
            log::warn!("Teardown released resources the reclaim missed: {:?}", report);
        }
        log::info!("Session torn down");
    }

    /// Run one event through the reducer and execute its effects.
    pub fn dispatch(&mut self, event: Event) {
        self.pending.push_back(event);

        while let Some(event) = self.pending.pop_front() {
            match &event {
                Event::Fragment { id, bytes } => {
                    log::debug!("Fragment for {} ({} bytes)", id, bytes.len())
                }
                Event::ClockTick { id } => log::debug!("Clock tick for {}", id),
                other => log::debug!("Received event: {:?}", other),
            }

            let old_discriminant = std::mem::discriminant(&self.state);
            let (next, effects) = reduce(&self.state, event);
            if old_discriminant != std::mem::discriminant(&next) {
                log::info!("State transition: {:?} -> {:?}", self.state, next);
            }
            self.state = next;

            for effect in effects {
                match effect {
                    Effect::EmitUi => self.emit_ui(),
                    other => self.effects.apply(other, &mut self.pending),
                }
            }
        }
    }

    /// Handle every event already waiting, commands first, without
    /// blocking. Returns false once `Exit` has been seen.
    pub fn process_pending(&mut self) -> bool {
        loop {
            let event = match self.control_rx.try_recv() {
                Ok(event) => event,
                Err(_) => match self.rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => return true,
                },
            };
            if matches!(event, Event::Exit) {
                self.teardown();
                return false;
            }
            self.dispatch(event);
        }
    }

    /// Wait for the next command or notification. Returns `None` once control
    /// has been released and every `SessionHandle` is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        tokio::select! {
            command = self.control_rx.recv() => command,
            Some(event) = self.rx.recv() => Some(event),
        }
    }

    /// Drop the manager's own command sender so that the command channel
    /// closes when the last `SessionHandle` is dropped.
    pub fn release_control(&mut self) {
        self.control_tx = None;
    }

    fn emit_ui(&self) {
        let snapshot = self.ui_state();
        log::debug!("Emitting UI state: {:?}", serde_json::to_string(&snapshot));
        self.ui.send_replace(snapshot);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn permission(&self) -> PermissionState {
        self.state.permission()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.state.elapsed_secs()
    }

    pub fn is_reviewing(&self) -> bool {
        matches!(self.state, State::Recorded { reviewing: true, .. })
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.effects.resources().artifact()
    }

    /// Bytes behind a playback URL, while that URL is still valid.
    pub fn resolve_playback(&self, url: &str) -> Option<Bytes> {
        self.effects.resources().playback().resolve(url)
    }

    /// Live tracks on the held device (zero when none is held).
    pub fn live_tracks(&self) -> usize {
        self.effects
            .resources()
            .device()
            .map_or(0, |device| device.live_tracks())
    }

    pub fn is_clock_running(&self) -> bool {
        self.effects.resources().clock().is_running()
    }

    pub fn is_preview_bound(&self) -> bool {
        self.effects.preview().is_bound()
    }

    /// True when no device, timer or playback handle is held.
    pub fn resources_clear(&self) -> bool {
        self.effects.resources().is_clear()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        self.effects.metrics()
    }

    /// Device requests issued so far.
    pub fn acquisitions(&self) -> u64 {
        self.effects.acquisitions()
    }

    pub fn settings(&self) -> &RecorderSettings {
        self.effects.settings()
    }

    pub fn ui_state(&self) -> UiState {
        state_to_ui(&self.state, self.artifact())
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    pub fn errors(&self) -> broadcast::Receiver<SessionError> {
        self.effects.subscribe_errors()
    }

    /// A handle for sending commands. After `release_control` the returned
    /// handle is already closed.
    pub fn handle(&self) -> SessionHandle {
        match &self.control_tx {
            Some(tx) => SessionHandle::new(tx.clone()),
            None => {
                let (tx, _) = mpsc::unbounded_channel();
                SessionHandle::new(tx)
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();

        // Closing makes in-flight acquisitions release their own device;
        // anything already buffered is released here.
        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            if let Event::DeviceAcquired { device, .. } = event {
                let stopped = stop_tracks(&device);
                log::info!("Released late device {} ({} tracks)", device.id(), stopped);
            }
        }
    }
}
