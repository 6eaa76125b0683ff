//! Resource reclaimer
//!
//! Holds every resource that can leak (capture device, session timer,
//! artifact playback handle) and releases them on demand.

use std::sync::Arc;

use serde::Serialize;

use crate::artifact::{Artifact, PlaybackRegistry};
use crate::capture::CaptureStream;
use crate::clock::SessionClock;

/// What a call to `reclaim` actually released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimReport {
    pub tracks_stopped: usize,
    pub timer_cancelled: bool,
    pub playback_revoked: bool,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Stop every live track of `device`. Returns how many were live.
pub fn stop_tracks(device: &Arc<dyn CaptureStream>) -> usize {
    let mut stopped = 0;
    for track in device.tracks() {
        if track.is_live() {
            log::debug!("Stopping {:?} track", track.kind());
            track.stop();
            stopped += 1;
        }
    }
    stopped
}

#[derive(Default)]
pub struct ResourceSet {
    device: Option<Arc<dyn CaptureStream>>,
    clock: SessionClock,
    playback: PlaybackRegistry,
    artifact: Option<Artifact>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a freshly acquired device. A device still held is
    /// stopped first so at most one is ever live.
    pub fn install_device(&mut self, device: Arc<dyn CaptureStream>) {
        if let Some(previous) = self.device.replace(device) {
            let stopped = stop_tracks(&previous);
            log::warn!(
                "Replaced capture device {} while still held ({} tracks stopped)",
                previous.id(),
                stopped
            );
        }
    }

    pub fn device(&self) -> Option<&Arc<dyn CaptureStream>> {
        self.device.as_ref()
    }

    /// Stop the device's tracks and forget it. Returns tracks stopped.
    pub fn release_device(&mut self) -> usize {
        match self.device.take() {
            Some(device) => {
                let stopped = stop_tracks(&device);
                log::info!("Capture device {} released ({} tracks stopped)", device.id(), stopped);
                stopped
            }
            None => 0,
        }
    }

    pub fn clock_mut(&mut self) -> &mut SessionClock {
        &mut self.clock
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn playback(&self) -> &PlaybackRegistry {
        &self.playback
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Store a new artifact, revoking the previous one's handle first.
    pub fn publish(&mut self, build: impl FnOnce(&mut PlaybackRegistry) -> Artifact) -> &Artifact {
        self.revoke_playback();
        let artifact = build(&mut self.playback);
        self.artifact.insert(artifact)
    }

    /// Invalidate the current artifact and its playback handle.
    pub fn revoke_playback(&mut self) -> bool {
        match self.artifact.take() {
            Some(artifact) => self.playback.revoke(&artifact.playback),
            None => false,
        }
    }

    /// Release everything: device tracks, then the timer, then the playback
    /// handle. Idempotent and infallible.
    pub fn reclaim(&mut self) -> ReclaimReport {
        let report = ReclaimReport {
            tracks_stopped: self.release_device(),
            timer_cancelled: self.clock.end(),
            playback_revoked: self.revoke_playback(),
        };
        if report.is_empty() {
            log::debug!("Reclaim: nothing held");
        } else {
            log::info!("Reclaim: {:?}", report);
        }
        report
    }

    /// True when nothing is held.
    pub fn is_clear(&self) -> bool {
        self.device.is_none()
            && !self.clock.is_running()
            && self.artifact.is_none()
            && self.playback.live_count() == 0
    }
}
