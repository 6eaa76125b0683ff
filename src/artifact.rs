//! Finished recordings and their playback handles
//!
//! A playback handle is a `blob:` style URL that resolves to the artifact's
//! bytes until it is revoked. Revoked handles resolve to nothing.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const PLAYBACK_URL_PREFIX: &str = "blob:clipcam/";

/// Dereferenceable reference to an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaybackHandle {
    id: Uuid,
}

impl PlaybackHandle {
    pub fn url(&self) -> String {
        format!("{}{}", PLAYBACK_URL_PREFIX, self.id)
    }

    pub fn parse(url: &str) -> Option<Self> {
        let id = url.strip_prefix(PLAYBACK_URL_PREFIX)?;
        Uuid::parse_str(id).ok().map(|id| Self { id })
    }
}

/// A finalized recording.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub session_id: Uuid,
    pub bytes: Bytes,
    pub mime_type: String,
    pub duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub playback: PlaybackHandle,
}

/// Serializable summary of an artifact for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub playback_url: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub duration_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            playback_url: self.playback.url(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.bytes.len(),
            duration_secs: self.duration_secs,
            created_at: self.created_at,
        }
    }
}

/// Registry of live playback handles.
#[derive(Debug, Default)]
pub struct PlaybackRegistry {
    live: HashMap<PlaybackHandle, Bytes>,
}

impl PlaybackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle for `bytes`. Callers must revoke the previous artifact's
    /// handle first; the registry does not enforce a single live handle.
    pub fn create(&mut self, bytes: Bytes) -> PlaybackHandle {
        let handle = PlaybackHandle { id: Uuid::new_v4() };
        self.live.insert(handle.clone(), bytes);
        log::debug!("Playback handle created: {}", handle.url());
        handle
    }

    /// Invalidate `handle`. Returns false if it was already revoked.
    pub fn revoke(&mut self, handle: &PlaybackHandle) -> bool {
        let revoked = self.live.remove(handle).is_some();
        if revoked {
            log::debug!("Playback handle revoked: {}", handle.url());
        }
        revoked
    }

    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let handle = PlaybackHandle::parse(url)?;
        self.live.get(&handle).cloned()
    }

    pub fn is_live(&self, handle: &PlaybackHandle) -> bool {
        self.live.contains_key(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_handle_no_longer_resolves() {
        let mut registry = PlaybackRegistry::new();
        let handle = registry.create(Bytes::from_static(b"abc"));
        let url = handle.url();

        assert_eq!(registry.resolve(&url).as_deref(), Some(&b"abc"[..]));
        assert!(registry.revoke(&handle));
        assert!(registry.resolve(&url).is_none());
        assert!(!registry.revoke(&handle));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn handles_are_unique() {
        let mut registry = PlaybackRegistry::new();
        let a = registry.create(Bytes::from_static(b"a"));
        let b = registry.create(Bytes::from_static(b"a"));
        assert_ne!(a, b);
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn foreign_urls_do_not_parse() {
        assert!(PlaybackHandle::parse("https://example.com/video.webm").is_none());
        assert!(PlaybackHandle::parse("blob:clipcam/not-a-uuid").is_none());
    }
}
