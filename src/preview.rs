//! Preview binder: local self-view of the live capture stream

use std::sync::Arc;

use uuid::Uuid;

use crate::capture::CaptureStream;

/// What the display sink should render: a live stream, always muted since
/// the preview is a local monitor.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    pub stream: Arc<dyn CaptureStream>,
    pub muted: bool,
}

/// The UI surface showing the preview.
///
/// Given a feed it must render live video with audio muted; given `None` it
/// must render nothing (no stale frame). Starting playback may be
/// asynchronous on the sink's side; the binder does not wait for it.
pub trait DisplaySink: Send {
    fn show(&mut self, feed: Option<LiveFeed>);
}

/// A sink that renders nowhere.
#[derive(Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _feed: Option<LiveFeed>) {}
}

pub struct PreviewBinder {
    sink: Box<dyn DisplaySink>,
    bound: Option<Uuid>,
}

impl PreviewBinder {
    pub fn new(sink: Box<dyn DisplaySink>) -> Self {
        Self { sink, bound: None }
    }

    /// Bind `device` to the sink. Binding with no device clears the sink.
    pub fn bind(&mut self, device: Option<&Arc<dyn CaptureStream>>) {
        let Some(device) = device else {
            self.unbind();
            return;
        };
        if self.bound == Some(device.id()) {
            return;
        }
        log::debug!("Preview bound to stream {}", device.id());
        self.sink.show(Some(LiveFeed {
            stream: device.clone(),
            muted: true,
        }));
        self.bound = Some(device.id());
    }

    /// Detach the sink. Safe to call repeatedly.
    pub fn unbind(&mut self) {
        if let Some(id) = self.bound.take() {
            log::debug!("Preview unbound from stream {}", id);
        }
        self.sink.show(None);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}
