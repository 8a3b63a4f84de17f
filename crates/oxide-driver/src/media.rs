//! Host media element boundary.
//!
//! [`MediaElement`] is the only view the driver has of the host's playable
//! element. [`VideoElement`] is an in-process implementation that presents
//! frames and fires time-advance events when told to, and [`MediaHost`] is the
//! registry of mounted elements that engines resolve ids against.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{Notify, broadcast, oneshot};
use tracing::{debug, trace};

use crate::error::MediaError;

/// Capacity of the time-update channel of a [`VideoElement`].
const TIME_UPDATE_CAPACITY: usize = 256;

/// Snapshot of an element's playback position and play state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    /// Current playback position in seconds.
    pub current_time: f64,
    /// Media duration in seconds, `NaN` until metadata is loaded.
    pub duration: f64,
    pub paused: bool,
    pub ended: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: f64::NAN,
            paused: true,
            ended: false,
        }
    }
}

/// Delivered with every frame-presentation notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    /// Number of frames the element has presented so far, this one included.
    pub presented_frames: u64,
    /// Media time of the presented frame in seconds.
    pub media_time: f64,
}

/// Delivered with every time-advance event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUpdate {
    pub current_time: f64,
}

/// One pending frame-presentation registration.
///
/// Resolves with the metadata of the next presented frame, or `None` when the
/// element goes away first. Dropping it cancels the registration.
#[derive(Debug)]
pub struct FrameCallback {
    rx: oneshot::Receiver<FrameMetadata>,
}

impl FrameCallback {
    pub fn new(rx: oneshot::Receiver<FrameMetadata>) -> Self {
        Self { rx }
    }
}

impl Future for FrameCallback {
    type Output = Option<FrameMetadata>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

/// The host's playable element as seen by the driver.
pub trait MediaElement: Send + Sync {
    /// Identifier the processing engine binds to.
    fn id(&self) -> &str;

    fn playback(&self) -> PlaybackState;

    /// Whether the element can notify once per actually presented frame.
    fn supports_frame_callbacks(&self) -> bool;

    /// Register for the next presented frame. Each registration fires once.
    fn request_frame_callback(&self) -> Result<FrameCallback, MediaError>;

    /// Listen for playback-position-advanced events. Dropping the receiver
    /// removes the listener.
    fn subscribe_time_updates(&self) -> broadcast::Receiver<TimeUpdate>;
}

#[derive(Debug, Default)]
struct ElementInner {
    playback: PlaybackState,
    presented_frames: u64,
    pending_frames: Vec<oneshot::Sender<FrameMetadata>>,
    detached: bool,
}

/// In-process video element.
///
/// Nothing happens on its own: the owner calls [`present_frame`](Self::present_frame)
/// and [`advance`](Self::advance) to simulate rendering and playback progress.
#[derive(Debug)]
pub struct VideoElement {
    id: String,
    src: String,
    inner: Mutex<ElementInner>,
    frame_callbacks: AtomicBool,
    time_tx: broadcast::Sender<TimeUpdate>,
    frame_requested: Notify,
}

impl VideoElement {
    pub fn new(id: impl Into<String>, src: impl Into<String>) -> Self {
        let (time_tx, _) = broadcast::channel(TIME_UPDATE_CAPACITY);
        Self {
            id: id.into(),
            src: src.into(),
            inner: Mutex::new(ElementInner::default()),
            frame_callbacks: AtomicBool::new(true),
            time_tx,
            frame_requested: Notify::new(),
        }
    }

    pub fn with_frame_callbacks(self, supported: bool) -> Self {
        self.frame_callbacks.store(supported, Ordering::SeqCst);
        self
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// Equivalent of the element finishing metadata loading.
    pub fn load_metadata(&self, duration: f64) {
        self.inner.lock().playback.duration = duration;
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.playback.ended {
            inner.playback.current_time = 0.0;
            inner.playback.ended = false;
        }
        inner.playback.paused = false;
    }

    pub fn pause(&self) {
        self.inner.lock().playback.paused = true;
    }

    /// Jump to `time`, clamped to the known duration. Fires a time update.
    pub fn seek(&self, time: f64) -> TimeUpdate {
        let update = {
            let mut inner = self.inner.lock();
            let duration = inner.playback.duration;
            let mut target = time.max(0.0);
            if duration.is_finite() {
                target = target.min(duration);
            }
            inner.playback.current_time = target;
            inner.playback.ended = false;
            TimeUpdate {
                current_time: target,
            }
        };
        self.emit(update);
        update
    }

    /// Move playback forward by `delta` seconds if playing and fire a time
    /// update. Reaching the end pauses the element.
    pub fn advance(&self, delta: f64) -> TimeUpdate {
        let update = {
            let mut inner = self.inner.lock();
            let playback = &mut inner.playback;
            if !playback.paused {
                playback.current_time += delta;
                if playback.duration.is_finite() && playback.current_time >= playback.duration {
                    playback.current_time = playback.duration;
                    playback.ended = true;
                    playback.paused = true;
                }
            }
            TimeUpdate {
                current_time: playback.current_time,
            }
        };
        self.emit(update);
        update
    }

    /// Present one frame at the current position, firing every pending
    /// frame registration. Returns how many registrations fired.
    pub fn present_frame(&self) -> usize {
        let (metadata, pending) = {
            let mut inner = self.inner.lock();
            if inner.detached {
                return 0;
            }
            inner.presented_frames += 1;
            let metadata = FrameMetadata {
                presented_frames: inner.presented_frames,
                media_time: inner.playback.current_time,
            };
            (metadata, std::mem::take(&mut inner.pending_frames))
        };

        let fired = pending
            .into_iter()
            .map(|tx| tx.send(metadata))
            .filter(Result::is_ok)
            .count();
        trace!(element_id = %self.id, presented = metadata.presented_frames, fired, "Frame presented");
        fired
    }

    /// Number of live frame registrations.
    pub fn pending_frame_callbacks(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.pending_frames.retain(|tx| !tx.is_closed());
        inner.pending_frames.len()
    }

    /// Number of attached time-update listeners.
    pub fn time_update_listeners(&self) -> usize {
        self.time_tx.receiver_count()
    }

    pub fn presented_frames(&self) -> u64 {
        self.inner.lock().presented_frames
    }

    /// Wait until somebody is registered for the next frame.
    pub async fn wait_for_frame_request(&self) {
        loop {
            let notified = self.frame_requested.notified();
            if self.pending_frame_callbacks() > 0 {
                return;
            }
            notified.await;
        }
    }

    /// Remove the element from the page. Pending registrations resolve empty
    /// and new ones are refused.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.detached = true;
        inner.pending_frames.clear();
        debug!(element_id = %self.id, "Media element detached");
    }

    fn emit(&self, update: TimeUpdate) {
        // no listeners is fine
        let _ = self.time_tx.send(update);
    }
}

impl MediaElement for VideoElement {
    fn id(&self) -> &str {
        &self.id
    }

    fn playback(&self) -> PlaybackState {
        self.inner.lock().playback
    }

    fn supports_frame_callbacks(&self) -> bool {
        self.frame_callbacks.load(Ordering::SeqCst)
    }

    fn request_frame_callback(&self) -> Result<FrameCallback, MediaError> {
        if !self.supports_frame_callbacks() {
            return Err(MediaError::unsupported(&self.id));
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.detached {
                return Err(MediaError::detached(&self.id));
            }
            inner.pending_frames.push(tx);
        }
        self.frame_requested.notify_waiters();
        Ok(FrameCallback::new(rx))
    }

    fn subscribe_time_updates(&self) -> broadcast::Receiver<TimeUpdate> {
        self.time_tx.subscribe()
    }
}

/// Registry of mounted media elements, keyed by id.
#[derive(Default)]
pub struct MediaHost {
    elements: Mutex<HashMap<String, Arc<dyn MediaElement>>>,
}

impl MediaHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `element`, replacing any element already mounted under its id.
    pub fn mount(&self, element: Arc<dyn MediaElement>) {
        let id = element.id().to_owned();
        if self.elements.lock().insert(id.clone(), element).is_some() {
            debug!(element_id = %id, "Replaced mounted media element");
        }
    }

    pub fn unmount(&self, id: &str) -> Option<Arc<dyn MediaElement>> {
        self.elements.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn MediaElement>> {
        self.elements.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.lock().contains_key(id)
    }
}

impl std::fmt::Debug for MediaHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.elements.lock().keys().cloned().collect();
        f.debug_struct("MediaHost").field("elements", &ids).finish()
    }
}
