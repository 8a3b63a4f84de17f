//! Video player component: a media element, the frame driver attached to it,
//! playback controls and the processing overlay.

mod controls;
mod overlay;

pub use controls::{ControlsState, FullscreenRequest, ProgressBar, format_time};
pub use overlay::{OVERLAY_LABEL, ProcessingOverlay};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::DriverConfig;
use crate::controller::FrameDriver;
use crate::loader::SharedModule;
use crate::media::{MediaElement, MediaHost, VideoElement};

/// Id of the element the player renders into.
pub const VIDEO_ELEMENT_ID: &str = "video-element";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProps {
    pub video_src: String,
    pub show_processing_overlay: bool,
    pub element_id: String,
}

impl PlayerProps {
    pub fn new(video_src: impl Into<String>) -> Self {
        Self {
            video_src: video_src.into(),
            show_processing_overlay: true,
            element_id: VIDEO_ELEMENT_ID.to_string(),
        }
    }

    pub fn with_overlay(mut self, show: bool) -> Self {
        self.show_processing_overlay = show;
        self
    }

    pub fn with_element_id(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = element_id.into();
        self
    }
}

pub struct VideoPlayer {
    props: PlayerProps,
    host: Arc<MediaHost>,
    element: Arc<VideoElement>,
    driver: FrameDriver,
    frames_processed: Arc<AtomicU64>,
    overlay: Arc<Mutex<ProcessingOverlay>>,
    controls: Mutex<ControlsState>,
}

impl VideoPlayer {
    pub fn new(
        props: PlayerProps,
        host: Arc<MediaHost>,
        module: Arc<SharedModule>,
        config: DriverConfig,
    ) -> Self {
        let element = Arc::new(VideoElement::new(&props.element_id, &props.video_src));
        Self::with_element(props, element, host, module, config)
    }

    /// Build around an existing element, e.g. one without frame callbacks.
    pub fn with_element(
        props: PlayerProps,
        element: Arc<VideoElement>,
        host: Arc<MediaHost>,
        module: Arc<SharedModule>,
        config: DriverConfig,
    ) -> Self {
        let frames_processed = Arc::new(AtomicU64::new(0));
        let overlay = Arc::new(Mutex::new(ProcessingOverlay::new(
            props.show_processing_overlay,
        )));

        let observer = {
            let frames_processed = frames_processed.clone();
            let overlay = overlay.clone();
            Arc::new(move |frames: u64| {
                frames_processed.store(frames, Ordering::SeqCst);
                overlay.lock().update(frames);
            })
        };
        let driver = FrameDriver::new(element.clone(), module, config, observer);

        Self {
            props,
            host,
            element,
            driver,
            frames_processed,
            overlay,
            controls: Mutex::new(ControlsState::default()),
        }
    }

    /// Put the element on the page and start the driver. Must be called
    /// within a tokio runtime.
    pub fn mount(&self) {
        self.host.mount(self.element.clone());
        self.controls.lock().sync(&self.element.playback());
        self.driver.mount();
        debug!(element_id = %self.props.element_id, src = %self.props.video_src, "Player mounted");
    }

    /// Stop the driver, then take the element off the page.
    pub async fn unmount(&self) {
        self.driver.unmount().await;
        if self.host.unmount(&self.props.element_id).is_some() {
            self.element.detach();
        }
    }

    pub fn props(&self) -> &PlayerProps {
        &self.props
    }

    pub fn element(&self) -> &Arc<VideoElement> {
        &self.element
    }

    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    /// Last processed-frame count reported by the driver.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::SeqCst)
    }

    /// The overlay, or `None` when it is disabled or dismissed.
    pub fn overlay(&self) -> Option<ProcessingOverlay> {
        let overlay = *self.overlay.lock();
        overlay.is_visible().then_some(overlay)
    }

    pub fn dismiss_overlay(&self) {
        self.overlay.lock().dismiss();
    }

    pub fn controls(&self) -> ControlsState {
        let mut controls = self.controls.lock();
        controls.sync(&self.element.playback());
        controls.clone()
    }

    pub fn toggle_play(&self) {
        self.controls.lock().toggle_play(&self.element);
    }

    pub fn toggle_fullscreen(&self) -> FullscreenRequest {
        self.controls.lock().toggle_fullscreen()
    }

    /// Seek to the position under `client_x` on `bar`.
    pub fn seek_at(&self, bar: ProgressBar, client_x: f64) -> f64 {
        let mut controls = self.controls.lock();
        controls.sync(&self.element.playback());
        controls.seek_to(&self.element, bar.fraction_at(client_x))
    }

    pub fn hover_at(&self, bar: ProgressBar, client_x: f64) -> Option<String> {
        let mut controls = self.controls.lock();
        controls.hover(bar.fraction_at(client_x));
        controls.hover_label()
    }

    pub fn leave_progress_bar(&self) {
        self.controls.lock().leave();
    }
}

impl std::fmt::Debug for VideoPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlayer")
            .field("props", &self.props)
            .field("state", &self.driver.state())
            .field("frames_processed", &self.frames_processed())
            .finish()
    }
}
