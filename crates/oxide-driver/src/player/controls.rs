//! Playback controls state: play/pause, seeking through the progress bar,
//! hover preview and fullscreen.

use crate::media::{MediaElement, PlaybackState, VideoElement};

/// Format seconds as `M:SS`. Anything that is not a finite time shows `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "0:00".to_string();
    }
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Horizontal extent of the progress bar in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressBar {
    pub left: f64,
    pub width: f64,
}

impl ProgressBar {
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    /// Fraction of the bar under `client_x`, clamped to `[0, 1]`.
    pub fn fraction_at(&self, client_x: f64) -> f64 {
        if self.width <= 0.0 {
            return 0.0;
        }
        ((client_x - self.left) / self.width).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullscreenRequest {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlsState {
    pub is_playing: bool,
    pub is_fullscreen: bool,
    pub current_time: f64,
    pub duration: f64,
    pub is_seeking: bool,
    pub hover_time: Option<f64>,
}

impl ControlsState {
    /// Mirror the element's play state and position.
    pub fn sync(&mut self, playback: &PlaybackState) {
        self.is_playing = !playback.paused;
        self.current_time = playback.current_time;
        if playback.duration.is_finite() {
            self.duration = playback.duration;
        }
    }

    /// Play when paused or ended, pause otherwise.
    pub fn toggle_play(&mut self, element: &VideoElement) {
        let playback = element.playback();
        if playback.paused || playback.ended {
            element.play();
        } else {
            element.pause();
        }
        self.sync(&element.playback());
    }

    pub fn toggle_fullscreen(&mut self) -> FullscreenRequest {
        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            FullscreenRequest::Enter
        } else {
            FullscreenRequest::Exit
        }
    }

    pub fn time_at(&self, fraction: f64) -> f64 {
        fraction.clamp(0.0, 1.0) * self.duration
    }

    /// Seek to the time under `fraction` of the progress bar.
    pub fn seek_to(&mut self, element: &VideoElement, fraction: f64) -> f64 {
        let target = self.time_at(fraction);
        element.seek(target);
        self.current_time = target;
        target
    }

    pub fn begin_drag(&mut self, element: &VideoElement, fraction: f64) -> f64 {
        self.is_seeking = true;
        self.seek_to(element, fraction)
    }

    /// Ignored unless a drag is in progress.
    pub fn drag_to(&mut self, element: &VideoElement, fraction: f64) -> Option<f64> {
        self.is_seeking.then(|| self.seek_to(element, fraction))
    }

    pub fn end_drag(&mut self) {
        self.is_seeking = false;
    }

    pub fn hover(&mut self, fraction: f64) {
        self.hover_time = Some(self.time_at(fraction));
    }

    pub fn leave(&mut self) {
        self.hover_time = None;
    }

    pub fn progress_percent(&self) -> f64 {
        if self.duration > 0.0 {
            self.current_time / self.duration * 100.0
        } else {
            0.0
        }
    }

    /// `current / duration`, e.g. `0:05 / 1:00`.
    pub fn time_display(&self) -> String {
        format!(
            "{} / {}",
            format_time(self.current_time),
            format_time(self.duration)
        )
    }

    /// Tooltip text for the hovered position, if any.
    pub fn hover_label(&self) -> Option<String> {
        self.hover_time.map(format_time)
    }
}
