use std::ops::RangeInclusive;
use std::path::Path;

use oxide_driver::DriverConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

/// Accepted simulation speed multipliers.
pub const SPEED_RANGE: RangeInclusive<f64> = 0.01..=100.0;

pub const MAX_FPS: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Simulated playback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_video_src")]
    pub video_src: String,
    /// URL of the component loading the processing module.
    #[serde(default = "default_module_base")]
    pub module_base: String,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Cadence of time-advance events.
    #[serde(default = "default_time_update_ms")]
    pub time_update_ms: u64,
    /// Wall-clock speed of the simulation; 2.0 plays twice as fast.
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "default_true")]
    pub frame_callbacks: bool,
    #[serde(default = "default_true")]
    pub show_overlay: bool,
    #[serde(default)]
    pub load_latency_ms: u64,
    #[serde(default)]
    pub fail_load: bool,
    /// 1-based processing calls that fail.
    #[serde(default)]
    pub fail_frames: Vec<u64>,
    /// Unmount after this many seconds of media time instead of at the end.
    #[serde(default)]
    pub unmount_after_secs: Option<f64>,
}

fn default_video_src() -> String {
    "sample.mp4".to_string()
}

fn default_module_base() -> String {
    "http://localhost:5173/".to_string()
}

fn default_duration_secs() -> f64 {
    5.0
}

fn default_fps() -> u32 {
    30
}

fn default_time_update_ms() -> u64 {
    250
}

fn default_speed() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            video_src: default_video_src(),
            module_base: default_module_base(),
            duration_secs: default_duration_secs(),
            fps: default_fps(),
            time_update_ms: default_time_update_ms(),
            speed: default_speed(),
            frame_callbacks: true,
            show_overlay: true,
            load_latency_ms: 0,
            fail_load: false,
            fail_frames: Vec::new(),
            unmount_after_secs: None,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let config = Self::parse(&raw)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let playback = &self.playback;
        if !(1..=MAX_FPS).contains(&playback.fps) {
            return Err(AppError::Config(format!("fps must be between 1 and {MAX_FPS}")));
        }
        if !(playback.duration_secs.is_finite() && playback.duration_secs > 0.0) {
            return Err(AppError::Config("duration must be a positive number of seconds".into()));
        }
        if !SPEED_RANGE.contains(&playback.speed) {
            return Err(AppError::Config(format!(
                "speed must be between {} and {}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end()
            )));
        }
        if playback.time_update_ms == 0 {
            return Err(AppError::Config("time update cadence must be at least 1 ms".into()));
        }
        if self.driver.event_capacity == 0 {
            return Err(AppError::Config("event capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
