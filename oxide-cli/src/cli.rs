use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

/// Play a simulated video with the frame processor attached and report
/// how many frames it processed.
#[derive(Parser, Debug)]
#[command(name = "oxide", version, about)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "OXIDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,

    /// Video source reference
    #[arg(long)]
    pub src: Option<String>,

    /// URL of the component loading the processing module
    #[arg(long)]
    pub module_base: Option<String>,

    /// Simulated video duration in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Frames presented per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Milliseconds between time-advance events
    #[arg(long)]
    pub time_update_ms: Option<u64>,

    /// Simulation speed multiplier
    #[arg(long)]
    pub speed: Option<f64>,

    /// Simulate an element without frame-presentation callbacks
    #[arg(long)]
    pub no_frame_callbacks: bool,

    /// Drive processing from time-advance events even when frame callbacks exist
    #[arg(long)]
    pub force_fallback: bool,

    /// Minimum milliseconds between progress updates
    #[arg(long)]
    pub throttle_ms: Option<u64>,

    /// Delay before the processing module becomes available
    #[arg(long)]
    pub load_latency_ms: Option<u64>,

    /// Make the processing module fail to load
    #[arg(long)]
    pub fail_load: bool,

    /// Processing call (1-based) that fails; repeatable
    #[arg(long = "fail-frame", value_name = "CALL")]
    pub fail_frames: Vec<u64>,

    /// Unmount the player after this many seconds of media time
    #[arg(long)]
    pub unmount_after: Option<f64>,

    /// Hide the processing overlay
    #[arg(long)]
    pub no_overlay: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Layer command-line values over `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        let playback = &mut config.playback;
        if let Some(src) = &self.src {
            playback.video_src = src.clone();
        }
        if let Some(base) = &self.module_base {
            playback.module_base = base.clone();
        }
        if let Some(duration) = self.duration {
            playback.duration_secs = duration;
        }
        if let Some(fps) = self.fps {
            playback.fps = fps;
        }
        if let Some(ms) = self.time_update_ms {
            playback.time_update_ms = ms;
        }
        if let Some(speed) = self.speed {
            playback.speed = speed;
        }
        if self.no_frame_callbacks {
            playback.frame_callbacks = false;
        }
        if self.no_overlay {
            playback.show_overlay = false;
        }
        if let Some(ms) = self.load_latency_ms {
            playback.load_latency_ms = ms;
        }
        if self.fail_load {
            playback.fail_load = true;
        }
        if !self.fail_frames.is_empty() {
            playback.fail_frames = self.fail_frames.clone();
        }
        if self.unmount_after.is_some() {
            playback.unmount_after_secs = self.unmount_after;
        }

        if self.force_fallback {
            config.driver.force_fallback = true;
        }
        if let Some(ms) = self.throttle_ms {
            config.driver.throttle_interval_ms = ms;
        }
    }
}
