//! Headless playback: presents frames and fires time updates on a timer
//! while a [`VideoPlayer`] processes them.

use std::sync::Arc;
use std::time::Duration;

use oxide_driver::player::VIDEO_ELEMENT_ID;
use oxide_driver::{
    DEFAULT_MODULE_NAME, DriverEvent, DriverStats, EngineOptions, FrameCounterEngine,
    MediaElement, MediaHost, ModuleSource, PlayerProps, ProcessingOverlay, SharedModule,
    VideoElement, VideoPlayer,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppConfig, PlaybackConfig};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub module: String,
    pub presented_frames: u64,
    pub media_time: f64,
    pub reported_frames: u64,
    pub stats: DriverStats,
}

pub async fn run(config: &AppConfig) -> Result<PlaybackReport> {
    let playback = &config.playback;
    let host = Arc::new(MediaHost::new());
    let module = shared_module(playback, host.clone())?;

    let element = Arc::new(
        VideoElement::new(VIDEO_ELEMENT_ID, &playback.video_src)
            .with_frame_callbacks(playback.frame_callbacks),
    );
    element.load_metadata(playback.duration_secs);

    let props = PlayerProps::new(&playback.video_src).with_overlay(playback.show_overlay);
    let player = VideoPlayer::with_element(
        props,
        element.clone(),
        host,
        module.clone(),
        config.driver.clone(),
    );
    let mut events = player.driver().subscribe();

    player.mount();
    player.toggle_play();
    info!(src = %playback.video_src, module = %module.source(), "Playback started");

    let frame_time = 1.0 / f64::from(playback.fps);
    let update_every = Duration::from_millis(playback.time_update_ms).as_secs_f64();
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(frame_time / playback.speed));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut elapsed = 0.0;
    let mut since_update = 0.0;
    loop {
        ticker.tick().await;
        element.present_frame();
        elapsed += frame_time;
        since_update += frame_time;
        if since_update >= update_every {
            element.advance(since_update);
            since_update = 0.0;
        }
        log_events(&mut events, &player);

        if element.playback().ended {
            debug!(elapsed, "Reached end of media");
            break;
        }
        if playback.unmount_after_secs.is_some_and(|limit| elapsed >= limit) {
            info!(elapsed, "Unmounting early");
            break;
        }
    }

    player.unmount().await;
    log_events(&mut events, &player);

    Ok(PlaybackReport {
        module: module.source().to_string(),
        presented_frames: element.presented_frames(),
        media_time: element.playback().current_time,
        reported_frames: player.frames_processed(),
        stats: player.driver().stats(),
    })
}

fn shared_module(playback: &PlaybackConfig, host: Arc<MediaHost>) -> Result<Arc<SharedModule>> {
    let base = Url::parse(&playback.module_base)
        .map_err(|e| AppError::Config(format!("invalid module base {}: {e}", playback.module_base)))?;
    let source = ModuleSource::resolve(&base, DEFAULT_MODULE_NAME)?;

    let mut options = EngineOptions::default()
        .with_load_latency(Duration::from_millis(playback.load_latency_ms))
        .with_failing_calls(playback.fail_frames.iter().copied());
    if playback.fail_load {
        options = options.with_failed_instantiations(usize::MAX);
    }
    let engine = FrameCounterEngine::new(host, options);
    Ok(SharedModule::global(source, Arc::new(engine)))
}

fn log_events(events: &mut broadcast::Receiver<DriverEvent>, player: &VideoPlayer) {
    loop {
        match events.try_recv() {
            Ok(DriverEvent::Progress { frames }) => {
                if player.overlay().is_some() {
                    let mut overlay = ProcessingOverlay::new(true);
                    overlay.update(frames);
                    info!("{}: {}", overlay.label(), overlay.frames_text());
                }
            }
            Ok(DriverEvent::LoadFailed { reason }) => {
                warn!(%reason, "Processing unavailable, playing unprocessed");
            }
            Ok(DriverEvent::StateChanged { from, to }) => debug!(%from, %to, "Driver state"),
            Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "Missed driver events"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}
