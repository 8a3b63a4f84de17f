//! Frame scheduling.
//!
//! A [`FrameScheduler`] invokes the bound processor once per trigger and
//! reports the resulting count through the [`UpdateThrottle`]. The trigger is
//! picked once per session:
//!
//! - [`SchedulingStrategy::FramePresentation`]: one call per presented frame.
//!   A frame registration is made, awaited, processed, and only then renewed,
//!   so calls never overlap and never spin.
//! - [`SchedulingStrategy::FallbackTimer`]: one call per time-advance event.
//!   Coarser than the render rate; frames in between are not processed.
//!
//! Cancellation is cooperative. The token is checked under the session lock
//! right before every call, and [`FrameScheduler::cancel`] takes that lock
//! after cancelling, so a call in flight finishes before `cancel` returns and
//! no call starts afterwards.

use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::media::{FrameCallback, MediaElement, TimeUpdate};
use crate::processor::ProcessorHandle;
use crate::throttle::UpdateThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    FramePresentation,
    FallbackTimer,
    None,
}

impl SchedulingStrategy {
    /// Probe the element once. The result holds for the whole session.
    pub fn select(element: &dyn MediaElement, force_fallback: bool) -> Self {
        if !force_fallback && element.supports_frame_callbacks() {
            Self::FramePresentation
        } else {
            Self::FallbackTimer
        }
    }
}

impl std::fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FramePresentation => "frame-presentation",
            Self::FallbackTimer => "fallback-timer",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Processor plus the per-session processing counters.
#[derive(Debug)]
pub struct ProcessingSession {
    processor: ProcessorHandle,
    processing_errors: u64,
    consecutive_failures: u64,
}

impl ProcessingSession {
    pub fn new(processor: ProcessorHandle) -> Self {
        Self {
            processor,
            processing_errors: 0,
            consecutive_failures: 0,
        }
    }

    pub fn processor(&self) -> &ProcessorHandle {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut ProcessorHandle {
        &mut self.processor
    }

    pub fn frames_processed(&self) -> u64 {
        self.processor.frames_processed()
    }

    pub fn processing_errors(&self) -> u64 {
        self.processing_errors
    }

    /// Run one processing call. Failures are logged and counted, never
    /// propagated. Returns the processed-frame count afterwards.
    fn step(&mut self) -> u64 {
        match self.processor.process_frame() {
            Ok(()) => self.consecutive_failures = 0,
            Err(e) => {
                self.processing_errors += 1;
                self.consecutive_failures += 1;
                warn!(
                    element_id = self.processor.element_id(),
                    error = %e,
                    consecutive = self.consecutive_failures,
                    "Frame processing failed"
                );
            }
        }
        self.processor.frames_processed()
    }
}

pub type SharedSession = Arc<Mutex<ProcessingSession>>;

/// Drives processing calls for one bound processor.
pub struct FrameScheduler {
    strategy: SchedulingStrategy,
    token: CancellationToken,
    session: SharedSession,
    task: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    /// Pick a strategy and start the processing loop on the current runtime.
    ///
    /// The first trigger registration (frame callback or time-update listener)
    /// is in place when this returns.
    pub fn start(
        session: SharedSession,
        element: Arc<dyn MediaElement>,
        throttle: UpdateThrottle,
        token: CancellationToken,
        force_fallback: bool,
    ) -> Self {
        let mut strategy = SchedulingStrategy::select(element.as_ref(), force_fallback);

        let first_frame = match strategy {
            SchedulingStrategy::FramePresentation => match element.request_frame_callback() {
                Ok(callback) => Some(callback),
                Err(e) => {
                    warn!(element_id = element.id(), error = %e, "Frame callbacks unavailable, falling back to time updates");
                    strategy = SchedulingStrategy::FallbackTimer;
                    None
                }
            },
            _ => None,
        };

        info!(element_id = element.id(), %strategy, "Starting frame scheduler");

        let task = match first_frame {
            Some(callback) => tokio::spawn(run_frame_presentation(
                element,
                callback,
                session.clone(),
                throttle,
                token.clone(),
            )),
            None => tokio::spawn(run_fallback_timer(
                element.subscribe_time_updates(),
                session.clone(),
                throttle,
                token.clone(),
            )),
        };

        Self {
            strategy,
            token,
            session,
            task: Some(task),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// True while the loop is running and has not been cancelled.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished()) && !self.token.is_cancelled()
    }

    /// Stop issuing processing calls. Waits for a call in flight to finish.
    pub fn cancel(&self) {
        self.token.cancel();
        drop(self.session.lock());
    }

    /// Cancel and wait for the loop to exit. The loop delivers the final
    /// progress value on its way out.
    pub async fn shutdown(&mut self) -> Result<(), DriverError> {
        self.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|e| DriverError::cleanup("scheduler", e.to_string()))
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run one call unless cancelled. Returns the processed-frame count, or
/// `None` once the scheduler was cancelled.
fn process_once(session: &Mutex<ProcessingSession>, token: &CancellationToken) -> Option<u64> {
    let mut session = session.lock();
    if token.is_cancelled() {
        return None;
    }
    Some(session.step())
}

/// Hand the exact processed-frame count to the observer, however the loop
/// ended.
fn flush_final(session: &Mutex<ProcessingSession>, throttle: &mut UpdateThrottle) {
    let count = session.lock().frames_processed();
    if catch_unwind(AssertUnwindSafe(|| throttle.flush(count))).is_err() {
        let err = DriverError::cleanup("flush", "progress observer panicked");
        warn!(error = %err, "Cleanup step failed");
    }
}

async fn run_frame_presentation(
    element: Arc<dyn MediaElement>,
    mut pending: FrameCallback,
    session: SharedSession,
    mut throttle: UpdateThrottle,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = &mut pending => frame,
        };
        let Some(metadata) = frame else {
            debug!(element_id = element.id(), "Frame registration dropped by element");
            break;
        };

        let Some(count) = process_once(&session, &token) else {
            break;
        };
        debug!(
            presented = metadata.presented_frames,
            media_time = metadata.media_time,
            count,
            "Processed presented frame"
        );
        throttle.record(count);

        pending = match element.request_frame_callback() {
            Ok(callback) => callback,
            Err(e) => {
                warn!(element_id = element.id(), error = %e, "Cannot renew frame registration");
                break;
            }
        };
    }
    flush_final(&session, &mut throttle);
}

async fn run_fallback_timer(
    mut updates: broadcast::Receiver<TimeUpdate>,
    session: SharedSession,
    mut throttle: UpdateThrottle,
    token: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            update = updates.recv() => update,
        };
        match update {
            Ok(update) => {
                let Some(count) = process_once(&session, &token) else {
                    break;
                };
                debug!(media_time = update.current_time, count, "Processed on time update");
                throttle.record(count);
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Skipped time updates");
            }
            Err(RecvError::Closed) => break,
        }
    }
    flush_final(&session, &mut throttle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, EngineStats, FrameCounterEngine};
    use crate::loader::{ModuleSource, SharedModule};
    use crate::media::{MediaHost, VideoElement};
    use crate::test_utils::{init_tracing, wait_until};
    use std::time::Duration;

    struct Fixture {
        element: Arc<VideoElement>,
        session: SharedSession,
        stats: Arc<EngineStats>,
        emitted: Arc<Mutex<Vec<u64>>>,
    }

    impl Fixture {
        async fn new(frame_callbacks: bool, options: EngineOptions) -> Self {
            init_tracing();
            let host = Arc::new(MediaHost::new());
            let element = Arc::new(
                VideoElement::new("video-element", "clip.mp4").with_frame_callbacks(frame_callbacks),
            );
            element.load_metadata(60.0);
            element.play();
            host.mount(element.clone());

            let engine = FrameCounterEngine::new(host, options);
            let stats = engine.stats();
            let module = SharedModule::new(
                ModuleSource::parse("https://player.example/pkg/rust_wasm.js").unwrap(),
                Arc::new(engine),
            );
            let processor = module.load("video-element").await.unwrap();

            Self {
                element,
                session: Arc::new(Mutex::new(ProcessingSession::new(processor))),
                stats,
                emitted: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn start(&self, force_fallback: bool) -> FrameScheduler {
            let sink = self.emitted.clone();
            let throttle = UpdateThrottle::new(
                Duration::from_millis(250),
                Arc::new(move |count| sink.lock().push(count)),
            );
            FrameScheduler::start(
                self.session.clone(),
                self.element.clone(),
                throttle,
                CancellationToken::new(),
                force_fallback,
            )
        }

        async fn present_frames(&self, frames: usize) {
            for _ in 0..frames {
                self.element.wait_for_frame_request().await;
                assert_eq!(self.element.present_frame(), 1);
            }
        }
    }

    #[tokio::test]
    async fn one_call_per_presented_frame() {
        let fixture = Fixture::new(true, EngineOptions::default()).await;
        let mut scheduler = fixture.start(false);
        assert_eq!(scheduler.strategy(), SchedulingStrategy::FramePresentation);

        fixture.present_frames(10).await;
        // the 10th call completes before the loop renews its registration
        fixture.element.wait_for_frame_request().await;
        assert_eq!(fixture.stats.calls(), 10);

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_active());
        assert_eq!(fixture.element.pending_frame_callbacks(), 0);
        assert_eq!(fixture.element.present_frame(), 0);
        assert_eq!(fixture.stats.calls(), 10);
    }

    #[tokio::test]
    async fn fallback_processes_each_time_update() {
        let fixture = Fixture::new(false, EngineOptions::default()).await;
        let mut scheduler = fixture.start(false);
        assert_eq!(scheduler.strategy(), SchedulingStrategy::FallbackTimer);
        assert_eq!(fixture.element.time_update_listeners(), 1);

        for _ in 0..5 {
            fixture.element.advance(0.25);
        }
        let stats = fixture.stats.clone();
        wait_until(|| stats.calls() == 5).await;

        scheduler.shutdown().await.unwrap();
        assert_eq!(fixture.element.time_update_listeners(), 0);
        fixture.element.advance(0.25);
        tokio::task::yield_now().await;
        assert_eq!(fixture.stats.calls(), 5);
    }

    #[tokio::test]
    async fn forced_fallback_ignores_frame_callbacks() {
        let fixture = Fixture::new(true, EngineOptions::default()).await;
        let mut scheduler = fixture.start(true);
        assert_eq!(scheduler.strategy(), SchedulingStrategy::FallbackTimer);
        assert_eq!(fixture.element.pending_frame_callbacks(), 0);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn processing_failures_do_not_stop_the_loop() {
        let fixture = Fixture::new(true, EngineOptions::default().with_failing_calls([3])).await;
        let mut scheduler = fixture.start(false);

        fixture.present_frames(8).await;
        fixture.element.wait_for_frame_request().await;

        scheduler.shutdown().await.unwrap();
        assert_eq!(fixture.stats.calls(), 8);
        assert_eq!(fixture.stats.failures(), 1);
        let session = fixture.session.lock();
        assert_eq!(session.processing_errors(), 1);
        assert_eq!(session.frames_processed(), 7);
    }

    #[tokio::test]
    async fn no_calls_after_cancel_returns() {
        let fixture = Fixture::new(true, EngineOptions::default()).await;
        let scheduler = fixture.start(false);

        fixture.present_frames(3).await;
        fixture.element.wait_for_frame_request().await;
        scheduler.cancel();

        // a frame presented after cancel may still wake the loop, which must
        // notice the cancellation before calling the processor
        fixture.element.present_frame();
        tokio::task::yield_now().await;
        assert_eq!(fixture.stats.calls(), 3);
        drop(scheduler);
    }

    #[tokio::test]
    async fn shutdown_delivers_final_count() {
        let fixture = Fixture::new(true, EngineOptions::default()).await;
        let mut scheduler = fixture.start(false);

        fixture.present_frames(4).await;
        fixture.element.wait_for_frame_request().await;

        scheduler.shutdown().await.unwrap();
        assert_eq!(fixture.emitted.lock().last().copied(), Some(4));
        let emitted = fixture.emitted.lock().len();
        scheduler.shutdown().await.unwrap();
        assert_eq!(fixture.emitted.lock().len(), emitted);
    }

    #[tokio::test]
    async fn detached_element_ends_the_loop() {
        let fixture = Fixture::new(true, EngineOptions::default()).await;
        let mut scheduler = fixture.start(false);

        fixture.present_frames(2).await;
        fixture.element.wait_for_frame_request().await;
        fixture.element.detach();

        wait_until(|| !scheduler.is_active()).await;
        assert_eq!(fixture.emitted.lock().last().copied(), Some(2));
        scheduler.shutdown().await.unwrap();
    }
}
