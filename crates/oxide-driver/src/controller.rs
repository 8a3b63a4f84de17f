//! Lifecycle controller.
//!
//! [`FrameDriver`] moves through
//! `Idle -> Loading -> Bound -> Running -> {Stopped, Failed}`.
//!
//! The load is the only suspension point and cannot be aborted, so the driver
//! decides what to do with its result when it arrives: if the driver was
//! unmounted meanwhile the fresh processor is released on the spot and no
//! scheduling ever starts. Teardown runs every step independently (cancel,
//! unsubscribe and final progress flush, then release) and logs, rather than
//! propagates, a failing step.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::loader::SharedModule;
use crate::media::MediaElement;
use crate::processor::ProcessorHandle;
use crate::scheduler::{FrameScheduler, ProcessingSession, SchedulingStrategy, SharedSession};
use crate::throttle::{ProgressObserver, UpdateThrottle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Loading,
    Bound,
    Running,
    Stopped,
    Failed,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn can_transition_to(self, next: DriverState) -> bool {
        use DriverState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Idle, Stopped)
                | (Loading, Bound)
                | (Loading, Stopped)
                | (Loading, Failed)
                | (Bound, Running)
                | (Bound, Stopped)
                | (Running, Stopped)
        )
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Bound => "bound",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Notifications published by a [`FrameDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    StateChanged { from: DriverState, to: DriverState },
    /// A progress value was delivered to the host observer.
    Progress { frames: u64 },
    /// Loading or binding the processor failed; playback continues unprocessed.
    LoadFailed { reason: String },
}

/// Point-in-time view of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub state: DriverState,
    pub strategy: SchedulingStrategy,
    pub scheduler_active: bool,
    pub frames_processed: u64,
    pub processing_errors: u64,
    pub emitted_updates: u64,
}

struct Lifecycle {
    state: DriverState,
    token: CancellationToken,
    strategy: SchedulingStrategy,
    scheduler: Option<FrameScheduler>,
    session: Option<SharedSession>,
    load_task: Option<JoinHandle<()>>,
}

struct DriverInner {
    element: Arc<dyn MediaElement>,
    module: Arc<SharedModule>,
    config: DriverConfig,
    observer: ProgressObserver,
    events: broadcast::Sender<DriverEvent>,
    state_tx: watch::Sender<DriverState>,
    torn_down: watch::Sender<bool>,
    emitted: Arc<AtomicU64>,
    lifecycle: Mutex<Lifecycle>,
}

/// Binds a processing engine to one media element and drives it for as long
/// as the element is mounted.
pub struct FrameDriver {
    inner: Arc<DriverInner>,
}

impl FrameDriver {
    pub fn new(
        element: Arc<dyn MediaElement>,
        module: Arc<SharedModule>,
        config: DriverConfig,
        observer: ProgressObserver,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(DriverState::Idle);
        let (torn_down, _) = watch::channel(false);
        Self {
            inner: Arc::new(DriverInner {
                element,
                module,
                config,
                observer,
                events,
                state_tx,
                torn_down,
                emitted: Arc::new(AtomicU64::new(0)),
                lifecycle: Mutex::new(Lifecycle {
                    state: DriverState::Idle,
                    token: CancellationToken::new(),
                    strategy: SchedulingStrategy::None,
                    scheduler: None,
                    session: None,
                    load_task: None,
                }),
            }),
        }
    }

    pub fn element_id(&self) -> &str {
        self.inner.element.id()
    }

    pub fn state(&self) -> DriverState {
        self.inner.lifecycle.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> DriverStats {
        let lifecycle = self.inner.lifecycle.lock();
        let (frames_processed, processing_errors) = lifecycle
            .session
            .as_ref()
            .map(|session| {
                let session = session.lock();
                (session.frames_processed(), session.processing_errors())
            })
            .unwrap_or((0, 0));
        DriverStats {
            state: lifecycle.state,
            strategy: lifecycle.strategy,
            scheduler_active: lifecycle
                .scheduler
                .as_ref()
                .is_some_and(FrameScheduler::is_active),
            frames_processed,
            processing_errors,
            emitted_updates: self.inner.emitted.load(Ordering::SeqCst),
        }
    }

    /// Start loading the processor. Must be called within a tokio runtime.
    /// Only the first call on an idle driver has an effect.
    pub fn mount(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != DriverState::Idle {
            debug!(element_id = self.element_id(), state = %lifecycle.state, "Mount ignored");
            return;
        }
        if self.inner.transition(&mut lifecycle, DriverState::Loading).is_err() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        lifecycle.load_task = Some(tokio::spawn(inner.run_load()));
    }

    /// Stop processing and release everything. Safe to call in any state and
    /// any number of times; returns once every cleanup step was attempted.
    pub async fn unmount(&self) {
        let pending = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.token.cancel();
            let state = lifecycle.state;
            match state {
                DriverState::Stopped => None,
                DriverState::Failed => {
                    lifecycle.load_task.take();
                    debug!(element_id = self.element_id(), "Driver failed earlier, nothing to release");
                    return;
                }
                _ => {
                    if self.inner.transition(&mut lifecycle, DriverState::Stopped).is_err() {
                        return;
                    }
                    Some((lifecycle.scheduler.take(), lifecycle.session.clone()))
                }
            }
        };

        let Some((scheduler, session)) = pending else {
            // stopped by an earlier call that may still be tearing down
            debug!(element_id = self.element_id(), "Already stopped, waiting for teardown");
            self.wait_torn_down().await;
            return;
        };
        self.inner.teardown(scheduler, session).await;
        self.inner.torn_down.send_replace(true);
    }

    async fn wait_torn_down(&self) {
        let mut rx = self.inner.torn_down.subscribe();
        // the sender lives in `inner`, so the channel cannot close here
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Wait until the driver is past loading, returning the state it settled in.
    pub async fn wait_settled(&self) -> DriverState {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = rx
            .wait_for(|state| !matches!(state, DriverState::Loading | DriverState::Bound))
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }
}

impl Drop for FrameDriver {
    /// Without an `unmount` the driver still never leaks: scheduling stops and
    /// the processor is released here. The scheduler task delivers the final
    /// progress value once it observes the cancellation.
    fn drop(&mut self) {
        let (scheduler, session) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.token.cancel();
            if lifecycle.state.is_terminal() {
                return;
            }
            let _ = self.inner.transition(&mut lifecycle, DriverState::Stopped);
            (lifecycle.scheduler.take(), lifecycle.session.clone())
        };
        if let Some(scheduler) = scheduler {
            scheduler.cancel();
        }
        if let Some(session) = session {
            release_processor(session.lock().processor_mut());
        }
        self.inner.torn_down.send_replace(true);
    }
}

impl DriverInner {
    fn transition(&self, lifecycle: &mut Lifecycle, next: DriverState) -> Result<(), DriverError> {
        let from = lifecycle.state;
        if !from.can_transition_to(next) {
            let err = DriverError::InvalidTransition { from, to: next };
            error!(element_id = self.element.id(), error = %err, "Rejected state change");
            return Err(err);
        }
        lifecycle.state = next;
        info!(element_id = self.element.id(), %from, to = %next, "Driver state changed");
        self.state_tx.send_replace(next);
        let _ = self.events.send(DriverEvent::StateChanged { from, to: next });
        Ok(())
    }

    async fn run_load(self: Arc<Self>) {
        let element_id = self.element.id().to_owned();
        let result = self.module.load(&element_id).await;

        let mut lifecycle = self.lifecycle.lock();
        match result {
            Ok(processor) => {
                if lifecycle.state != DriverState::Loading {
                    drop(lifecycle);
                    info!(%element_id, "Unmounted while loading, discarding processor");
                    let mut processor = processor;
                    release_processor(&mut processor);
                    return;
                }
                self.bind(&mut lifecycle, processor);
            }
            Err(e) => {
                error!(%element_id, error = %e, "Processor unavailable, playback continues unprocessed");
                lifecycle.token.cancel();
                if lifecycle.state == DriverState::Loading
                    && self.transition(&mut lifecycle, DriverState::Failed).is_ok()
                {
                    let _ = self.events.send(DriverEvent::LoadFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn bind(self: &Arc<Self>, lifecycle: &mut Lifecycle, processor: ProcessorHandle) {
        if self.transition(lifecycle, DriverState::Bound).is_err() {
            return;
        }
        let session: SharedSession = Arc::new(Mutex::new(ProcessingSession::new(processor)));
        let throttle = UpdateThrottle::new(self.config.throttle_interval(), self.progress_observer());
        let scheduler = FrameScheduler::start(
            Arc::clone(&session),
            Arc::clone(&self.element),
            throttle,
            lifecycle.token.child_token(),
            self.config.force_fallback,
        );
        lifecycle.strategy = scheduler.strategy();
        lifecycle.scheduler = Some(scheduler);
        lifecycle.session = Some(session);
        let _ = self.transition(lifecycle, DriverState::Running);
    }

    fn progress_observer(&self) -> ProgressObserver {
        let host = Arc::clone(&self.observer);
        let events = self.events.clone();
        let emitted = Arc::clone(&self.emitted);
        Arc::new(move |frames| {
            emitted.fetch_add(1, Ordering::SeqCst);
            host(frames);
            let _ = events.send(DriverEvent::Progress { frames });
        })
    }

    async fn teardown(&self, scheduler: Option<FrameScheduler>, session: Option<SharedSession>) {
        let element_id = self.element.id();

        // cancel, unsubscribe and flush the final progress value
        if let Some(mut scheduler) = scheduler
            && let Err(e) = scheduler.shutdown().await
        {
            warn!(element_id, error = %e, "Cleanup step failed");
        }

        let Some(session) = session else {
            return;
        };

        // release
        let frames = {
            let mut session = session.lock();
            release_processor(session.processor_mut());
            session.frames_processed()
        };
        info!(element_id, frames, "Driver torn down");
    }
}

fn release_processor(processor: &mut ProcessorHandle) {
    match processor.release() {
        Ok(true) => debug!(element_id = processor.element_id(), "Processor released"),
        Ok(false) => debug!(element_id = processor.element_id(), "Processor already released"),
        Err(e) => warn!(element_id = processor.element_id(), error = %e, "Cleanup step failed"),
    }
}
