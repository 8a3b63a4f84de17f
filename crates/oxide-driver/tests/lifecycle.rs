use std::sync::Arc;
use std::time::Duration;

use oxide_driver::{
    DriverConfig, DriverEvent, DriverState, EngineOptions, EngineStats, FrameCounterEngine,
    FrameDriver, MediaElement, MediaHost, ModuleSource, SchedulingStrategy, SharedModule,
    VideoElement,
};
use oxide_driver::test_utils::{init_tracing, wait_until};
use parking_lot::Mutex;
use tokio::sync::broadcast;

struct Harness {
    element: Arc<VideoElement>,
    driver: FrameDriver,
    stats: Arc<EngineStats>,
    reported: Arc<Mutex<Vec<u64>>>,
}

impl Harness {
    fn new(frame_callbacks: bool, options: EngineOptions, config: DriverConfig) -> Self {
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
        let module = Arc::new(SharedModule::new(
            ModuleSource::parse("https://player.example/pkg/rust_wasm.js").unwrap(),
            Arc::new(engine),
        ));

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let driver = FrameDriver::new(
            element.clone(),
            module,
            config,
            Arc::new(move |frames| sink.lock().push(frames)),
        );

        Self {
            element,
            driver,
            stats,
            reported,
        }
    }

    fn with_defaults() -> Self {
        Self::new(true, EngineOptions::default(), DriverConfig::default())
    }

    async fn start(&self) {
        self.driver.mount();
        assert_eq!(self.driver.wait_settled().await, DriverState::Running);
    }

    async fn present_frames(&self, frames: usize) {
        for _ in 0..frames {
            self.element.wait_for_frame_request().await;
            assert_eq!(self.element.present_frame(), 1);
        }
        self.element.wait_for_frame_request().await;
    }

    fn last_reported(&self) -> Option<u64> {
        self.reported.lock().last().copied()
    }
}

fn drain(events: &mut broadcast::Receiver<DriverEvent>) -> Vec<DriverEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn processes_each_frame_until_unmount() {
    let harness = Harness::with_defaults();
    harness.start().await;
    assert_eq!(
        harness.driver.stats().strategy,
        SchedulingStrategy::FramePresentation
    );

    harness.present_frames(10).await;
    assert_eq!(harness.stats.calls(), 10);

    harness.driver.unmount().await;
    assert_eq!(harness.driver.state(), DriverState::Stopped);
    assert_eq!(harness.element.pending_frame_callbacks(), 0);

    for _ in 0..5 {
        assert_eq!(harness.element.present_frame(), 0);
    }
    assert_eq!(harness.stats.calls(), 10);
    assert_eq!(harness.stats.releases(), 1);
    assert_eq!(harness.last_reported(), Some(10));
}

#[tokio::test]
async fn falls_back_to_time_updates() {
    let harness = Harness::new(false, EngineOptions::default(), DriverConfig::default());
    harness.start().await;
    assert_eq!(
        harness.driver.stats().strategy,
        SchedulingStrategy::FallbackTimer
    );

    for _ in 0..5 {
        harness.element.advance(0.25);
    }
    wait_until(|| harness.stats.calls() == 5).await;

    harness.driver.unmount().await;
    assert_eq!(harness.element.time_update_listeners(), 0);
    harness.element.advance(0.25);
    tokio::task::yield_now().await;
    assert_eq!(harness.stats.calls(), 5);
    assert_eq!(harness.stats.releases(), 1);
}

#[tokio::test]
async fn forced_fallback_ignores_frame_callbacks() {
    let harness = Harness::new(
        true,
        EngineOptions::default(),
        DriverConfig::default().with_force_fallback(true),
    );
    harness.start().await;
    assert_eq!(
        harness.driver.stats().strategy,
        SchedulingStrategy::FallbackTimer
    );
    assert_eq!(harness.element.pending_frame_callbacks(), 0);
    harness.driver.unmount().await;
}

#[tokio::test]
async fn rejected_load_leaves_playback_alone() {
    let harness = Harness::new(
        true,
        EngineOptions::default().with_failed_instantiations(1),
        DriverConfig::default(),
    );
    let mut events = harness.driver.subscribe();

    harness.driver.mount();
    assert_eq!(harness.driver.wait_settled().await, DriverState::Failed);

    let seen = drain(&mut events);
    assert!(
        seen.iter()
            .any(|event| matches!(event, DriverEvent::LoadFailed { .. }))
    );
    assert_eq!(harness.element.pending_frame_callbacks(), 0);
    assert_eq!(harness.element.present_frame(), 0);
    assert!(!harness.element.playback().paused);

    harness.driver.unmount().await;
    assert_eq!(harness.driver.state(), DriverState::Failed);
    assert_eq!(harness.stats.calls(), 0);
    assert_eq!(harness.stats.releases(), 0);
}

#[tokio::test]
async fn processing_failure_does_not_stop_later_frames() {
    let harness = Harness::new(
        true,
        EngineOptions::default().with_failing_calls([3]),
        DriverConfig::default(),
    );
    let mut events = harness.driver.subscribe();
    harness.start().await;

    harness.present_frames(6).await;
    assert_eq!(harness.stats.calls(), 6);
    assert_eq!(harness.stats.failures(), 1);

    let stats = harness.driver.stats();
    assert_eq!(stats.processing_errors, 1);
    assert_eq!(stats.frames_processed, 5);
    assert!(stats.scheduler_active);

    harness.driver.unmount().await;
    assert_eq!(harness.last_reported(), Some(5));
    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, DriverEvent::LoadFailed { .. }))
    );
}

#[tokio::test]
async fn unmount_during_load_releases_late_processor() {
    let harness = Harness::new(
        true,
        EngineOptions::default().with_load_latency(Duration::from_millis(50)),
        DriverConfig::default(),
    );
    harness.driver.mount();
    assert_eq!(harness.driver.state(), DriverState::Loading);

    harness.driver.unmount().await;
    assert_eq!(harness.driver.state(), DriverState::Stopped);

    wait_until(|| harness.stats.releases() == 1).await;
    assert_eq!(harness.stats.instances(), 1);
    assert_eq!(harness.element.pending_frame_callbacks(), 0);
    assert_eq!(harness.element.present_frame(), 0);
    assert_eq!(harness.stats.calls(), 0);
    assert_eq!(harness.driver.state(), DriverState::Stopped);
}

#[tokio::test]
async fn final_progress_matches_processed_count() {
    let harness = Harness::new(
        true,
        EngineOptions::default(),
        DriverConfig::default().with_throttle_interval(Duration::from_secs(10)),
    );
    harness.start().await;

    harness.present_frames(7).await;
    // only the first count gets through a long interval
    assert_eq!(*harness.reported.lock(), vec![1]);

    harness.driver.unmount().await;
    assert_eq!(*harness.reported.lock(), vec![1, 7]);
    assert_eq!(harness.driver.stats().emitted_updates, 2);
}

#[tokio::test]
async fn unmount_is_idempotent() {
    let harness = Harness::with_defaults();
    let mut events = harness.driver.subscribe();
    harness.start().await;
    harness.present_frames(2).await;

    harness.driver.unmount().await;
    harness.driver.unmount().await;
    harness.driver.unmount().await;

    assert_eq!(harness.stats.releases(), 1);
    let stops = drain(&mut events)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                DriverEvent::StateChanged {
                    to: DriverState::Stopped,
                    ..
                }
            )
        })
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn unmount_before_mount_never_loads() {
    let harness = Harness::with_defaults();
    harness.driver.unmount().await;
    harness.driver.mount();

    assert_eq!(harness.driver.state(), DriverState::Stopped);
    assert_eq!(harness.stats.instantiations(), 0);
}

#[tokio::test]
async fn dropping_driver_releases_processor() {
    let Harness {
        element,
        driver,
        stats,
        reported,
    } = Harness::new(
        true,
        EngineOptions::default(),
        DriverConfig::default().with_throttle_interval(Duration::from_secs(10)),
    );
    driver.mount();
    assert_eq!(driver.wait_settled().await, DriverState::Running);
    for _ in 0..7 {
        element.wait_for_frame_request().await;
        element.present_frame();
    }
    element.wait_for_frame_request().await;
    assert_eq!(*reported.lock(), vec![1]);

    drop(driver);
    assert_eq!(stats.releases(), 1);
    wait_until(|| element.pending_frame_callbacks() == 0).await;
    wait_until(|| reported.lock().last() == Some(&7)).await;
    assert_eq!(element.present_frame(), 0);
    assert_eq!(stats.calls(), 7);
}

#[tokio::test]
async fn failing_release_does_not_block_teardown() {
    let harness = Harness::new(
        true,
        EngineOptions::default().with_failing_release(),
        DriverConfig::default().with_throttle_interval(Duration::from_secs(10)),
    );
    harness.start().await;
    harness.present_frames(3).await;

    harness.driver.unmount().await;
    assert_eq!(harness.driver.state(), DriverState::Stopped);
    assert_eq!(harness.stats.releases(), 1);
    assert_eq!(harness.last_reported(), Some(3));
    assert_eq!(harness.element.pending_frame_callbacks(), 0);

    harness.driver.unmount().await;
    assert_eq!(harness.stats.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_load_then_load_fails() {
    let harness = Harness::new(
        true,
        EngineOptions::default()
            .with_load_latency(Duration::from_millis(50))
            .with_failed_instantiations(1),
        DriverConfig::default(),
    );
    let mut events = harness.driver.subscribe();
    harness.driver.mount();
    harness.driver.unmount().await;
    assert_eq!(harness.driver.state(), DriverState::Stopped);

    // let the load run past its latency and fail
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.stats.instantiations(), 1);

    assert_eq!(harness.driver.state(), DriverState::Stopped);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, DriverEvent::LoadFailed { .. }))
    );
    assert_eq!(harness.stats.instances(), 0);
    assert_eq!(harness.stats.releases(), 0);
    assert_eq!(harness.stats.calls(), 0);
}

#[tokio::test]
async fn concurrent_unmount_waits_for_teardown() {
    let harness = Harness::new(
        true,
        EngineOptions::default(),
        DriverConfig::default().with_throttle_interval(Duration::from_secs(10)),
    );
    harness.start().await;
    harness.present_frames(4).await;

    let (_, seen_by_second) = tokio::join!(harness.driver.unmount(), async {
        harness.driver.unmount().await;
        (harness.stats.releases(), harness.last_reported())
    });
    assert_eq!(seen_by_second, (1, Some(4)));
}
