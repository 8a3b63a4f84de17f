//! The external processing engine contract and the handle that owns one
//! bound engine instance.

use tracing::{debug, warn};

use crate::error::DriverError;
use crate::loader::BindingLease;

/// One engine instance bound to a media element.
///
/// Implementations are called strictly sequentially. `release` is called at
/// most once per instance by [`ProcessorHandle`].
pub trait FrameProcessor: Send {
    /// Process the frame the bound element is currently showing. May fail
    /// transiently.
    fn process_frame(&mut self) -> Result<(), DriverError>;

    /// Total frames processed so far. Never decreases.
    fn frames_processed(&self) -> u64;

    /// Free the instance's resources.
    fn release(&mut self) -> Result<(), DriverError>;
}

/// An instantiated processing module able to construct engine instances.
pub trait ProcessorFactory: Send + Sync {
    /// Construct an instance bound to `element_id`. Fails if the id does not
    /// name a mounted element.
    fn construct(&self, element_id: &str) -> Result<Box<dyn FrameProcessor>, DriverError>;
}

/// Exclusive owner of one bound engine instance.
///
/// The engine is released exactly once: either through [`release`](Self::release)
/// or, if that never happened, when the handle is dropped.
pub struct ProcessorHandle {
    element_id: String,
    engine: Option<Box<dyn FrameProcessor>>,
    frames_processed: u64,
    lease: Option<BindingLease>,
}

impl ProcessorHandle {
    pub(crate) fn new(
        element_id: impl Into<String>,
        engine: Box<dyn FrameProcessor>,
        lease: Option<BindingLease>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            frames_processed: engine.frames_processed(),
            engine: Some(engine),
            lease,
        }
    }

    /// Wrap an engine that is not tracked by a shared module.
    pub fn detached(element_id: impl Into<String>, engine: Box<dyn FrameProcessor>) -> Self {
        Self::new(element_id, engine, None)
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_none()
    }

    pub fn process_frame(&mut self) -> Result<(), DriverError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| DriverError::processing("processor already released"))?;
        let result = engine.process_frame();
        self.frames_processed = self.frames_processed.max(engine.frames_processed());
        result
    }

    /// Processed-frame count, frozen at its final value once released.
    pub fn frames_processed(&self) -> u64 {
        match &self.engine {
            Some(engine) => self.frames_processed.max(engine.frames_processed()),
            None => self.frames_processed,
        }
    }

    /// Release the engine. Returns `Ok(false)` if it was already released.
    pub fn release(&mut self) -> Result<bool, DriverError> {
        let Some(mut engine) = self.engine.take() else {
            return Ok(false);
        };
        self.frames_processed = self.frames_processed.max(engine.frames_processed());
        self.lease.take();
        debug!(element_id = %self.element_id, frames = self.frames_processed, "Releasing processor");
        engine
            .release()
            .map(|()| true)
            .map_err(|e| match e {
                DriverError::Cleanup { .. } => e,
                other => DriverError::cleanup("release", other.to_string()),
            })
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(element_id = %self.element_id, error = %e, "Processor release failed on drop");
        }
    }
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("element_id", &self.element_id)
            .field("released", &self.is_released())
            .field("frames_processed", &self.frames_processed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, EngineStats, FrameCounterEngine};
    use crate::loader::{ModuleLoader, ModuleSource};
    use crate::media::{MediaHost, VideoElement};
    use std::sync::Arc;

    async fn handle(options: EngineOptions) -> (ProcessorHandle, Arc<EngineStats>) {
        let host = Arc::new(MediaHost::new());
        host.mount(Arc::new(VideoElement::new("video-element", "clip.mp4")));
        let engine = FrameCounterEngine::new(host, options);
        let stats = engine.stats();
        let source = ModuleSource::parse("https://player.example/pkg/rust_wasm.js").unwrap();
        let factory = engine.instantiate(&source).await.unwrap();
        let processor = factory.construct("video-element").unwrap();
        (ProcessorHandle::detached("video-element", processor), stats)
    }

    #[tokio::test]
    async fn release_runs_once() {
        let (mut handle, stats) = handle(EngineOptions::default()).await;

        assert!(handle.release().unwrap());
        assert!(!handle.release().unwrap());
        assert!(handle.is_released());
        drop(handle);
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn drop_releases_unreleased_handle() {
        let (handle, stats) = handle(EngineOptions::default()).await;
        drop(handle);
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn count_survives_release() {
        let (mut handle, stats) = handle(EngineOptions::default()).await;
        for _ in 0..3 {
            handle.process_frame().unwrap();
        }
        handle.release().unwrap();
        assert_eq!(handle.frames_processed(), 3);
        assert!(handle.process_frame().is_err());
        assert_eq!(stats.calls(), 3);
    }

    #[tokio::test]
    async fn failing_release_is_reported_as_cleanup_error() {
        let (mut handle, stats) = handle(EngineOptions::default().with_failing_release()).await;
        let err = handle.release().unwrap_err();
        assert!(matches!(err, DriverError::Cleanup { step: "release", .. }));
        // never retried
        assert!(!handle.release().unwrap());
        drop(handle);
        assert_eq!(stats.releases(), 1);
    }
}
