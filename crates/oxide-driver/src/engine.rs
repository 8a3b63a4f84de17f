//! Reference processing engine.
//!
//! `FrameCounterEngine` is a [`ModuleLoader`] whose instances count the frames
//! they process and remember the media time of the last one. Instantiation
//! latency and failures can be injected, and every call is tallied in
//! [`EngineStats`], which makes it the engine used by the demo CLI and by the
//! driver's tests.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::error::DriverError;
use crate::loader::{ModuleLoader, ModuleSource};
use crate::media::{MediaElement, MediaHost};
use crate::processor::{FrameProcessor, ProcessorFactory};

/// Failure and latency injection for [`FrameCounterEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Time one instantiation takes.
    pub load_latency: Duration,
    /// Number of instantiation attempts that fail before one succeeds.
    pub failed_instantiations: usize,
    /// 1-based indices of `process_frame` calls that fail, counted per instance.
    pub failing_calls: BTreeSet<u64>,
    /// Make `release` report an error (the instance is still gone afterwards).
    pub fail_release: bool,
}

impl EngineOptions {
    pub fn with_load_latency(mut self, latency: Duration) -> Self {
        self.load_latency = latency;
        self
    }

    pub fn with_failed_instantiations(mut self, count: usize) -> Self {
        self.failed_instantiations = count;
        self
    }

    pub fn with_failing_calls(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

/// Counters shared by an engine and every instance it constructs.
#[derive(Debug, Default)]
pub struct EngineStats {
    instantiations: AtomicUsize,
    instances: AtomicUsize,
    calls: AtomicU64,
    failures: AtomicU64,
    releases: AtomicUsize,
}

impl EngineStats {
    /// Instantiation attempts, failed ones included.
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    /// Instances constructed.
    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }

    /// `process_frame` invocations, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Loader for the reference engine.
pub struct FrameCounterEngine {
    host: Arc<MediaHost>,
    options: EngineOptions,
    stats: Arc<EngineStats>,
}

impl FrameCounterEngine {
    pub fn new(host: Arc<MediaHost>, options: EngineOptions) -> Self {
        Self {
            host,
            options,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl ModuleLoader for FrameCounterEngine {
    async fn instantiate(
        &self,
        source: &ModuleSource,
    ) -> Result<Arc<dyn ProcessorFactory>, DriverError> {
        let attempt = self.stats.instantiations.fetch_add(1, Ordering::SeqCst);
        if !self.options.load_latency.is_zero() {
            tokio::time::sleep(self.options.load_latency).await;
        }
        if attempt < self.options.failed_instantiations {
            return Err(DriverError::load(
                source.as_str(),
                format!("instantiation attempt {} failed", attempt + 1),
            ));
        }
        Ok(Arc::new(FrameCounterFactory {
            host: Arc::clone(&self.host),
            options: self.options.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct FrameCounterFactory {
    host: Arc<MediaHost>,
    options: EngineOptions,
    stats: Arc<EngineStats>,
}

impl ProcessorFactory for FrameCounterFactory {
    fn construct(&self, element_id: &str) -> Result<Box<dyn FrameProcessor>, DriverError> {
        let element = self
            .host
            .get(element_id)
            .ok_or_else(|| DriverError::bind(element_id, "no mounted media element with this id"))?;
        self.stats.instances.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FrameCounter {
            element,
            failing_calls: self.options.failing_calls.clone(),
            fail_release: self.options.fail_release,
            stats: Arc::clone(&self.stats),
            calls: 0,
            processed: 0,
            last_media_time: None,
        }))
    }
}

/// One reference engine instance.
pub struct FrameCounter {
    element: Arc<dyn MediaElement>,
    failing_calls: BTreeSet<u64>,
    fail_release: bool,
    stats: Arc<EngineStats>,
    calls: u64,
    processed: u64,
    last_media_time: Option<f64>,
}

impl FrameCounter {
    pub fn last_media_time(&self) -> Option<f64> {
        self.last_media_time
    }
}

impl FrameProcessor for FrameCounter {
    fn process_frame(&mut self) -> Result<(), DriverError> {
        self.calls += 1;
        self.stats.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_calls.contains(&self.calls) {
            self.stats.failures.fetch_add(1, Ordering::SeqCst);
            return Err(DriverError::processing(format!(
                "injected failure on call {}",
                self.calls
            )));
        }

        let media_time = self.element.playback().current_time;
        self.last_media_time = Some(media_time);
        self.processed += 1;
        trace!(element_id = self.element.id(), media_time, processed = self.processed, "Frame processed");
        Ok(())
    }

    fn frames_processed(&self) -> u64 {
        self.processed
    }

    fn release(&mut self) -> Result<(), DriverError> {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(DriverError::cleanup("release", "injected release failure"));
        }
        Ok(())
    }
}
