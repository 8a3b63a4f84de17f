//! # OxidePlayer driver
//!
//! Attaches a frame-processing engine to a playing video and reports how many
//! frames it processed, without getting in the way of playback.
//!
//! ## Overview
//!
//! - [`SharedModule`] loads the processing module once per process and binds
//!   engine instances to media elements ([`ProcessorHandle`]).
//! - [`FrameScheduler`] calls the engine once per presented frame, or once per
//!   time-advance event when the element cannot report presented frames.
//! - [`UpdateThrottle`] limits how often the processed-frame count reaches the
//!   host.
//! - [`FrameDriver`] sequences all of the above across mount and unmount and
//!   guarantees every bound engine is released exactly once.
//!
//! The host side is modelled by [`MediaElement`] ([`VideoElement`] in-process)
//! and the [`player`] component built on top of the driver.
//!
//! ## License
//!
//! MIT License
//!

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod loader;
pub mod media;
pub mod player;
pub mod processor;
pub mod scheduler;
pub mod throttle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::DriverConfig;
pub use controller::{DriverEvent, DriverState, DriverStats, FrameDriver};
pub use engine::{EngineOptions, EngineStats, FrameCounterEngine};
pub use error::{DriverError, MediaError};
pub use loader::{AssetLayout, DEFAULT_MODULE_NAME, ModuleLoader, ModuleSource, SharedModule};
pub use media::{FrameCallback, FrameMetadata, MediaElement, MediaHost, PlaybackState, TimeUpdate, VideoElement};
pub use player::{ControlsState, PlayerProps, ProcessingOverlay, VideoPlayer};
pub use processor::{FrameProcessor, ProcessorFactory, ProcessorHandle};
pub use scheduler::{FrameScheduler, ProcessingSession, SchedulingStrategy};
pub use throttle::{ProgressObserver, UpdateThrottle};
