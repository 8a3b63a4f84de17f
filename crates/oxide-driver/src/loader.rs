//! Processor loading.
//!
//! A processing module is instantiated at most once per process and location:
//! [`SharedModule`] guards the instantiation with a single-flight cell, so
//! concurrent loads wait on one instantiation and every later load reuses the
//! resident module. Each successful load then constructs one engine instance
//! bound to a media element id and hands it out as a [`ProcessorHandle`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DriverError;
use crate::processor::{ProcessorFactory, ProcessorHandle};

/// File name of the processing module's JavaScript glue.
pub const DEFAULT_MODULE_NAME: &str = "rust_wasm.js";

/// Path segment identifying an unbundled development tree.
const DEVELOPMENT_MARKER: &str = "/src/components/";

/// Process-wide modules, keyed by resolved module URL.
static GLOBAL_MODULES: LazyLock<Mutex<HashMap<String, Arc<SharedModule>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Where the player's assets are laid out relative to the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetLayout {
    /// Component served from `src/components/`, module in `src/pkg/`.
    Development,
    /// Bundled component with the module in a sibling `pkg/` directory.
    Bundled,
}

impl AssetLayout {
    pub fn detect(base: &Url) -> Self {
        if base.path().contains(DEVELOPMENT_MARKER) {
            Self::Development
        } else {
            Self::Bundled
        }
    }

    fn module_path(self, module_name: &str) -> String {
        match self {
            Self::Development => format!("../pkg/{module_name}"),
            Self::Bundled => format!("./pkg/{module_name}"),
        }
    }
}

/// Resolved location of a processing module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleSource {
    url: Url,
}

impl ModuleSource {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn parse(input: &str) -> Result<Self, DriverError> {
        Url::parse(input)
            .map(Self::new)
            .map_err(|e| DriverError::load(input, format!("invalid module URL: {e}")))
    }

    /// Resolve `module_name` against the URL of the component that loads it.
    pub fn resolve(base: &Url, module_name: &str) -> Result<Self, DriverError> {
        let layout = AssetLayout::detect(base);
        let url = base
            .join(&layout.module_path(module_name))
            .map_err(|e| DriverError::load(module_name, format!("cannot resolve against {base}: {e}")))?;
        debug!(%url, ?layout, "Resolved processing module");
        Ok(Self::new(url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Fetches and instantiates a processing module.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn instantiate(
        &self,
        source: &ModuleSource,
    ) -> Result<Arc<dyn ProcessorFactory>, DriverError>;
}

type BindingTable = Arc<Mutex<HashMap<String, usize>>>;

/// A processing module shared by every driver that loads it.
pub struct SharedModule {
    source: ModuleSource,
    loader: Arc<dyn ModuleLoader>,
    instance: OnceCell<Arc<dyn ProcessorFactory>>,
    bindings: BindingTable,
}

impl SharedModule {
    pub fn new(source: ModuleSource, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            source,
            loader,
            instance: OnceCell::new(),
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide module for `source`. The first caller's loader is used;
    /// later callers get the same module regardless of the loader they pass.
    pub fn global(source: ModuleSource, loader: Arc<dyn ModuleLoader>) -> Arc<Self> {
        GLOBAL_MODULES
            .lock()
            .entry(source.as_str().to_owned())
            .or_insert_with(|| Arc::new(Self::new(source, loader)))
            .clone()
    }

    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// Whether instantiation has completed successfully.
    pub fn is_resident(&self) -> bool {
        self.instance.initialized()
    }

    /// Live processor handles bound to `element_id` through this module.
    pub fn bindings(&self, element_id: &str) -> usize {
        self.bindings.lock().get(element_id).copied().unwrap_or(0)
    }

    /// Instantiate the module, or wait for the instantiation already running.
    /// A failed attempt is not cached.
    pub async fn instance(&self) -> Result<Arc<dyn ProcessorFactory>, DriverError> {
        self.instance
            .get_or_try_init(|| async {
                let start = Instant::now();
                info!(module = %self.source, "Instantiating processing module");
                let factory = self.loader.instantiate(&self.source).await?;
                info!(
                    module = %self.source,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Processing module resident"
                );
                Ok::<_, DriverError>(factory)
            })
            .await
            .cloned()
    }

    /// Load a processor bound to `element_id`.
    pub async fn load(&self, element_id: &str) -> Result<ProcessorHandle, DriverError> {
        if element_id.is_empty() {
            return Err(DriverError::bind(element_id, "empty media element id"));
        }

        let factory = self.instance().await?;
        let engine = factory.construct(element_id)?;
        let lease = self.lease(element_id);
        debug!(element_id, module = %self.source, "Processor bound");
        Ok(ProcessorHandle::new(element_id, engine, Some(lease)))
    }

    fn lease(&self, element_id: &str) -> BindingLease {
        let mut bindings = self.bindings.lock();
        let count = bindings.entry(element_id.to_owned()).or_insert(0);
        *count += 1;
        if *count > 1 {
            warn!(
                element_id,
                bindings = *count,
                "Multiple processors bound to one media element"
            );
        }
        BindingLease {
            element_id: element_id.to_owned(),
            bindings: Arc::clone(&self.bindings),
        }
    }
}

impl std::fmt::Debug for SharedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedModule")
            .field("source", &self.source)
            .field("resident", &self.is_resident())
            .finish()
    }
}

/// Counts one live binding of a media element until dropped.
#[derive(Debug)]
pub struct BindingLease {
    element_id: String,
    bindings: BindingTable,
}

impl Drop for BindingLease {
    fn drop(&mut self) {
        let mut bindings = self.bindings.lock();
        if let Some(count) = bindings.get_mut(&self.element_id) {
            *count -= 1;
            if *count == 0 {
                bindings.remove(&self.element_id);
            }
        }
    }
}
