use crate::DriverState;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("failed to load processing module `{module}`: {reason}")]
    Load { module: String, reason: String },

    #[error("failed to bind processor to media element `{element_id}`: {reason}")]
    Bind { element_id: String, reason: String },

    #[error("frame processing failed: {reason}")]
    Processing { reason: String },

    #[error("cleanup step `{step}` failed: {reason}")]
    Cleanup { step: &'static str, reason: String },

    #[error("invalid driver transition from {from} to {to}")]
    InvalidTransition { from: DriverState, to: DriverState },

    #[error("operation cancelled")]
    Cancelled,
}

impl DriverError {
    pub fn load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn bind(element_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            element_id: element_id.into(),
            reason: reason.into(),
        }
    }

    pub fn processing(reason: impl Into<String>) -> Self {
        Self::Processing {
            reason: reason.into(),
        }
    }

    pub fn cleanup(step: &'static str, reason: impl Into<String>) -> Self {
        Self::Cleanup {
            step,
            reason: reason.into(),
        }
    }

    /// Load and bind failures leave the video playing unprocessed; everything
    /// else is recovered where it happens.
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Bind { .. })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("media element `{element_id}` is detached")]
    Detached { element_id: String },

    #[error("media element `{element_id}` does not support frame callbacks")]
    Unsupported { element_id: String },
}

impl MediaError {
    pub fn detached(element_id: impl Into<String>) -> Self {
        Self::Detached {
            element_id: element_id.into(),
        }
    }

    pub fn unsupported(element_id: impl Into<String>) -> Self {
        Self::Unsupported {
            element_id: element_id.into(),
        }
    }
}
