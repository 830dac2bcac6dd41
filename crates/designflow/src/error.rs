//! Error types for designflow.
//!
//! Two families live here:
//!
//! - [`DesignError`] is a *value*. It is stored in [`Status::error`](crate::Status)
//!   and travels through the same state channel as every successful transition.
//!   Nothing in the engine throws it.
//! - [`EngineError`] covers plumbing failures around the async engine (closed
//!   channels, a stopped dispatcher). These are returned to callers.

use serde::Serialize;
use thiserror::Error;

use crate::state::ParametersOrigin;

/// Errors surfaced to the user through `status.error`.
///
/// None of these are fatal to the process. A new valid request clears the
/// error by virtue of the next reducer setting `error: None`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DesignError {
    #[error("Failed to generate design within an acceptable time ({timeout_ms} ms), bailing out")]
    RecomputeTimeout { timeout_ms: u64 },

    #[error("Geometry worker failed: {message}")]
    WorkerComputation { message: String },

    #[error("Invalid settings payload: {reason}")]
    InvalidSettingsPayload { reason: String },

    #[error("Could not apply parameters from {origin}: {reason}")]
    ParameterApplication {
        origin: ParametersOrigin,
        reason: String,
    },

    #[error("Failed to load {url}: {message}")]
    RemoteLoad { url: String, message: String },
}

impl DesignError {
    /// True for the timeout variant, which is the only one that triggers a
    /// worker cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DesignError::RecomputeTimeout { .. })
    }
}

/// Errors raised by the async engine and its handles.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine has stopped; the event channel is closed")]
    EventChannelClosed,

    #[error("Engine has stopped; the snapshot channel is closed")]
    SnapshotChannelClosed,

    #[error("Invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
}
