//! # Designflow
//!
//! State reconciliation and recompute scheduling for a parametric design
//! session: reducers decide the next state, machines decide what to ask
//! collaborators for, effects execute.
//!
//! ## Core Concepts
//!
//! Designflow separates **facts** from **intent**:
//! - [`Event`] = Facts (a file tree arrived, the worker answered, a timer matured)
//! - [`Command`] = Intent (requests to the worker, settings store, file store, remote loader)
//!
//! Every event becomes one or more pure reducer applications producing an
//! immutable [`AppState`] snapshot. After every committed snapshot the
//! machines observe it, in a fixed order, and decide.
//!
//! ## Architecture
//!
//! ```text
//! UI / title bar / effects
//!     │
//!     ▼ emit()
//! Engine.run() loop ◄──────────── TimeoutSlot (single slot, RequestId-tagged)
//!     │                                 ▲
//!     ▼                                 │ arm / cancel
//! Dispatcher.handle(event)              │
//!     │                                 │
//!     ├─► reducer ─► Patch ─► Store ─► Arc<AppState> ─► watch (snapshots)
//!     │                          │
//!     │                          ├─► RecomputeScheduler.observe() ─► Generate + arm
//!     │                          ├─► PersistenceBridge.observe()  ─► Write (after load)
//!     │                          ├─► IngestionRouter.observe()    ─► Watch / cache Write
//!     │                          └─► ParameterRouter.observe()    ─► release held updates
//!     │
//!     └─► Commands ─► lanes ─► Effect.execute() ─► Events ─┐
//!                                                          │
//!     ▲────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reducers are pure** - time is passed in, a reducer that changes nothing hands back the same `Arc`
//! 2. **One recompute per change** - equality gates compare canonical projections, not identity
//! 3. **One timer** - arming replaces, and a stale firing is recognised by its [`RequestId`]
//! 4. **Load before save** - no settings write is emitted before the read reply was handled
//! 5. **Parameters wait for identity** - updates are held until the design has a name and a path
//! 6. **Sequential dispatch** - one event at a time, machines run in a fixed order
//!
//! ## Example
//!
//! ```ignore
//! use designflow::{EngineBuilder, EngineConfig, Event, FileStoreEvent, FileNode};
//!
//! let handle = EngineBuilder::new(EngineConfig::default())
//!     .with_worker(MyWorker::spawn()?)
//!     .with_settings_store(MySettings::open("settings.json")?)
//!     .build()
//!     .start();
//!
//! handle
//!     .emit(Event::Files(FileStoreEvent::Added {
//!         data: vec![FileNode::file("/gears/gear.js", source)],
//!     }))
//!     .await?;
//!
//! let state = handle.wait_for(|state| !state.is_busy()).await?;
//! ```

// Core modules
mod coercion;
mod config;
mod dispatch;
mod effect;
mod engine;
mod equality;
mod error;
mod export;
mod ingestion;
mod machine;
mod parameters;
mod persistence;
mod projection_macro;
mod resolver;
mod scheduler;
mod state;
mod store;
mod timer;

pub mod protocol;
pub mod reducers;

// Scenario tests (test-only)
#[cfg(test)]
mod scenario_tests;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export state types
pub use crate::state::{
    AppState, DesignOrigin, DesignState, FileNode, IoState, ParamDef, ParamKind,
    ParametersOrigin, RecomputeTimings, Solid, SolidKind, Status, ValueMap, ViewerState,
};

// Re-export store types
pub use store::{Patch, Store};

// Re-export error types
pub use crate::error::{DesignError, EngineError};

// Re-export configuration
pub use crate::config::{
    EngineConfig, Policy, DEFAULT_CACHED_GEOMETRY_PATH, DEFAULT_SETTINGS_KEY,
    DEFAULT_SOLIDS_TIMEOUT_MS,
};

// Re-export equality gates
pub use equality::{
    are_parameters_the_same, canonical, is_design_the_same, is_design_the_same_for_serialization,
    is_design_valid,
};

// Re-export pure collaborators
pub use coercion::{CoercionError, DefaultParameterCoercion, ParameterCoercion};
pub use export::{DefaultExportCatalog, ExportCatalog};
pub use resolver::{DefaultProjectResolver, ProjectResolver};

// Re-export protocol types
pub use protocol::{Command, Event, FileStoreEvent, FileStoreRequest, UiEvent, WorkerResponse};

// Re-export machine types
pub use ingestion::{document_uri, title_bar_parameters, IngestionRouter};
pub use machine::{Decision, Decisions, Machine};
pub use parameters::ParameterRouter;
pub use persistence::PersistenceBridge;
pub use scheduler::{RecomputePhase, RecomputeScheduler, RequestId, TimerOutcome};

// Re-export dispatcher types
pub use dispatch::{Clock, Collaborators, DispatchOutput, Dispatcher, TimerDirective};

// Re-export effect types
pub use effect::{Effect, EffectContext};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineHandle};
pub use timer::TimeoutSlot;

// Re-export commonly used external types
pub use async_trait::async_trait;
