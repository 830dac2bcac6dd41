//! Pure state transitions.
//!
//! Every reducer reads the snapshot it is given and returns a [`Patch`]
//! holding only the substates it changed. Time is passed in, never read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::coercion::ParameterCoercion;
use crate::config::Policy;
use crate::error::DesignError;
use crate::export::ExportCatalog;
use crate::protocol::{GenerateRequest, GeometryCache, GeometryResult, PersistedDesign};
use crate::resolver::{dir_name, ProjectResolver};
use crate::state::{
    AppState, DesignOrigin, DesignState, FileNode, ParamDef, ParametersOrigin, Status, ValueMap,
    ViewerState,
};
use crate::store::Patch;

/// A project tree plus the path it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignContent {
    pub files_and_folders: Vec<FileNode>,
    pub path: String,
}

/// One parameter update from any source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub values: Option<ValueMap>,
    pub defaults: Option<ValueMap>,
    pub definitions: Option<Vec<ParamDef>>,
    pub origin: ParametersOrigin,
}

impl ParameterUpdate {
    pub fn values(values: ValueMap, origin: ParametersOrigin) -> Self {
        Self {
            values: Some(values),
            defaults: None,
            definitions: None,
            origin,
        }
    }
}

fn status_of(state: &AppState) -> Status {
    state.status.clone().unwrap_or_default()
}

fn app_title(name: &str) -> String {
    format!("designflow v{}: {}", env!("CARGO_PKG_VERSION"), name)
}

/// The zero-value session.
pub fn initialize() -> AppState {
    initialize_with(Policy::default())
}

/// The zero-value session with configured policy defaults.
pub fn initialize_with(policy: Policy) -> AppState {
    AppState {
        design: Arc::new(DesignState::with_policy(policy)),
        status: None,
        io: None,
        viewer: ViewerState::default(),
        app_title: app_title(""),
    }
}

/// Reset identity, parameters and geometry for a new design, keeping policy
/// knobs (`auto_reload`, `instant_update`, `solids_time_out`,
/// `convert_supported_types`, `vtree_mode`).
pub fn reset_design(state: &AppState, origin: DesignOrigin) -> Patch {
    info!(?origin, "design: reset");
    let current = &state.design;
    let zero = DesignState::default();
    Patch::design(DesignState {
        name: zero.name,
        path: zero.path,
        main_path: zero.main_path,
        origin: Some(origin),
        files_and_folders: zero.files_and_folders,
        parameter_definitions: zero.parameter_definitions,
        parameter_values: zero.parameter_values,
        parameter_defaults: zero.parameter_defaults,
        lookup: zero.lookup,
        lookup_counts: zero.lookup_counts,
        debug: zero.debug,
        solids: zero.solids,
        ..(**current).clone()
    })
}

/// Install a new project tree. Marks the session busy: a recompute follows.
pub fn set_design_content(
    state: &AppState,
    content: DesignContent,
    resolver: &dyn ProjectResolver,
    now: DateTime<Utc>,
) -> Patch {
    let DesignContent {
        files_and_folders,
        path: root_path,
    } = content;
    let main_path = resolver.entry_point(&files_and_folders, &root_path);
    let name = resolver.design_name(&files_and_folders, &root_path);
    debug!(%root_path, %main_path, %name, "design: set content");

    let mut design = (*state.design).clone();
    design.path = dir_name(&root_path);
    design.name = name;
    design.main_path = main_path;
    design.files_and_folders = files_and_folders;
    design.debug.start_time = now;

    Patch {
        app_title: Some(app_title(&design.name)),
        design: Some(Arc::new(design)),
        status: Some(Status {
            busy: true,
            error: None,
        }),
        io: None,
        viewer: Some(ViewerState {
            reset_view_on: vec![String::new()],
            zoom_to_fit_on: vec!["new-entities".to_string()],
        }),
    }
}

/// Replace solids, lookup and lookup counts together and stop being busy.
pub fn set_design_solids(
    state: &AppState,
    result: GeometryResult,
    exports: &dyn ExportCatalog,
    now: DateTime<Utc>,
) -> Patch {
    let mut design = (*state.design).clone();
    design.solids = result.solids.unwrap_or_default();
    design.lookup = result.lookup.unwrap_or_default();
    design.lookup_counts = result.lookup_counts.unwrap_or_default();
    design.debug.end_time = now;
    design.debug.total_time = (now - design.debug.start_time).num_milliseconds();
    info!(
        total_time_ms = design.debug.total_time,
        solids = design.solids.len(),
        "design: solids regenerated"
    );

    let io = exports.io_for(&design);
    let status = Status {
        busy: false,
        ..status_of(state)
    };
    Patch {
        design: Some(Arc::new(design)),
        status: Some(status),
        io: Some(io),
        ..Patch::default()
    }
}

/// Merge a parameter update: explicit values win over supplied defaults,
/// which win over the current values.
///
/// A live edit (`UiInstantUpdate`) while instant update is off only records
/// its origin. A coercion failure leaves the design untouched and surfaces a
/// [`DesignError::ParameterApplication`].
pub fn set_design_parameters(
    state: &AppState,
    update: ParameterUpdate,
    coercion: &dyn ParameterCoercion,
    now: DateTime<Utc>,
) -> Patch {
    let current = &state.design;
    let origin = update.origin;
    debug!(%origin, "design: set parameters");

    if origin == ParametersOrigin::UiInstantUpdate && !current.instant_update {
        let mut design = (**current).clone();
        design.parameters_origin = Some(origin);
        return Patch::design(design);
    }

    let defaults = update
        .defaults
        .clone()
        .unwrap_or_else(|| current.parameter_defaults.clone());
    let definitions = update
        .definitions
        .unwrap_or_else(|| current.parameter_definitions.clone());
    let raw = update
        .values
        .or(update.defaults)
        .unwrap_or_else(|| current.parameter_values.clone());

    let values = match coercion.apply(&raw, &definitions) {
        Ok(values) => values,
        Err(err) => {
            return reject_parameters(origin, err.to_string());
        }
    };

    let mut design = (**current).clone();
    design.parameter_defaults = defaults;
    design.parameter_definitions = definitions;
    design.parameter_values = values;
    design.parameters_origin = Some(origin);
    if origin != ParametersOrigin::Worker {
        design.debug.start_time = now;
    }

    Patch::design(design).with_status(Status::busy())
}

/// Surface a parameter failure without touching the design. A fresh error
/// never coexists with `busy`.
pub fn reject_parameters(origin: ParametersOrigin, reason: String) -> Patch {
    tracing::warn!(%origin, %reason, "design: parameters rejected");
    Patch::status(Status {
        busy: false,
        error: Some(DesignError::ParameterApplication { origin, reason }),
    })
}

/// Apply stored policy settings. A payload without `vtreeMode` is treated as
/// invalid and the design is handed back unchanged.
pub fn set_design_settings(state: &AppState, data: &PersistedDesign) -> Patch {
    let Some(vtree_mode) = data.vtree_mode else {
        let err = DesignError::InvalidSettingsPayload {
            reason: "vtreeMode is missing".to_string(),
        };
        debug!("design: ignoring settings, {err}");
        return Patch {
            design: Some(Arc::clone(&state.design)),
            ..Patch::default()
        };
    };
    let current = &state.design;
    let mut design = (**current).clone();
    design.vtree_mode = vtree_mode;
    design.auto_reload = data.auto_reload.unwrap_or(current.auto_reload);
    design.instant_update = data.instant_update.unwrap_or(current.instant_update);
    design.solids_time_out = data
        .solids_time_out
        .filter(|millis| millis.is_finite() && *millis >= 0.0)
        .map_or(current.solids_time_out, |millis| millis.round() as u64);
    Patch::design(design)
}

/// Project the design down to the worker's recompute payload.
pub fn request_geometry_recompute(state: &AppState) -> GenerateRequest {
    let design = &state.design;
    GenerateRequest {
        main_path: design.main_path.clone(),
        parameter_values: design.parameter_values.clone(),
        files_and_folders: design.files_and_folders.clone(),
        vtree_mode: design.vtree_mode,
        lookup: design.lookup.clone(),
        lookup_counts: design.lookup_counts.clone(),
    }
}

/// Mark the session busy as a recompute goes out. Empty when already busy
/// with no error to clear.
pub fn begin_geometry_recompute(state: &AppState) -> Patch {
    match &state.status {
        Some(Status { busy: true, error: None }) => Patch::default(),
        _ => Patch::status(Status::busy()),
    }
}

/// Give up on a recompute that is still running when its timer matures.
/// If the result already arrived the timeout is stale and nothing changes.
pub fn timeout_geometry_recompute(state: &AppState, timeout_ms: u64) -> Patch {
    if !state.is_busy() {
        return Patch::default();
    }
    tracing::warn!(timeout_ms, "design: recompute timed out");
    Patch::status(Status {
        busy: false,
        error: Some(DesignError::RecomputeTimeout { timeout_ms }),
    })
}

/// Nothing was sent for the last busy-marking change (the design came out
/// the same, or is not valid yet), so nothing will clear `busy` either.
pub fn settle_geometry_recompute(state: &AppState) -> Patch {
    if !state.is_busy() {
        return Patch::default();
    }
    debug!("design: no recompute outstanding, settling");
    Patch::status(Status {
        busy: false,
        ..status_of(state)
    })
}

/// The worker reported a failure for the current request.
pub fn fail_geometry_recompute(message: String) -> Patch {
    tracing::warn!(%message, "design: worker failed");
    Patch::status(Status {
        busy: false,
        error: Some(DesignError::WorkerComputation { message }),
    })
}

/// A remote source could not be fetched.
pub fn fail_remote_load(url: String, message: String) -> Patch {
    tracing::warn!(%url, %message, "design: remote load failed");
    Patch::status(Status {
        busy: false,
        error: Some(DesignError::RemoteLoad { url, message }),
    })
}

pub fn toggle_auto_reload(state: &AppState, auto_reload: bool) -> Patch {
    Patch::design(DesignState {
        auto_reload,
        ..(*state.design).clone()
    })
}

pub fn toggle_instant_update(state: &AppState, instant_update: bool) -> Patch {
    Patch::design(DesignState {
        instant_update,
        ..(*state.design).clone()
    })
}

pub fn toggle_vtree_mode(state: &AppState, vtree_mode: bool) -> Patch {
    Patch::design(DesignState {
        vtree_mode,
        ..(*state.design).clone()
    })
}

pub fn set_solids_timeout(state: &AppState, solids_time_out: u64) -> Patch {
    Patch::design(DesignState {
        solids_time_out,
        ..(*state.design).clone()
    })
}

/// The persisted field subset.
pub fn request_save_settings(state: &AppState) -> PersistedDesign {
    let design = &state.design;
    PersistedDesign {
        name: Some(design.name.clone()),
        main_path: Some(design.main_path.clone()),
        origin: design.origin,
        parameter_values: Some(design.parameter_values.clone()),
        vtree_mode: Some(design.vtree_mode),
        auto_reload: Some(design.auto_reload),
        instant_update: Some(design.instant_update),
        solids_time_out: Some(design.solids_time_out as f64),
    }
}

/// Serialize the geometry cache to a persistable blob.
pub fn request_write_cached_geometry(cache: &GeometryCache) -> serde_json::Result<String> {
    serde_json::to_string(cache)
}

/// Read back a blob written by [`request_write_cached_geometry`].
pub fn read_cached_geometry(raw: &str) -> serde_json::Result<GeometryResult> {
    let cache: GeometryCache = serde_json::from_str(raw)?;
    Ok(GeometryResult {
        solids: Some(cache.solids),
        lookup: Some(cache.lookup),
        lookup_counts: Some(cache.lookup_counts),
    })
}
