//! Structural equality gates.
//!
//! Designs are compared by the canonical JSON of a field projection, never by
//! reference. Maps are insertion-ordered, so the serialization is stable
//! across calls for equal inputs.

use serde::Serialize;

use crate::state::{DesignOrigin, DesignState, FileNode, ParamDef, ValueMap};

crate::design_projection! {
    /// Fields whose change requires a geometry recompute. Solids are not part
    /// of it: they are the result of the others.
    RecomputeFields {
        parameter_definitions: Vec<ParamDef>,
        parameter_values: ValueMap,
        main_path: String,
        files_and_folders: Vec<FileNode>,
        vtree_mode: bool,
    }
}

crate::design_projection! {
    /// Fields persisted to the settings store.
    SerializedFields {
        name: String,
        main_path: String,
        origin: Option<DesignOrigin>,
        parameter_values: ValueMap,
        vtree_mode: bool,
        auto_reload: bool,
        instant_update: bool,
        solids_time_out: u64,
    }
}

crate::design_projection! {
    /// Fields the parameter router deduplicates on.
    ParameterFields {
        parameter_values: ValueMap,
        parameter_definitions: Vec<ParamDef>,
    }
}

/// Canonical serialization used by every gate.
pub fn canonical<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

fn same<T: Serialize>(previous: &T, current: &T) -> bool {
    match (canonical(previous), canonical(current)) {
        (Some(previous), Some(current)) => previous == current,
        _ => false,
    }
}

/// True when no recompute-relevant field changed. With no previous design the
/// answer is `false`, so the first observed design always counts as a change.
pub fn is_design_the_same(previous: Option<&DesignState>, current: &DesignState) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    if std::ptr::eq(previous, current) {
        return true;
    }
    same(&RecomputeFields::of(previous), &RecomputeFields::of(current))
}

/// Same as [`is_design_the_same`] over the persisted field set.
pub fn is_design_the_same_for_serialization(
    previous: Option<&DesignState>,
    current: &DesignState,
) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    if std::ptr::eq(previous, current) {
        return true;
    }
    same(&SerializedFields::of(previous), &SerializedFields::of(current))
}

/// True when values and definitions are unchanged.
pub fn are_parameters_the_same(previous: Option<&DesignState>, current: &DesignState) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    same(&ParameterFields::of(previous), &ParameterFields::of(current))
}

/// A design is eligible for recompute once it has a name and a path.
pub fn is_design_valid(design: &DesignState) -> bool {
    !design.name.is_empty() && !design.path.is_empty()
}
