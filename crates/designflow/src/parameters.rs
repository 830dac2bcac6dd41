//! Merging of parameter sources.
//!
//! Five sources feed parameter values: the manual "update" button, live
//! edits, worker-reported defaults, stored settings and the title bar. Each
//! update is tagged with its origin and held until the design first becomes
//! valid, so parameters never race ahead of the design's identity on a cold
//! start. After the reducer runs, an output identical to the previous one
//! (same values, same definitions) is dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::equality::{are_parameters_the_same, is_design_valid};
use crate::machine::{Decision, Decisions, Machine};
use crate::protocol::PersistedDesign;
use crate::reducers::ParameterUpdate;
use crate::state::{AppState, DesignState, ParamDef, ParametersOrigin, ValueMap};

#[derive(Debug, Default)]
pub struct ParameterRouter {
    open: bool,
    held: VecDeque<ParameterUpdate>,
    /// Design produced by the last admitted update.
    last_output: Option<Arc<DesignState>>,
}

impl ParameterRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Offer an update. Returns it when it may be applied now; otherwise it
    /// is queued until the design becomes valid.
    pub fn offer(&mut self, update: ParameterUpdate) -> Option<ParameterUpdate> {
        if self.open {
            return Some(update);
        }
        debug!(origin = %update.origin, "parameters: held until the design is valid");
        self.held.push_back(update);
        None
    }

    /// Decide whether the design produced by an update is worth committing.
    pub fn admit(&mut self, candidate: &Arc<DesignState>) -> bool {
        if are_parameters_the_same(self.last_output.as_deref(), candidate) {
            debug!("parameters: unchanged, skipped");
            return false;
        }
        self.last_output = Some(Arc::clone(candidate));
        true
    }

    pub fn manual(values: ValueMap) -> ParameterUpdate {
        ParameterUpdate::values(values, ParametersOrigin::UiManualUpdate)
    }

    pub fn instant(values: ValueMap) -> ParameterUpdate {
        ParameterUpdate::values(values, ParametersOrigin::UiInstantUpdate)
    }

    pub fn title_bar(values: ValueMap) -> ParameterUpdate {
        ParameterUpdate::values(values, ParametersOrigin::TitleBar)
    }

    /// Stored values, when the stored payload carries any.
    pub fn from_store(data: &PersistedDesign) -> Option<ParameterUpdate> {
        data.parameter_values
            .clone()
            .map(|values| ParameterUpdate::values(values, ParametersOrigin::Store))
    }

    pub fn from_worker(
        defaults: Option<ValueMap>,
        definitions: Option<Vec<ParamDef>>,
    ) -> ParameterUpdate {
        ParameterUpdate {
            values: None,
            defaults,
            definitions,
            origin: ParametersOrigin::Worker,
        }
    }
}

impl Machine for ParameterRouter {
    fn observe(&mut self, state: &Arc<AppState>) -> Decisions {
        if self.open || !is_design_valid(&state.design) {
            return Decisions::new();
        }
        self.open = true;
        debug!(released = self.held.len(), "parameters: design valid, releasing");
        self.held.drain(..).map(Decision::ApplyParameters).collect()
    }
}
