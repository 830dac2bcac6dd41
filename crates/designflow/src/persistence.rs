//! Load-before-save bridge to the settings store.
//!
//! One read is issued at startup. Writes are held back until that read's
//! reply has been observed, so stored settings are applied before anything
//! can overwrite them with defaults.

use std::sync::Arc;

use smallvec::smallvec;
use tracing::debug;

use crate::equality::is_design_the_same_for_serialization;
use crate::machine::{Decision, Decisions, Machine};
use crate::protocol::{Command, PersistedDesign, SettingsRequest};
use crate::reducers::request_save_settings;
use crate::state::{AppState, DesignState};

#[derive(Debug)]
pub struct PersistenceBridge {
    key: String,
    /// Last design that counted as a persisted-field change.
    baseline: Option<Arc<DesignState>>,
    /// The first distinct state is the pre-load baseline, not a change.
    skipped_first: bool,
    loaded: bool,
    /// Latest write produced before the load reply arrived.
    held: Option<PersistedDesign>,
}

impl PersistenceBridge {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            baseline: None,
            skipped_first: false,
            loaded: false,
            held: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The startup read request.
    pub fn load_request(&self) -> Command {
        Command::Settings(SettingsRequest::Read {
            key: self.key.clone(),
        })
    }

    /// A read reply for `key` arrived. Opens the gate on the first one and
    /// releases the held write, if any.
    pub fn on_read_reply(&mut self, key: &str) -> Decisions {
        if key != self.key || self.loaded {
            return Decisions::new();
        }
        self.loaded = true;
        debug!(key, "settings: loaded, writes enabled");
        match self.held.take() {
            Some(data) => smallvec![self.write(data)],
            None => Decisions::new(),
        }
    }

    fn write(&self, data: PersistedDesign) -> Decision {
        Decision::Emit(Command::Settings(SettingsRequest::Write {
            key: self.key.clone(),
            data,
        }))
    }
}

impl Machine for PersistenceBridge {
    fn observe(&mut self, state: &Arc<AppState>) -> Decisions {
        let design = &state.design;
        if is_design_the_same_for_serialization(self.baseline.as_deref(), design) {
            return Decisions::new();
        }
        self.baseline = Some(Arc::clone(design));
        if !self.skipped_first {
            self.skipped_first = true;
            return Decisions::new();
        }

        let data = request_save_settings(state);
        if self.loaded {
            smallvec![self.write(data)]
        } else {
            debug!(key = %self.key, "settings: write held until load");
            self.held = Some(data);
            Decisions::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_name(name: &str) -> Arc<AppState> {
        Arc::new(AppState {
            design: Arc::new(DesignState {
                name: name.to_string(),
                ..DesignState::default()
            }),
            ..AppState::default()
        })
    }

    fn writes(decisions: &Decisions) -> Vec<String> {
        decisions
            .iter()
            .filter_map(|decision| match decision {
                Decision::Emit(Command::Settings(SettingsRequest::Write { data, .. })) => {
                    data.name.clone()
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn the_first_state_is_never_written() {
        let mut bridge = PersistenceBridge::new("design");
        bridge.on_read_reply("design");
        assert!(bridge.observe(&with_name("")).is_empty());
        assert_eq!(writes(&bridge.observe(&with_name("a"))), vec!["a"]);
    }

    #[test]
    fn writes_wait_for_the_load_reply() {
        let mut bridge = PersistenceBridge::new("design");
        assert_eq!(
            bridge.load_request(),
            Command::Settings(SettingsRequest::Read {
                key: "design".to_string()
            })
        );
        bridge.observe(&with_name(""));
        assert!(bridge.observe(&with_name("a")).is_empty());
        assert!(bridge.observe(&with_name("b")).is_empty());

        assert!(bridge.on_read_reply("other").is_empty());
        assert!(!bridge.is_loaded());

        assert_eq!(writes(&bridge.on_read_reply("design")), vec!["b"]);
        assert!(bridge.on_read_reply("design").is_empty());
        assert_eq!(writes(&bridge.observe(&with_name("c"))), vec!["c"]);
    }

    #[test]
    fn unchanged_persisted_fields_are_not_rewritten() {
        let mut bridge = PersistenceBridge::new("design");
        bridge.on_read_reply("design");
        bridge.observe(&with_name(""));
        assert_eq!(writes(&bridge.observe(&with_name("a"))).len(), 1);
        assert!(bridge.observe(&with_name("a")).is_empty());
    }
}
