//! The state store: the single owner of the current [`AppState`].
//!
//! Components never hold a mutable handle. They receive `Arc<AppState>`
//! snapshots, and the dispatcher is the only caller of [`Store::apply`].

use std::sync::Arc;

use crate::state::{AppState, DesignState, IoState, Status, ViewerState};

/// The fields a reducer changed. Untouched fields stay `None` and are carried
/// over from the incoming snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub design: Option<Arc<DesignState>>,
    pub status: Option<Status>,
    pub io: Option<IoState>,
    pub viewer: Option<ViewerState>,
    pub app_title: Option<String>,
}

impl Patch {
    pub fn design(design: DesignState) -> Self {
        Self {
            design: Some(Arc::new(design)),
            ..Self::default()
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.design.is_none()
            && self.status.is_none()
            && self.io.is_none()
            && self.viewer.is_none()
            && self.app_title.is_none()
    }
}

impl AppState {
    /// Produce the next snapshot with `patch` layered over `self`.
    pub fn apply(&self, patch: Patch) -> AppState {
        AppState {
            design: patch.design.unwrap_or_else(|| Arc::clone(&self.design)),
            status: patch.status.or_else(|| self.status.clone()),
            io: patch.io.or_else(|| self.io.clone()),
            viewer: patch.viewer.unwrap_or_else(|| self.viewer.clone()),
            app_title: patch.app_title.unwrap_or_else(|| self.app_title.clone()),
        }
    }
}

/// Holds the latest snapshot and counts committed transitions.
#[derive(Debug)]
pub struct Store {
    current: Arc<AppState>,
    version: u64,
}

impl Store {
    pub fn new(initial: AppState) -> Self {
        Self {
            current: Arc::new(initial),
            version: 0,
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        Arc::clone(&self.current)
    }

    /// Number of transitions committed so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Commit `patch` and return the new snapshot.
    pub fn apply(&mut self, patch: Patch) -> Arc<AppState> {
        self.current = Arc::new(self.current.apply(patch));
        self.version += 1;
        self.snapshot()
    }

    /// Replace the whole snapshot (used once, by `initialize`).
    pub fn replace(&mut self, state: AppState) -> Arc<AppState> {
        self.current = Arc::new(state);
        self.version += 1;
        self.snapshot()
    }
}
