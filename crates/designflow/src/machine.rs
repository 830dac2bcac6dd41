//! Pure decision makers that watch committed snapshots.

use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;

use crate::protocol::Command;
use crate::reducers::ParameterUpdate;
use crate::scheduler::RequestId;
use crate::state::AppState;

/// What a machine wants to happen after observing a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Send a request to a collaborator.
    Emit(Command),
    /// (Re)arm the recompute timer. Replaces any armed timer.
    ArmTimer { request_id: RequestId, duration: Duration },
    /// Disarm the recompute timer.
    CancelTimer,
    /// Apply a parameter update that was held back.
    ApplyParameters(ParameterUpdate),
    /// Mark the session busy because a recompute just went out.
    BeginRecompute,
    /// Clear a busy flag that no outstanding request will answer.
    SettleRecompute,
}

pub type Decisions = SmallVec<[Decision; 2]>;

/// A machine observes every committed snapshot, in order, and decides.
///
/// Machines are pure: no IO, no async, state is internal. The dispatcher
/// carries out their decisions.
pub trait Machine: Send {
    fn observe(&mut self, state: &Arc<AppState>) -> Decisions;
}
