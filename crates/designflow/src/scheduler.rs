//! The recompute scheduler.
//!
//! ```text
//!  Idle ──design changed & valid──► Pending(request, timer armed)
//!   ▲                                 │            │
//!   │                     busy cleared│            │timer matured while busy
//!   │                                 ▼            ▼
//!   └──────────── design changed ── Completed    TimedOut ──► cancel sent to worker
//! ```
//!
//! A change seen while `Pending` issues a fresh request and re-arms the
//! single timer slot; timers never stack. The timeout duration is sampled
//! once, from the snapshot that triggered the request. A snapshot marked
//! busy with no request pending (an unchanged reload) is settled at once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use tracing::{debug, info};
use uuid::Uuid;

use crate::equality::{is_design_the_same, is_design_valid};
use crate::machine::{Decision, Decisions, Machine};
use crate::protocol::{Command, WorkerRequest};
use crate::reducers::request_geometry_recompute;
use crate::state::{AppState, DesignState};

/// Identifies one recompute request and the timer armed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputePhase {
    Idle,
    Pending {
        request_id: RequestId,
        timeout_ms: u64,
    },
    Completed {
        request_id: RequestId,
    },
    TimedOut {
        request_id: RequestId,
    },
}

/// Outcome of a timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The timer belongs to the pending request; apply the timeout.
    Expired { timeout_ms: u64 },
    /// A newer request replaced it, or the request already finished.
    Stale,
}

#[derive(Debug)]
pub struct RecomputeScheduler {
    /// Last design that counted as a change.
    baseline: Option<Arc<DesignState>>,
    phase: RecomputePhase,
}

impl Default for RecomputeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecomputeScheduler {
    pub fn new() -> Self {
        Self {
            baseline: None,
            phase: RecomputePhase::Idle,
        }
    }

    pub fn phase(&self) -> RecomputePhase {
        self.phase
    }

    /// The armed timer for `request_id` matured.
    pub fn on_timer_elapsed(&mut self, request_id: RequestId) -> TimerOutcome {
        match self.phase {
            RecomputePhase::Pending {
                request_id: pending,
                timeout_ms,
            } if pending == request_id => {
                self.phase = RecomputePhase::TimedOut { request_id };
                TimerOutcome::Expired { timeout_ms }
            }
            _ => {
                debug!(%request_id, "recompute: stale timer ignored");
                TimerOutcome::Stale
            }
        }
    }
}

impl Machine for RecomputeScheduler {
    fn observe(&mut self, state: &Arc<AppState>) -> Decisions {
        let design = &state.design;
        if !is_design_the_same(self.baseline.as_deref(), design) {
            self.baseline = Some(Arc::clone(design));
            if is_design_valid(design) {
                let request_id = RequestId::new();
                let timeout_ms = design.solids_time_out;
                self.phase = RecomputePhase::Pending {
                    request_id,
                    timeout_ms,
                };
                info!(%request_id, main_path = %design.main_path, timeout_ms, "recompute: requested");
                return smallvec![
                    Decision::Emit(Command::Worker(WorkerRequest::Generate(
                        request_geometry_recompute(state)
                    ))),
                    Decision::BeginRecompute,
                    Decision::ArmTimer {
                        request_id,
                        duration: Duration::from_millis(timeout_ms),
                    },
                ];
            }
        }

        match self.phase {
            RecomputePhase::Pending { request_id, .. } if !state.is_busy() => {
                debug!(%request_id, "recompute: completed");
                self.phase = RecomputePhase::Completed { request_id };
                smallvec![Decision::CancelTimer]
            }
            RecomputePhase::Pending { .. } => Decisions::new(),
            // busy, but no request went out for it
            _ if state.is_busy() => smallvec![Decision::SettleRecompute],
            _ => Decisions::new(),
        }
    }
}
