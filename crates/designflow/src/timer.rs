//! The single recompute timeout slot.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::scheduler::RequestId;

/// Holds at most one armed timer. Arming replaces (aborts) the previous one;
/// a firing delivers the request id it was armed with, so a firing that
/// raced a re-arm is recognised as stale downstream.
#[derive(Debug)]
pub struct TimeoutSlot {
    fired: mpsc::Sender<RequestId>,
    armed: Option<(RequestId, JoinHandle<()>)>,
}

impl TimeoutSlot {
    pub fn new(fired: mpsc::Sender<RequestId>) -> Self {
        Self { fired, armed: None }
    }

    pub fn armed(&self) -> Option<RequestId> {
        self.armed.as_ref().map(|(request_id, _)| *request_id)
    }

    pub fn arm(&mut self, request_id: RequestId, duration: Duration) {
        self.cancel();
        trace!(%request_id, ?duration, "timer: armed");
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // The engine may already be gone.
            let _ = fired.send(request_id).await;
        });
        self.armed = Some((request_id, task));
    }

    pub fn cancel(&mut self) {
        if let Some((request_id, task)) = self.armed.take() {
            trace!(%request_id, "timer: cancelled");
            task.abort();
        }
    }
}

impl Drop for TimeoutSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
