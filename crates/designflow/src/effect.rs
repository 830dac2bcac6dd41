//! Effects: the IO side of the engine.
//!
//! Each collaborator (worker, settings store, file store, remote loader) is
//! one [`Effect`] over its request type. Requests for a collaborator are
//! executed in emission order on a dedicated lane; the events an effect
//! returns are fed back into the engine. A worker cancellation skips the
//! queue, so it reaches a worker stuck on the request it abandons.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::EngineHandle;
use crate::error::EngineError;
use crate::protocol::Event;

/// Executes one request against a collaborator.
///
/// Effects hold no session state: every request carries what it needs. An
/// effect that answers later (a worker finishing in the background, a file
/// watcher) keeps the [`EffectContext`] and emits through it.
#[async_trait]
pub trait Effect<C: Send + 'static>: Send + Sync + 'static {
    async fn execute(&self, request: C, ctx: EffectContext) -> anyhow::Result<Vec<Event>>;
}

/// What an effect gets to talk back to the engine.
#[derive(Clone)]
pub struct EffectContext {
    handle: EngineHandle,
}

impl EffectContext {
    pub(crate) fn new(handle: EngineHandle) -> Self {
        Self { handle }
    }

    /// Deliver an event out of band.
    pub async fn emit(&self, event: Event) -> Result<(), EngineError> {
        self.handle.emit(event).await
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }
}

/// Run `effect` over every request arriving on `requests`, one at a time.
pub(crate) fn spawn_lane<C>(
    name: &'static str,
    effect: Arc<dyn Effect<C>>,
    mut requests: mpsc::Receiver<C>,
    handle: EngineHandle,
) -> JoinHandle<()>
where
    C: std::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            if execute(name, effect.as_ref(), request, &handle).await.is_err() {
                return;
            }
        }
    })
}

/// Run one request right away, next to whatever the lane is executing.
///
/// Used for requests that must reach a collaborator while it is still busy
/// with an earlier one, such as a worker cancellation.
pub(crate) fn spawn_out_of_band<C>(
    name: &'static str,
    effect: Arc<dyn Effect<C>>,
    request: C,
    handle: EngineHandle,
) -> JoinHandle<()>
where
    C: std::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        let _ = execute(name, effect.as_ref(), request, &handle).await;
    })
}

/// Execute and feed the returned events back. Errs once the engine is gone.
async fn execute<C>(
    name: &'static str,
    effect: &dyn Effect<C>,
    request: C,
    handle: &EngineHandle,
) -> Result<(), EngineError>
where
    C: std::fmt::Debug + Send + 'static,
{
    debug!(lane = name, ?request, "effect: executing");
    let ctx = EffectContext::new(handle.clone());
    match effect.execute(request, ctx).await {
        Ok(events) => {
            for event in events {
                if let Err(err) = handle.emit(event).await {
                    debug!(lane = name, "effect: engine stopped");
                    return Err(err);
                }
            }
        }
        Err(err) => warn!(lane = name, "effect failed: {err:#}"),
    }
    Ok(())
}
