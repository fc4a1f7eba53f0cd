//! Background refresh loop.
//!
//! The loop long-polls the active endpoint with the last seen index and publishes a fresh
//! snapshot after every successful response. Failures rotate to the next endpoint; once
//! every endpoint has failed in a row the loop pauses before trying again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::KvClient;
use crate::endpoint::{Endpoint, EndpointRotator};
use crate::snapshot::{ConfigSnapshot, SnapshotStore};
use crate::utils::{ConsulConfigError, Result};

/// Wait after every endpoint has failed in a row.
pub const DEFAULT_PAUSE_INTERVAL: Duration = Duration::from_secs(60);

/// What the loop does after a failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Try again immediately against the next endpoint.
    Retry,
    /// Every endpoint failed; back off before the next attempt.
    Pause,
}

/// Failure counter, active endpoint and change cursor of the watch loop.
#[derive(Debug)]
pub(crate) struct WatchState {
    rotator: EndpointRotator,
    failure_count: usize,
    index: Option<u64>,
}

impl WatchState {
    pub(crate) fn new(rotator: EndpointRotator, index: Option<u64>) -> Self {
        Self {
            rotator,
            failure_count: 0,
            index,
        }
    }

    pub(crate) fn current_endpoint(&self) -> &Endpoint {
        self.rotator.current()
    }

    #[cfg(test)]
    pub(crate) fn active_index(&self) -> usize {
        self.rotator.active_index()
    }

    pub(crate) fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub(crate) fn index(&self) -> Option<u64> {
        self.index
    }

    /// Remember the cursor of a response the store answered successfully.
    pub(crate) fn observe_index(&mut self, index: Option<u64>) {
        self.index = index;
    }

    pub(crate) fn record_success(&mut self) {
        self.failure_count = 0;
    }

    /// A cancelled wait neither counts as a failure nor rotates.
    pub(crate) fn record_cancelled(&mut self) {
        self.failure_count = 0;
    }

    pub(crate) fn record_failure(&mut self) -> Transition {
        self.failure_count += 1;
        self.rotator.advance();
        if self.failure_count > self.rotator.len() {
            Transition::Pause
        } else {
            Transition::Retry
        }
    }

    pub(crate) fn enter_pause(&mut self) {
        self.failure_count = 0;
    }
}

/// Shared pieces the loop needs besides its own state.
pub(crate) struct WatchContext {
    pub client: KvClient,
    pub store: Arc<SnapshotStore>,
    pub notifier: broadcast::Sender<Arc<ConfigSnapshot>>,
    pub delimiter: String,
    pub pause_interval: Duration,
}

/// Run until `shutdown` is cancelled, returning the final state.
pub(crate) async fn run_watch_loop(
    mut state: WatchState,
    ctx: WatchContext,
    shutdown: CancellationToken,
) -> WatchState {
    info!(folder = ctx.client.folder(), index = ?state.index(), "Starting Consul watch loop");

    while !shutdown.is_cancelled() {
        match refresh(&mut state, &ctx, &shutdown).await {
            Ok(snapshot) => {
                state.record_success();
                debug!(
                    endpoint = %state.current_endpoint(),
                    index = ?snapshot.index(),
                    entries = snapshot.len(),
                    "Published Consul configuration"
                );
                // No subscribers is fine.
                let _ = ctx.notifier.send(snapshot);
            }
            Err(e) if e.is_cancelled() => {
                state.record_cancelled();
                debug!("Consul blocking query cancelled");
            }
            Err(e) => {
                let endpoint = state.current_endpoint().to_string();
                let transition = state.record_failure();
                warn!(
                    %endpoint,
                    failure_count = state.failure_count(),
                    error = %e,
                    "Consul configuration refresh failed"
                );

                if transition == Transition::Pause {
                    state.enter_pause();
                    warn!(
                        pause_secs = ctx.pause_interval.as_secs(),
                        "All Consul endpoints failed, pausing before retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.pause_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }
    }

    info!(folder = ctx.client.folder(), "Consul watch loop stopped");
    state
}

async fn refresh(
    state: &mut WatchState,
    ctx: &WatchContext,
    shutdown: &CancellationToken,
) -> Result<Arc<ConfigSnapshot>> {
    let result = tokio::select! {
        result = ctx.client.fetch(state.current_endpoint(), state.index(), true) => result,
        _ = shutdown.cancelled() => Err(ConsulConfigError::Cancelled),
    };
    let response = result?;

    // The store answered, so the cursor moves even if the data is rejected below.
    state.observe_index(response.index);
    let snapshot = response.into_snapshot(&ctx.delimiter)?;
    Ok(ctx.store.publish(snapshot))
}
