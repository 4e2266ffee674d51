//! Background loops: the maintenance sweep and the outbox relay.
//!
//! Both stop when the shutdown channel flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use outbox::OutboxRelay;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::{AppState, SharedStore};

/// Runs [`saga::SagaCoordinator::run_maintenance`] every `interval`.
pub fn spawn_maintenance(
    state: Arc<AppState>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "maintenance sweep started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = state.saga.run_maintenance().await {
                        tracing::error!(
                            error = %err,
                            reason = err.reason_code(),
                            "maintenance pass failed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("maintenance sweep stopped");
    })
}

pub fn spawn_relay(
    relay: Arc<OutboxRelay<SharedStore>>,
    poll: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move { relay.run(poll, shutdown).await })
}
