//! Background loop that keeps a client's cached locations warm.
//!
//! The loop wakes on a fixed period, starting immediately, and re-fetches every
//! key that was stale when the tick began, even if a put in the meantime swept
//! it. It never adds locations that were not cached before the tick.
//! Failures are logged per location and never end the loop. Cancellation is
//! cooperative: it is checked before every tick and between locations, so an
//! in-progress fetch is allowed to finish.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{WeatherError, client::ClientInner};

/// Counters describing what the refresher has done so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshStats {
    pub ticks: u64,
    pub refreshed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    refreshed: AtomicU64,
    failed: AtomicU64,
}

/// Handle to a running refresh loop. Once stopped it cannot be restarted.
#[derive(Debug)]
pub struct Refresher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl Refresher {
    pub(crate) fn start(client: Arc<ClientInner>, period: Duration) -> Result<Self, WeatherError> {
        let runtime = Handle::try_current().map_err(|_| WeatherError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let task = runtime.spawn(run(client, period, cancel.clone(), Arc::clone(&counters)));

        info!(period_ms = period.as_millis() as u64, "refresher started");

        Ok(Self { cancel, task, counters })
    }

    /// Request the loop to stop. No tick fires after this returns.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!("refresher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            refreshed: self.counters.refreshed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run(
    client: Arc<ClientInner>,
    period: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        counters.ticks.fetch_add(1, Ordering::Relaxed);
        refresh_stale(&client, &cancel, &counters).await;
    }

    debug!("refresher loop exited");
}

async fn refresh_stale(client: &ClientInner, cancel: &CancellationToken, counters: &Counters) {
    let stale = client.cache().stale_keys();
    if stale.is_empty() {
        return;
    }
    debug!(count = stale.len(), "refreshing stale locations");

    for location in stale {
        if cancel.is_cancelled() {
            break;
        }

        match client.load(&location).await {
            Ok(_) => {
                counters.refreshed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    location = %location,
                    error = %err,
                    status = ?err.status(),
                    retryable = err.is_retryable(),
                    "failed to refresh cached weather"
                );
            }
        }
    }
}
