//! Two independent repeating refresh cycles, one per endpoint group.
//!
//! Every period the timer spawns a tick for its group. A tick that comes due
//! while the previous one is still running is dropped outright: it performs
//! no fetches and emits no signal. Stopping a timer aborts the timer loop
//! only; a tick that is already running completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use devops_model::EndpointGroup;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::reconcile::{GroupReport, Synchronizer};

/// Result of asking for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick of the same group was still running.
    Skipped,
    /// The tick ran to completion.
    Completed(GroupReport),
}

impl TickOutcome {
    /// Whether the tick was dropped by the overlap guard.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Resets the in-flight flag when the tick ends, even if it panics.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_guarded(
    synchronizer: &Synchronizer,
    in_flight: &AtomicBool,
    group: EndpointGroup,
) -> TickOutcome {
    if in_flight
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!(%group, "previous tick still running, skipping");
        return TickOutcome::Skipped;
    }
    let _guard = InFlight(in_flight);
    TickOutcome::Completed(synchronizer.refresh_group(group).await)
}

#[derive(Debug)]
struct GroupTimer {
    group: EndpointGroup,
    in_flight: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GroupTimer {
    fn new(group: EndpointGroup) -> Self {
        Self {
            group,
            in_flight: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start(&self, synchronizer: &Arc<Synchronizer>, period: Duration) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(group = %self.group, "timer already started");
            return;
        }

        let group = self.group;
        let in_flight = Arc::clone(&self.in_flight);
        let synchronizer = Arc::clone(synchronizer);
        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the first refresh is one
            // period after start.
            interval.tick().await;
            loop {
                interval.tick().await;
                let synchronizer = Arc::clone(&synchronizer);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    run_guarded(&synchronizer, &in_flight, group).await;
                });
            }
        }));
        info!(group = %self.group, period_ms = period.as_millis(), "refresh timer started");
    }

    fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!(group = %self.group, "refresh timer stopped");
        }
    }
}

/// Owns the catalog and remote refresh timers.
#[derive(Debug)]
pub struct RefreshScheduler {
    synchronizer: Arc<Synchronizer>,
    period: Duration,
    catalog: GroupTimer,
    remote: GroupTimer,
}

impl RefreshScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(synchronizer: Arc<Synchronizer>, period: Duration) -> Self {
        Self {
            synchronizer,
            period,
            catalog: GroupTimer::new(EndpointGroup::Catalog),
            remote: GroupTimer::new(EndpointGroup::Remote),
        }
    }

    fn timer(&self, group: EndpointGroup) -> &GroupTimer {
        match group {
            EndpointGroup::Catalog => &self.catalog,
            EndpointGroup::Remote => &self.remote,
        }
    }

    /// Start the timer of one group. Starting a running timer is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, group: EndpointGroup) {
        self.timer(group).start(&self.synchronizer, self.period);
    }

    /// Start both timers.
    pub fn start_all(&self) {
        self.start(EndpointGroup::Catalog);
        self.start(EndpointGroup::Remote);
    }

    /// Stop the timer of one group. Safe when it was never started.
    pub fn stop(&self, group: EndpointGroup) {
        self.timer(group).stop();
    }

    /// Stop both timers.
    pub fn stop_all(&self) {
        self.stop(EndpointGroup::Catalog);
        self.stop(EndpointGroup::Remote);
    }

    /// Whether the timer of a group is running.
    #[must_use]
    pub fn is_running(&self, group: EndpointGroup) -> bool {
        self.timer(group).is_running()
    }

    /// Run one tick now, subject to the same overlap guard as the timer.
    pub async fn try_tick(&self, group: EndpointGroup) -> TickOutcome {
        let timer = self.timer(group);
        run_guarded(&self.synchronizer, &timer.in_flight, group).await
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_resets_on_drop() {
        let flag = AtomicBool::new(true);
        {
            let _guard = InFlight(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_tick_outcome_is_skipped() {
        assert!(TickOutcome::Skipped.is_skipped());
    }
}
