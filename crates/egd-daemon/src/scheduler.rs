//! Cycle scheduling and the persistence watcher.
//!
//! The scheduler ticks once per second. On each tick every due source gets
//! a cycle task; distinct sources run in parallel while the per-runner
//! in-flight marker keeps one source's cycles strictly serialized. On
//! shutdown, in-flight cycles are cancelled at their next suspension point
//! (their buffers are discarded) and the scheduler waits a bounded grace
//! period for the tasks to drain.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use crate::DaemonContext;

/// Scheduler tick cadence.
pub const TICK: Duration = Duration::from_secs(1);

/// How long shutdown waits for cancelled cycle tasks to drain.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Dispatch due sources until shutdown, then cancel and drain.
pub async fn run(ctx: Arc<DaemonContext>) {
    let mut shutdown = ctx.shutdown_signal();
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|v| *v) => break,
            _ = ticker.tick() => {
                dispatch_due(&ctx, &mut cycles);
                // Reap completed cycle tasks without blocking the tick.
                while cycles.try_join_next().is_some() {}
            }
        }
    }

    debug!(in_flight = cycles.len(), "cancelling source cycles");
    cycles.abort_all();
    let drained = timeout(DRAIN_GRACE, async {
        while cycles.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("cycle tasks did not drain within the grace period");
    }
}

fn dispatch_due(ctx: &Arc<DaemonContext>, cycles: &mut JoinSet<()>) {
    let now = Instant::now();
    for (index, runner) in ctx.sources.iter().enumerate() {
        let due = runner.state.lock().unwrap().is_ready(now);
        if !due {
            continue;
        }
        // A cycle for this source is still in flight; the next tick will
        // re-check readiness.
        if runner.running.swap(true, Ordering::AcqRel) {
            continue;
        }

        let ctx = Arc::clone(ctx);
        cycles.spawn(async move {
            let runner = &ctx.sources[index];
            egd_core::source::run_cycle(&runner.state, &ctx.pool).await;
            runner.running.store(false, Ordering::Release);
        });
    }
}

/// Background persistence: checks once per tick whether the configured
/// interval has elapsed since the last successful persist. Failures are
/// logged and retried on the next tick.
pub async fn persist_watcher(ctx: Arc<DaemonContext>) {
    let mut shutdown = ctx.shutdown_signal();
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if ctx.persist_due(Instant::now()) {
                    if let Err(err) = ctx.persist_now().await {
                        warn!(error = %err, "background persist failed; retrying next tick");
                    }
                }
            }
        }
    }
}
