//! Background loops: per-device polling, idle eviction, publishing.

use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use winperf_core::collector::{CycleOutcome, CycleReport, DeviceTarget, PerfmonCollector};
use winperf_core::persister::{self, SharedPersister};
use winperf_core::shell::RemoteShell;

use crate::memory::release_memory_to_os;
use crate::publish::{Publisher, drain};

/// Logs the end of a cycle at a level matching its outcome.
pub(crate) fn log_report(report: &CycleReport) {
    let duration_ms = report.duration.as_millis() as u64;
    match report.outcome {
        CycleOutcome::Recorded | CycleOutcome::Skipped => debug!(
            device = %report.device,
            recorded = report.recorded,
            missing = report.missing.len(),
            duration_ms,
            "cycle complete"
        ),
        CycleOutcome::Partial | CycleOutcome::Discarded => info!(
            device = %report.device,
            outcome = ?report.outcome,
            recorded = report.recorded,
            duration_ms,
            "cycle truncated"
        ),
        CycleOutcome::Failed | CycleOutcome::Unreachable => warn!(
            device = %report.device,
            outcome = ?report.outcome,
            duration_ms,
            "cycle failed"
        ),
    }
}

// ============================================================
// Polling
// ============================================================

/// Starts a cycle for `target` on every tick until `shutdown` flips.
///
/// Each cycle runs as its own task, so a slow device can have several
/// cycles in flight; the shell timeout bounds how many. On shutdown no new
/// cycles start and the ones in flight get up to `grace` to finish.
pub(crate) async fn poll_loop<S: RemoteShell + 'static>(
    collector: Arc<PerfmonCollector<S>>,
    target: Arc<DeviceTarget>,
    persister: SharedPersister,
    interval: Duration,
    grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let collector = collector.clone();
                let target = target.clone();
                let persister = persister.clone();
                cycles.spawn(async move {
                    let report = collector.collect(&target, &persister).await;
                    log_report(&report);
                });
            }
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined {
                    error!(device = %target.id, error = %e, "collection task failed");
                }
            }
            // A dropped sender also means shutdown.
            _ = shutdown.changed() => break,
        }
    }

    finish_cycles(&target.id, cycles, grace).await;
}

/// Waits up to `grace` for in-flight cycles; the rest are aborted.
async fn finish_cycles(device: &str, mut cycles: JoinSet<()>, grace: Duration) {
    if cycles.is_empty() {
        return;
    }
    debug!(device = %device, in_flight = cycles.len(), "waiting for in-flight cycles");

    let wait = async {
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!(device = %device, error = %e, "collection task failed");
            }
        }
    };
    if tokio::time::timeout(grace, wait).await.is_err() {
        warn!(
            device = %device,
            abandoned = cycles.len(),
            grace_secs = grace.as_secs(),
            "in-flight cycles abandoned at shutdown"
        );
    }
}

// ============================================================
// Maintenance
// ============================================================

/// Evicts devices idle for longer than `idle_bound`.
///
/// Runs on its own schedule so stalled devices are dropped even when no
/// cycle for them ever completes.
pub(crate) async fn maintenance_loop(
    persister: SharedPersister,
    interval: Duration,
    idle_bound: Duration,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; nothing can be idle yet.
    tick.tick().await;

    loop {
        tick.tick().await;

        let t0 = Instant::now();
        // Runtime clock, so paused time drives eviction too.
        let now = tokio::time::Instant::now().into_std();
        let (evicted, remaining) = {
            let mut dp = persister::lock(&persister);
            let evicted = dp.maintenance_at(now, idle_bound);
            (evicted, dp.len())
        };

        if evicted > 0 {
            release_memory_to_os();
            info!(
                evicted,
                remaining,
                idle_bound_secs = idle_bound.as_secs(),
                duration_ms = t0.elapsed().as_millis() as u64,
                "idle eviction"
            );
        } else {
            debug!(remaining, "maintenance: nothing to evict");
        }
    }
}

// ============================================================
// Publishing
// ============================================================

/// Drains the configured devices into `publisher` on every tick.
pub(crate) async fn publish_loop(
    persister: SharedPersister,
    devices: Vec<String>,
    interval: Duration,
    mut publisher: Publisher<Stdout>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tick.tick().await;

        let written = drain(&persister, &devices, &mut publisher);
        debug!(
            written,
            total = publisher.published(),
            "publish pass complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use winperf_core::collector::CounterBinding;
    use winperf_core::persister::DataPersister;
    use winperf_core::shell::{CommandResult, MockShell, ShellError};

    /// Answers with healthy readings after `delay`.
    struct SlowShell {
        delay: Duration,
    }

    #[async_trait]
    impl RemoteShell for SlowShell {
        async fn execute(&self, _command: &str) -> Result<CommandResult, ShellError> {
            tokio::time::sleep(self.delay).await;
            Ok(MockShell::typical_readings())
        }
    }

    fn target() -> Arc<DeviceTarget> {
        Arc::new(DeviceTarget {
            id: "sqlsrv02".to_string(),
            address: "10.0.0.5".to_string(),
            counters: vec![CounterBinding::new(
                r"\Memory\Available Bytes",
                "os",
                "memoryAvailableBytes",
            )],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_loop_evicts_on_tick() {
        let dp = DataPersister::shared();
        persister::lock(&dp).touch("stale");

        let handle = tokio::spawn(maintenance_loop(
            dp.clone(),
            Duration::from_secs(60),
            Duration::from_secs(90),
        ));

        // Tick at 60s: idle for 60s, within the bound.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(persister::lock(&dp).contains("stale"));

        // Tick at 120s: idle for 120s.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(persister::lock(&dp).is_empty());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_runs_cycles() {
        let dp = DataPersister::shared();
        let collector = Arc::new(PerfmonCollector::new(
            MockShell::new()
                .respond(MockShell::typical_readings())
                .respond(MockShell::typical_readings()),
        ));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop(
            collector.clone(),
            target(),
            dp.clone(),
            Duration::from_secs(10),
            Duration::from_secs(5),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(collector.shell().commands().len(), 2);
        let data = persister::lock(&dp).pop("sqlsrv02");
        assert_eq!(data.value_count(), 1);
        assert_eq!(data.events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_cycle() {
        let dp = DataPersister::shared();
        let collector = Arc::new(PerfmonCollector::new(SlowShell {
            delay: Duration::from_secs(5),
        }));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop(
            collector,
            target(),
            dp.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            rx,
        ));
        // First cycle starts at once and is still waiting on the host.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(persister::lock(&dp).get("sqlsrv02").is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();

        let mut publisher = Publisher::new(Vec::new());
        assert_eq!(drain(&dp, &["sqlsrv02".to_string()], &mut publisher), 1);
        assert_eq!(publisher.published(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_cycles_past_grace() {
        let dp = DataPersister::shared();
        let collector = Arc::new(PerfmonCollector::new(SlowShell {
            delay: Duration::from_secs(30),
        }));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop(
            collector,
            target(),
            dp.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            rx,
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Only the touch from the start of the cycle remains.
        let data = persister::lock(&dp).pop("sqlsrv02");
        assert!(data.is_empty());
    }
}
