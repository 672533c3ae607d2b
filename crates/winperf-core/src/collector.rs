//! One polling cycle for one device.
//!
//! `PerfmonCollector` ties the pipeline together:
//!
//! 1. touch the device in the persister;
//! 2. build the `Get-Counter` command for the device's counter bindings;
//! 3. run it through the remote shell (the only suspension point);
//! 4. validate the result, parse it, and write values or diagnostic events
//!    back into the persister.
//!
//! The persister lock is never held across the remote call, so any number
//! of cycles, for the same device or different ones, can be in flight.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::perfmon::{
    CounterSample, counter_returned, counter_script, failure_summary, format_stdout,
    powershell_command, same_counter,
};
use crate::persister::{self, DatasourceRef, Event, Severity, SharedPersister};
use crate::shell::RemoteShell;

/// Event class for collection status events.
pub const EVENT_CLASS: &str = "/Status/Perfmon";

/// Event key shared by failure and clear events, so a clear closes a failure.
pub const EVENT_KEY: &str = "Windows Perfmon Collection Error";

/// Plugin name recorded as the origin of events.
pub const PLUGIN: &str = "perfmon";

/// What to do with samples from a truncated response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationPolicy {
    /// Record the readings that did arrive.
    #[default]
    Accept,
    /// Drop the whole cycle.
    Discard,
}

/// Maps one counter path to the (component, datasource) it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterBinding {
    pub counter: String,
    pub component: String,
    pub datasource: String,
}

impl CounterBinding {
    pub fn new(
        counter: impl Into<String>,
        component: impl Into<String>,
        datasource: impl Into<String>,
    ) -> Self {
        Self {
            counter: counter.into(),
            component: component.into(),
            datasource: datasource.into(),
        }
    }
}

/// A device to poll and the counters to read from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceTarget {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub counters: Vec<CounterBinding>,
}

impl DeviceTarget {
    /// Distinct counter paths, in binding order.
    pub fn counter_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::with_capacity(self.counters.len());
        for binding in &self.counters {
            if !paths.iter().any(|p| same_counter(p, &binding.counter)) {
                paths.push(&binding.counter);
            }
        }
        paths
    }

    fn origins(&self) -> Vec<DatasourceRef> {
        self.counters
            .iter()
            .map(|b| DatasourceRef::new(PLUGIN, b.datasource.as_str()))
            .collect()
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// All readings were parsed and recorded.
    Recorded,
    /// The response was truncated; the readings that arrived were recorded.
    Partial,
    /// The response was truncated and dropped.
    Discarded,
    /// The command ran but returned no usable counters.
    Failed,
    /// The command could not be run.
    Unreachable,
    /// The device has no counters configured.
    Skipped,
}

/// Summary of one polling cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub device: String,
    pub outcome: CycleOutcome,
    /// Distinct counters requested.
    pub requested: usize,
    /// Values written to the persister.
    pub recorded: usize,
    /// Requested counters absent from the response.
    pub missing: Vec<String>,
    /// Counters whose value was not a number.
    pub unparsed: Vec<String>,
    pub truncated: bool,
    pub duration: Duration,
}

impl CycleReport {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            outcome: CycleOutcome::Skipped,
            requested: 0,
            recorded: 0,
            missing: Vec::new(),
            unparsed: Vec::new(),
            truncated: false,
            duration: Duration::ZERO,
        }
    }
}

/// Runs polling cycles through a remote shell.
pub struct PerfmonCollector<S: RemoteShell> {
    shell: S,
    truncation: TruncationPolicy,
}

impl<S: RemoteShell> PerfmonCollector<S> {
    pub fn new(shell: S) -> Self {
        Self {
            shell,
            truncation: TruncationPolicy::default(),
        }
    }

    pub fn with_truncation(mut self, truncation: TruncationPolicy) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Runs one cycle for `target`, writing results into `persister`.
    pub async fn collect(&self, target: &DeviceTarget, persister: &SharedPersister) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(&target.id);

        persister::lock(persister).touch(&target.id);

        let paths = target.counter_paths();
        report.requested = paths.len();
        if paths.is_empty() {
            debug!(device = %target.id, "no counters configured, skipping");
            report.duration = started.elapsed();
            return report;
        }

        let command = powershell_command(&counter_script(&paths));
        let result = self.shell.execute(&command).await;

        report.outcome = match result {
            Err(e) => {
                warn!(device = %target.id, error = %e, "counter query could not be run");
                self.record_event(persister, target, Severity::Error, e.to_string());
                CycleOutcome::Unreachable
            }
            Ok(result) if !counter_returned(&result) => {
                let summary = failure_summary(&result);
                warn!(
                    device = %target.id,
                    exit_code = result.exit_code,
                    summary = %summary,
                    "counter query returned no data"
                );
                self.record_event(persister, target, Severity::Error, summary);
                CycleOutcome::Failed
            }
            Ok(result) => {
                let (samples, truncated) = format_stdout(&result.stdout);
                report.truncated = truncated;
                self.record_samples(target, &paths, &samples, persister, &mut report)
            }
        };

        report.duration = started.elapsed();
        debug!(
            device = %target.id,
            outcome = ?report.outcome,
            requested = report.requested,
            recorded = report.recorded,
            missing = report.missing.len(),
            duration_ms = report.duration.as_millis() as u64,
            "perfmon cycle finished"
        );
        report
    }

    fn record_samples(
        &self,
        target: &DeviceTarget,
        paths: &[&str],
        samples: &[CounterSample],
        persister: &SharedPersister,
        report: &mut CycleReport,
    ) -> CycleOutcome {
        if report.truncated {
            warn!(
                device = %target.id,
                samples = samples.len(),
                policy = ?self.truncation,
                "counter output truncated"
            );
            if self.truncation == TruncationPolicy::Discard {
                self.record_event(
                    persister,
                    target,
                    Severity::Warning,
                    format!("counter output truncated, {} samples discarded", samples.len()),
                );
                return CycleOutcome::Discarded;
            }
        }

        report.missing = paths
            .iter()
            .filter(|p| !samples.iter().any(|s| s.matches(p)))
            .map(|p| p.to_string())
            .collect();
        if !report.missing.is_empty() {
            debug!(device = %target.id, missing = ?report.missing, "counters not returned");
        }

        let collected_at = Utc::now();
        let mut dp = persister::lock(persister);
        for binding in &target.counters {
            let Some(sample) = samples.iter().find(|s| s.matches(&binding.counter)) else {
                continue;
            };
            match sample.value_f64() {
                Some(value) => {
                    dp.add_value(
                        &target.id,
                        &binding.component,
                        &binding.datasource,
                        value,
                        collected_at,
                    );
                    report.recorded += 1;
                }
                None => {
                    debug!(
                        device = %target.id,
                        counter = %binding.counter,
                        value = %sample.value,
                        "counter value is not numeric"
                    );
                    if !report.unparsed.contains(&binding.counter) {
                        report.unparsed.push(binding.counter.clone());
                    }
                }
            }
        }

        let origins = target.origins();
        if report.truncated {
            let summary = format!(
                "counter output truncated, {} of {} counters recorded",
                report.recorded,
                target.counters.len()
            );
            dp.add_event(
                &target.id,
                &origins,
                self.event(target, Severity::Warning, summary),
            );
            CycleOutcome::Partial
        } else {
            dp.add_event(
                &target.id,
                &origins,
                self.event(target, Severity::Clear, "perfmon collection succeeded"),
            );
            CycleOutcome::Recorded
        }
    }

    fn event(&self, target: &DeviceTarget, severity: Severity, summary: impl Into<String>) -> Event {
        Event::new(&target.id, EVENT_CLASS, EVENT_KEY, severity, summary)
            .with_ip_address(&target.address)
    }

    fn record_event(
        &self,
        persister: &SharedPersister,
        target: &DeviceTarget,
        severity: Severity,
        summary: String,
    ) {
        let event = self.event(target, severity, summary);
        persister::lock(persister).add_event(&target.id, &target.origins(), event);
    }
}
