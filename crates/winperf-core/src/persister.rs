//! Per-device accumulator for collection results.
//!
//! Several polling operations for the same device can be in flight at
//! once, and they finish in no particular order. `DataPersister` buffers
//! whatever they produce (modeling maps, events, counter values) under the
//! device key until a consumer pops the whole entry for publishing.
//!
//! An entry exists from the first write for a device until it is popped,
//! removed, or evicted. Eviction covers devices whose collection chain
//! stalled and will never pop: `maintenance` drops every entry that has
//! not been touched within the idle bound.
//!
//! The table itself takes no locks. Runtimes that move tasks across
//! threads share it as a [`SharedPersister`] and keep each lock section
//! free of `.await` points, which keeps every operation atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Accumulator shared between tasks.
pub type SharedPersister = Arc<Mutex<DataPersister>>;

/// Locks a shared persister.
///
/// Every operation leaves the table consistent, so a panic in another
/// holder does not invalidate it and the poison flag is ignored.
pub fn lock(shared: &SharedPersister) -> MutexGuard<'_, DataPersister> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event severity, ordered from clear to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Clear,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Identifies the datasource that produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasourceRef {
    pub plugin: String,
    pub datasource: String,
}

impl DatasourceRef {
    pub fn new(plugin: impl Into<String>, datasource: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            datasource: datasource.into(),
        }
    }
}

/// Status event produced during collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub event_class: String,
    pub event_key: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Datasources the event was raised for. Diagnostic only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<DatasourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        device: impl Into<String>,
        event_class: impl Into<String>,
        event_key: impl Into<String>,
        severity: Severity,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            component: None,
            event_class: event_class.into(),
            event_key: event_key.into(),
            severity,
            summary: summary.into(),
            ip_address: None,
            origins: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

/// Modeling result for the device or one of its components.
///
/// The accumulator does not look inside; producers decide the attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modname: Option<String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Latest value collected for one (component, datasource) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollectedValue {
    pub value: f64,
    pub collected_at: DateTime<Utc>,
}

/// Values keyed by component, then datasource.
pub type ValueTable = BTreeMap<String, BTreeMap<String, CollectedValue>>;

/// Everything buffered for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceData {
    pub maps: Vec<ObjectMap>,
    pub events: Vec<Event>,
    pub values: ValueTable,
}

impl DeviceData {
    /// True when nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty() && self.events.is_empty() && self.values.is_empty()
    }

    /// Number of (component, datasource) values.
    pub fn value_count(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }
}

struct DeviceEntry {
    last: Instant,
    data: DeviceData,
}

impl DeviceEntry {
    fn new(now: Instant) -> Self {
        Self {
            last: now,
            data: DeviceData::default(),
        }
    }
}

/// Accumulates per-device collection state between publishes.
#[derive(Default)]
pub struct DataPersister {
    devices: HashMap<String, DeviceEntry>,
}

impl DataPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a new persister for sharing between tasks.
    pub fn shared() -> SharedPersister {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Returns the entry for `device`, creating it and refreshing its
    /// liveness timestamp.
    fn entry(&mut self, device: &str) -> &mut DeviceEntry {
        let now = Instant::now();
        let entry = self
            .devices
            .entry(device.to_string())
            .or_insert_with(|| DeviceEntry::new(now));
        // Never moves back.
        entry.last = entry.last.max(now);
        entry
    }

    /// Marks `device` as alive, creating its entry if needed.
    pub fn touch(&mut self, device: &str) {
        self.entry(device);
    }

    /// Stores the latest value for a (component, datasource) pair,
    /// replacing any earlier one.
    pub fn add_value(
        &mut self,
        device: &str,
        component: &str,
        datasource: &str,
        value: f64,
        collected_at: DateTime<Utc>,
    ) {
        self.entry(device)
            .data
            .values
            .entry(component.to_string())
            .or_default()
            .insert(
                datasource.to_string(),
                CollectedValue {
                    value,
                    collected_at,
                },
            );
    }

    /// Appends an event, tagging it with the datasources it came from.
    ///
    /// Duplicates are kept; deduplication belongs to the event consumer.
    pub fn add_event(&mut self, device: &str, origins: &[DatasourceRef], mut event: Event) {
        event.origins.extend_from_slice(origins);
        self.entry(device).data.events.push(event);
    }

    /// Appends modeling maps.
    pub fn add_maps(&mut self, device: &str, maps: impl IntoIterator<Item = ObjectMap>) {
        self.entry(device).data.maps.extend(maps);
    }

    /// Returns a copy of the buffered data without resetting it.
    pub fn get(&self, device: &str) -> DeviceData {
        self.devices
            .get(device)
            .map(|e| e.data.clone())
            .unwrap_or_default()
    }

    /// Borrows the buffered events.
    pub fn get_events(&self, device: &str) -> &[Event] {
        self.devices
            .get(device)
            .map(|e| e.data.events.as_slice())
            .unwrap_or_default()
    }

    /// Removes the entry and returns its data.
    pub fn pop(&mut self, device: &str) -> DeviceData {
        self.devices
            .remove(device)
            .map(|e| e.data)
            .unwrap_or_default()
    }

    /// Drops the entry, if any.
    pub fn remove(&mut self, device: &str) {
        self.devices.remove(device);
    }

    /// Evicts entries idle for longer than `idle`. Returns how many were dropped.
    pub fn maintenance(&mut self, idle: Duration) -> usize {
        self.maintenance_at(Instant::now(), idle)
    }

    /// `maintenance` against an explicit clock reading.
    pub fn maintenance_at(&mut self, now: Instant, idle: Duration) -> usize {
        let before = self.devices.len();
        self.devices.retain(|device, entry| {
            let age = now.saturating_duration_since(entry.last);
            let keep = age <= idle;
            if !keep {
                debug!(
                    device = %device,
                    idle_secs = age.as_secs(),
                    values = entry.data.value_count(),
                    events = entry.data.events.len(),
                    "evicting idle device"
                );
            }
            keep
        });
        before - self.devices.len()
    }

    /// Time of the last write or touch for `device`.
    pub fn last_touch(&self, device: &str) -> Option<Instant> {
        self.devices.get(device).map(|e| e.last)
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// Keys of all buffered devices, in no particular order.
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
