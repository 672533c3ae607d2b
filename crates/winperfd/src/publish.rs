//! Publishing sink: one JSON line per drained device.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use winperf_core::persister::{self, DeviceData, SharedPersister};

#[derive(Serialize)]
struct PublishRecord<'a> {
    device: &'a str,
    published_at: DateTime<Utc>,
    #[serde(flatten)]
    data: &'a DeviceData,
}

/// Writes drained device data as JSON lines.
pub(crate) struct Publisher<W: Write> {
    out: W,
    published: u64,
}

impl<W: Write> Publisher<W> {
    pub(crate) fn new(out: W) -> Self {
        Self { out, published: 0 }
    }

    /// Writes one record. Empty snapshots are skipped; returns whether a
    /// line was written.
    pub(crate) fn publish(&mut self, device: &str, data: &DeviceData) -> io::Result<bool> {
        if data.is_empty() {
            return Ok(false);
        }
        let record = PublishRecord {
            device,
            published_at: Utc::now(),
            data,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.published += 1;
        Ok(true)
    }

    /// Total records written.
    pub(crate) fn published(&self) -> u64 {
        self.published
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Pops every device in `devices` and publishes what was buffered.
///
/// Returns the number of records written.
pub(crate) fn drain<W: Write>(
    persister: &SharedPersister,
    devices: &[String],
    publisher: &mut Publisher<W>,
) -> usize {
    let mut written = 0;
    for device in devices {
        // Pop under the lock, write outside it.
        let data = persister::lock(persister).pop(device);
        match publisher.publish(device, &data) {
            Ok(true) => {
                debug!(
                    device = %device,
                    values = data.value_count(),
                    events = data.events.len(),
                    maps = data.maps.len(),
                    "published"
                );
                written += 1;
            }
            Ok(false) => {}
            Err(e) => error!(device = %device, error = %e, "failed to publish device data"),
        }
    }
    written
}
