//! winperf-core — shared library for the winperf collector.
//!
//! Provides:
//! - `perfmon` — remote counter query formatting, response parsing and validation
//! - `persister` — per-device accumulator for values, events and modeling maps
//! - `shell` — remote-shell abstraction (ssh, mock) and command results
//! - `collector` — one polling cycle for one device, wiring the pieces above
//! - `config` — TOML configuration for devices, counters and timings

pub mod collector;
pub mod config;
pub mod perfmon;
pub mod persister;
pub mod shell;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
