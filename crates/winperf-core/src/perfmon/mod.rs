//! Performance counter query pipeline.
//!
//! The remote side runs `Get-Counter` and prints its samples through
//! `Format-List`. This module owns the three pure steps around that call:
//!
//! ```text
//!   counter paths ──► query::format_counters ──► remote shell (external)
//!                                                       │
//!                                                 CommandResult
//!                                                       │
//!             validate::counter_returned ◄──────────────┤
//!                                                       ▼
//!                                  parser::format_stdout ──► CounterSample[]
//! ```
//!
//! None of these functions fail: malformed input is reported through the
//! returned values (`truncated`, validity flag) so callers always have
//! something to inspect.

pub mod parser;
pub mod query;
pub mod validate;

pub use parser::{CounterSample, format_stdout, same_counter};
pub use query::{counter_script, format_counters, powershell_command};
pub use validate::{counter_returned, failure_summary};
