//! Parser for `Get-Counter | Format-List -Property Readings` output.
//!
//! A typical response looks like:
//!
//! ```text
//!
//! Readings : \\sqlsrv02\memory\available bytes :
//!            2736390144
//!
//!            \\sqlsrv02\processor(_total)\% processor time :
//!            3.125
//!
//! ```
//!
//! A record starts at a `Readings` line. Its body is the rest of that line
//! plus the indented lines that follow; blank lines inside a body only
//! separate readings. Any other non-indented line ends the record and is
//! skipped as decoration.
//!
//! When the remote console cuts output short, a record can end with a path
//! and no value, or have no body at all. Such readings are still emitted
//! (with the missing half empty) and the whole response is flagged as
//! truncated. A payload with no path header is a complete reading with an
//! empty path.

use serde::Serialize;

/// Label that opens a record.
pub const READINGS_MARKER: &str = "Readings";

/// One raw reading from the remote host.
///
/// The value is kept as text; only the caller knows the expected unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    /// Full counter path as printed by the host, e.g. `\\host\memory\available bytes`.
    pub path: String,
    /// Unconverted value text.
    pub value: String,
}

impl CounterSample {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Counter path without the `\\host` prefix.
    pub fn counter(&self) -> &str {
        strip_host(&self.path)
    }

    /// Returns true if this sample answers `requested`.
    ///
    /// `Get-Counter` echoes paths in lower case and prefixed with the
    /// machine name, so the comparison ignores both.
    pub fn matches(&self, requested: &str) -> bool {
        same_counter(&self.path, requested)
    }

    /// Parses the value as a float.
    ///
    /// Hosts with a non-English locale print a comma as the decimal
    /// separator; a single comma is accepted in place of a dot.
    pub fn value_f64(&self) -> Option<f64> {
        let raw = self.value.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Some(v);
        }
        if raw.matches(',').count() == 1 && !raw.contains('.') {
            return raw.replace(',', ".").parse::<f64>().ok();
        }
        None
    }
}

/// Returns true if both paths name the same counter. Host prefixes are
/// ignored and case is folded over full Unicode.
pub fn same_counter(a: &str, b: &str) -> bool {
    strip_host(a).to_lowercase() == strip_host(b).to_lowercase()
}

/// Strips a leading `\\machine` from a counter path.
fn strip_host(path: &str) -> &str {
    match path.strip_prefix("\\\\") {
        Some(rest) => match rest.find('\\') {
            Some(pos) => &rest[pos..],
            None => path,
        },
        None => path,
    }
}

/// Returns the record payload if `line` opens a `Readings` record.
///
/// The marker must be a whole word: `Readings`, `Readings:` and
/// `Readings : x` match, `ReadingsCount` does not.
pub(crate) fn readings_payload(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix(READINGS_MARKER)?;
    match rest.chars().next() {
        None => Some(""),
        Some(c) if c == ':' || c.is_whitespace() => {
            let rest = rest.trim_start();
            let rest = rest.strip_prefix(':').unwrap_or(rest);
            Some(rest.trim())
        }
        Some(_) => None,
    }
}

/// Returns the path if `token` is a `<path> :` header.
fn path_header(token: &str) -> Option<&str> {
    if !token.starts_with('\\') {
        return None;
    }
    token.strip_suffix(':').map(str::trim_end)
}

/// Accumulates readings and the truncation flag across records.
#[derive(Default)]
struct ReadingsBuilder {
    samples: Vec<CounterSample>,
    truncated: bool,
}

impl ReadingsBuilder {
    /// Turns one record body into samples.
    fn flush(&mut self, tokens: Vec<String>) {
        if tokens.is_empty() {
            self.samples.push(CounterSample::new("", ""));
            self.truncated = true;
            return;
        }

        let mut pending: Option<String> = None;
        for token in tokens {
            if let Some(path) = path_header(&token) {
                if let Some(prev) = pending.take() {
                    self.samples.push(CounterSample::new(prev, ""));
                    self.truncated = true;
                }
                pending = Some(path.to_string());
            } else if let Some(path) = pending.take() {
                self.samples.push(CounterSample::new(path, token));
            } else {
                // Bare payload without a path header is the record's own reading.
                self.samples.push(CounterSample::new("", token));
            }
        }

        if let Some(path) = pending {
            self.samples.push(CounterSample::new(path, ""));
            self.truncated = true;
        }
    }
}

/// Parses the remote output lines into samples.
///
/// Returns the samples in output order and whether the response looked cut
/// short. An empty input gives `([], false)`.
pub fn format_stdout<S: AsRef<str>>(lines: &[S]) -> (Vec<CounterSample>, bool) {
    let mut builder = ReadingsBuilder::default();
    let mut record: Option<Vec<String>> = None;

    for line in lines {
        let line = line.as_ref();

        if let Some(payload) = readings_payload(line) {
            if let Some(tokens) = record.take() {
                builder.flush(tokens);
            }
            let mut tokens = Vec::new();
            if !payload.is_empty() {
                tokens.push(payload.to_string());
            }
            record = Some(tokens);
            continue;
        }

        let Some(tokens) = record.as_mut() else {
            continue;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            tokens.push(trimmed.to_string());
        } else {
            builder.flush(std::mem::take(tokens));
            record = None;
        }
    }

    if let Some(tokens) = record {
        builder.flush(tokens);
    }

    (builder.samples, builder.truncated)
}
