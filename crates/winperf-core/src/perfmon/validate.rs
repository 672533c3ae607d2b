//! Decides whether a remote `Get-Counter` run produced usable data.

use crate::perfmon::parser::readings_payload;
use crate::shell::CommandResult;

/// Returns true if `line` carries at least one counter reading.
///
/// Accepts both `Format-List` records (`Readings : \\host\...`) and the
/// default table layout where the path follows the timestamp:
/// `2/28/2018 10:28:06 PM     \\sqlsrv02\memory\available bytes :`.
fn is_counter_line(line: &str) -> bool {
    if let Some(payload) = readings_payload(line) {
        return !payload.is_empty();
    }
    let trimmed = line.trim();
    trimmed.ends_with(':') && trimmed.contains('\\')
}

/// Non-zero exit together with error output.
fn is_fatal(result: &CommandResult) -> bool {
    result.exit_code != 0 && result.stderr.iter().any(|l| !l.trim().is_empty())
}

/// Returns true when `result` holds counter data that can be parsed.
///
/// Error text with a zero exit code is tolerated: `Get-Counter` runs with
/// `-ErrorAction SilentlyContinue` and still reports counters it could not
/// find on stderr.
pub fn counter_returned(result: &CommandResult) -> bool {
    result.stdout.iter().any(|l| is_counter_line(l)) && !is_fatal(result)
}

/// One-line description of a failed run, for diagnostic events.
pub fn failure_summary(result: &CommandResult) -> String {
    match result.stderr.iter().map(|l| l.trim()).find(|l| !l.is_empty()) {
        Some(line) => line.to_string(),
        None if result.exit_code != 0 => {
            format!("counter query exited with code {}", result.exit_code)
        }
        None => "counter query returned no readings".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_STDOUT: &str = "  Timestamp                 CounterSamples
  ---------                 --------------
  2/28/2018 10:28:06 PM     \\\\sqlsrv02\\memory\\available bytes :
  2736390144
";

    #[test]
    fn test_counter_returned_table_layout() {
        let result = CommandResult::from_output(TABLE_STDOUT, "", 0);
        assert!(counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_error_only() {
        let result = CommandResult::new(vec![], vec!["some sort of error".to_string()], 1);
        assert!(!counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_readings_layout() {
        let result = CommandResult::from_output(
            "Readings : \\\\h\\memory\\available bytes :\n           1\n",
            "",
            0,
        );
        assert!(counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_warnings_with_zero_exit() {
        let result = CommandResult::from_output(
            "Readings : \\\\h\\memory\\available bytes :\n           1\n",
            "Get-Counter : The specified object was not found on the computer.",
            0,
        );
        assert!(counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_fatal_with_data() {
        let result = CommandResult::from_output(
            "Readings : \\\\h\\memory\\available bytes :\n           1\n",
            "Get-Counter : Access is denied.",
            1,
        );
        assert!(!counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_nonzero_exit_without_stderr() {
        let result = CommandResult::from_output("Readings : \\\\h\\a :\n  1\n", "", 1);
        assert!(counter_returned(&result));
    }

    #[test]
    fn test_counter_returned_empty_marker_only() {
        let result = CommandResult::from_output("Readings : \n", "", 0);
        assert!(!counter_returned(&result));
    }

    #[test]
    fn test_failure_summary() {
        let result = CommandResult::new(
            vec![],
            vec!["".to_string(), "  Get-Counter : Access is denied. ".to_string()],
            1,
        );
        assert_eq!(failure_summary(&result), "Get-Counter : Access is denied.");

        let result = CommandResult::new(vec![], vec![], 255);
        assert_eq!(failure_summary(&result), "counter query exited with code 255");

        let result = CommandResult::new(vec![], vec![], 0);
        assert_eq!(failure_summary(&result), "counter query returned no readings");
    }
}
