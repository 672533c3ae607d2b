//! Builds the remote `Get-Counter` invocation.
//!
//! Counter paths travel inside single-quoted PowerShell literals. Characters
//! that would terminate such a literal, or that commonly get mangled by the
//! remote console code page, are spliced out of the literal and rebuilt with
//! a `[char]N` cast:
//!
//! | Characters                          | Why                                      |
//! |-------------------------------------|------------------------------------------|
//! | `'` `"`                             | literal delimiters                       |
//! | `U+0000`-`U+001F`, `U+007F`         | control characters                       |
//! | `U+2000`-`U+206F`                   | typographic quotes, dashes, odd spaces   |
//!
//! `U+2018`-`U+201B` are treated as single quotes by PowerShell itself, so
//! `’` in `Temps d’activité` would otherwise close the literal early.
//! Everything else, including accented letters, is copied as is.
//!
//! Characters above `U+FFFF` never appear in the table, so every `[char]N`
//! produced here is exactly one UTF-16 code unit.

use std::fmt::Write;

/// Console width forced on the remote host before sampling. The default
/// 120 columns wraps long counter paths mid-line.
const CONSOLE_WIDTH: u32 = 4096;

/// Console height forced together with the width.
const CONSOLE_HEIGHT: u32 = 1024;

/// General Punctuation block.
const GENERAL_PUNCTUATION: std::ops::RangeInclusive<char> = '\u{2000}'..='\u{206F}';

/// Returns true when `c` must be rebuilt outside the quoted literal.
fn needs_splice(c: char) -> bool {
    matches!(c, '\'' | '"') || c.is_ascii_control() || GENERAL_PUNCTUATION.contains(&c)
}

/// Escapes a single counter path for use between single quotes.
fn escape_path(path: &str, out: &mut String) {
    for c in path.chars() {
        if needs_splice(c) {
            // Writing into a String cannot fail.
            let _ = write!(out, "'+[char]{}+'", c as u32);
        } else {
            out.push(c);
        }
    }
}

/// Formats counter paths as a PowerShell array body: `('a'),('b')`.
///
/// Returns an empty string for an empty slice.
pub fn format_counters<S: AsRef<str>>(paths: &[S]) -> String {
    let mut out = String::new();
    for (i, path) in paths.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("('");
        escape_path(path.as_ref(), &mut out);
        out.push_str("')");
    }
    out
}

/// Builds the remote script that samples `paths` once.
///
/// The console buffer is widened first and the enumeration limit lifted,
/// otherwise `Format-List` cuts readings with `...` or wraps them.
pub fn counter_script<S: AsRef<str>>(paths: &[S]) -> String {
    format!(
        "$FormatEnumerationLimit = -1; \
         $Host.UI.RawUI.BufferSize = New-Object Management.Automation.Host.Size ({}, {}); \
         Get-Counter -ErrorAction SilentlyContinue -Counter @({}) \
         | Format-List -Property Readings",
        CONSOLE_WIDTH,
        CONSOLE_HEIGHT,
        format_counters(paths)
    )
}

/// Wraps a script into a non-interactive PowerShell command line.
pub fn powershell_command(script: &str) -> String {
    format!("powershell -NoLogo -NonInteractive -NoProfile -Command \"& {{{}}}\"", script)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuilds the original text from one formatted item the way
    /// PowerShell concatenates `'...'+[char]N+'...'`.
    fn decode_item(item: &str) -> String {
        let inner = item
            .strip_prefix("('")
            .and_then(|s| s.strip_suffix("')"))
            .expect("item is wrapped in ('...')");
        let mut out = String::new();
        let mut rest = inner;
        while let Some(pos) = rest.find("'+[char]") {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + "'+[char]".len()..];
            let end = after.find("+'").expect("splice is closed");
            let code: u32 = after[..end].parse().expect("numeric code");
            out.push(char::from_u32(code).expect("valid char"));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    #[test]
    fn test_format_counters_plain() {
        assert_eq!(format_counters(&["a", "b"]), "('a'),('b')");
    }

    #[test]
    fn test_format_counters_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(format_counters(&empty), "");
    }

    #[test]
    fn test_format_counters_keeps_ascii_paths() {
        let path = r"\Processor(_Total)\% Processor Time";
        assert_eq!(format_counters(&[path]), format!("('{}')", path));
    }

    #[test]
    fn test_format_counters_right_single_quote() {
        assert_eq!(
            format_counters(&["\\Système\\Temps d\u{2019}activité système"]),
            "('\\Système\\Temps d'+[char]8217+'activité système')"
        );
    }

    #[test]
    fn test_format_counters_ascii_quotes() {
        assert_eq!(format_counters(&["it's"]), "('it'+[char]39+'s')");
        assert_eq!(format_counters(&["a\"b"]), "('a'+[char]34+'b')");
    }

    #[test]
    fn test_format_counters_adjacent_splices() {
        assert_eq!(
            format_counters(&["\u{2018}x\u{2019}\u{2019}"]),
            "(''+[char]8216+'x'+[char]8217+''+[char]8217+'')"
        );
    }

    #[test]
    fn test_format_counters_supplementary_plane_passes_through() {
        let path = "\\Custom\\Rocket \u{1F680}";
        assert_eq!(format_counters(&[path]), format!("('{}')", path));
    }

    #[test]
    fn test_format_counters_decodes_back() {
        let paths = [
            "\\Système\\Temps d\u{2019}activité système",
            "\\Dienst \u{201E}Web\u{201C}\\Anfragen \u{2013} gesamt",
            "\\Tab\there",
            "\\Plain\\Counter",
        ];
        for path in paths {
            let formatted = format_counters(&[path]);
            assert_eq!(decode_item(&formatted), path, "formatted: {}", formatted);
        }
    }

    #[test]
    fn test_counter_script_embeds_counters() {
        let script = counter_script(&["\\Memory\\Available Bytes"]);
        assert!(script.contains("Get-Counter -ErrorAction SilentlyContinue"));
        assert!(script.contains("@(('\\Memory\\Available Bytes'))"));
        assert!(script.ends_with("Format-List -Property Readings"));
        assert!(script.contains("(4096, 1024)"));
    }

    #[test]
    fn test_powershell_command_wraps_script() {
        assert_eq!(
            powershell_command("Get-Date"),
            "powershell -NoLogo -NonInteractive -NoProfile -Command \"& {Get-Date}\""
        );
    }
}
