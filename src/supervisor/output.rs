//! Output truncation for diagnostics attached to supervisor errors.

use std::borrow::Cow;

use camino::Utf8Path;

pub(crate) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(crate) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Number of trailing log lines attached to startup failures.
const LOG_TAIL_LINES: usize = 20;

pub(crate) fn truncate_output(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..OUTPUT_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Last lines of the instance log, or `None` when it cannot be read.
pub(crate) fn log_tail(log_path: &Utf8Path) -> Option<String> {
    let contents = std::fs::read_to_string(log_path).ok()?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    let tail = lines.get(start..)?.join("\n");
    (!tail.is_empty()).then(|| truncate_output(Cow::Owned(tail)))
}
