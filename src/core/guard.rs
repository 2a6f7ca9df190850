//! Per-Turn Input Guard
//!
//! Bounds how much a single player can inject during one turn, in line
//! count and in total bytes, independent of how fast it sends them.

use crate::config::TurnLimits;

/// Check whether `line` may be appended to a player's pending input.
///
/// All three must hold:
/// - fewer than `max_lines_per_turn` lines were accepted this turn,
/// - pending bytes plus the new line stay below `max_pending_bytes`,
/// - the line is newline-terminated, or empty (stream end).
///
/// A non-empty line without a trailing newline is a partial read: either
/// the line exceeded `max_line_len` or the peer closed mid-line.
pub fn admits_line(
    received_lines: usize,
    pending_bytes: usize,
    line: &str,
    limits: &TurnLimits,
) -> bool {
    received_lines < limits.max_lines_per_turn
        && pending_bytes.saturating_add(line.len()) < limits.max_pending_bytes
        && (line.is_empty() || line.ends_with('\n'))
}
