//! Bounded, most-recent-first activity log shown to the user

use crate::types::{LogEntry, LogKind};

/// Insert `entry` at the front of `log`
///
/// With `replace_last`, the newest entry is overwritten instead when it is a
/// progress entry (notice or success). Error and done entries are never
/// replaced. The log is then truncated to `max_count` entries.
pub fn push(log: &mut Vec<LogEntry>, entry: LogEntry, replace_last: bool, max_count: usize) {
    let replaceable = log
        .first()
        .is_some_and(|newest| matches!(newest.kind, LogKind::Notice | LogKind::Success));

    if replace_last && replaceable {
        log[0] = entry;
    } else {
        log.insert(0, entry);
    }
    log.truncate(max_count);
}
