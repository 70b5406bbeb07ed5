//! Window ids.

use std::time::{SystemTime, UNIX_EPOCH};

/// Start of the last completed frame before `unix_secs`.
///
/// A scheduler passes this to `start_sync` once a frame has closed, so
/// every node names the same window.
pub fn window_start(unix_secs: u64, frame_secs: u64) -> u64 {
    if frame_secs == 0 {
        return unix_secs;
    }
    (unix_secs / frame_secs).saturating_sub(1) * frame_secs
}

/// [`window_start`] for the current wall-clock time.
pub fn previous_window(frame_secs: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    window_start(now, frame_secs)
}
