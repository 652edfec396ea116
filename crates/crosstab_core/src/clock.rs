//! Wall-clock helpers shared by contexts.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch; `0` if the clock is before the epoch.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
