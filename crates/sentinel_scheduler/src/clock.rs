use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Longest delay a timer is armed with; later timestamps wait this long.
pub const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wall clock in epoch milliseconds, advancing with the tokio timer.
///
/// The wall time is read once at creation and then advanced by the
/// runtime's monotonic clock, so persisted timestamps and armed timers
/// always agree, including under a paused test runtime.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch_ms: u64,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(millis)
            .unwrap_or_default();
        Self::starting_at(epoch_ms)
    }

    /// A clock that reads `epoch_ms` right now.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch_ms.saturating_add(millis(self.origin.elapsed()))
    }

    /// Timer deadline for an epoch timestamp; past timestamps map to now.
    pub fn deadline(&self, at_ms: u64) -> Instant {
        let delay = Duration::from_millis(at_ms.saturating_sub(self.now_ms())).min(MAX_DELAY);
        Instant::now() + delay
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
