//! Monotonic time abstraction shared by every timing-sensitive module.

use core::ops::Add;
use core::time::Duration;

/// Trait implemented by monotonic instant wrappers used by the terminal.
///
/// Firmware wraps the Embassy instant; the emulator and tests use virtual
/// clocks. Deadlines are computed with `Add<Duration>` and compared with `Ord`.
pub trait TerminalInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Rounds a remaining duration up to whole seconds for countdown displays.
#[must_use]
pub fn whole_seconds_ceil(remaining: Duration) -> u32 {
    let secs = remaining.as_secs();
    let secs = if remaining.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}
