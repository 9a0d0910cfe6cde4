#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Embassy-backed instant for the shared controller.

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Duration as EmbassyDuration, Instant};
use vending_core::clock::TerminalInstant;

/// Monotonic instant driven by the Embassy time driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[cfg(test)]
    const fn from_embassy(instant: Instant) -> Self {
        Self(instant)
    }

    #[cfg(test)]
    const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(
            self.0
                .checked_add(to_embassy(rhs))
                .unwrap_or(Instant::MAX),
        )
    }
}

impl TerminalInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0
            .checked_duration_since(earlier.0)
            .map_or(Duration::ZERO, |elapsed| {
                Duration::from_micros(elapsed.as_micros())
            })
    }
}

/// Converts a core duration into Embassy ticks, saturating on overflow.
pub fn to_embassy(duration: Duration) -> EmbassyDuration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    EmbassyDuration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_round_trip_through_embassy_ticks() {
        let start = FirmwareInstant::from_embassy(Instant::from_millis(1_000));
        let later = start + Duration::from_millis(2_500);

        assert_eq!(
            later.saturating_duration_since(start),
            Duration::from_millis(2_500)
        );
        assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn addition_saturates_at_the_end_of_time() {
        let start = FirmwareInstant::from_embassy(Instant::MAX);
        assert_eq!((start + Duration::from_secs(1)).into_embassy(), Instant::MAX);
    }
}
