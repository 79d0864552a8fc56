//! Exponential crash backoff.

/// Crash backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashBackoff {
    /// Crashes tolerated before restarts start being delayed.
    pub crashes_before_backoff: u32,

    /// Delay applied once the threshold is reached, in seconds.
    pub starting_delay_secs: u64,

    /// Ceiling for the delay, in seconds.
    pub maximum_delay_secs: u64,
}

impl Default for CrashBackoff {
    fn default() -> Self {
        Self {
            crashes_before_backoff: crate::DEFAULT_CRASHES_BEFORE_BACKOFF,
            starting_delay_secs: crate::DEFAULT_STARTING_BACKOFF_DELAY_SECS,
            maximum_delay_secs: crate::DEFAULT_MAXIMUM_BACKOFF_DELAY_SECS,
        }
    }
}

impl CrashBackoff {
    /// Delay before restarting an index that has crashed `crash_count` times.
    pub fn delay_for(&self, crash_count: u32) -> u64 {
        compute_crash_delay(
            crash_count,
            self.crashes_before_backoff,
            self.starting_delay_secs,
            self.maximum_delay_secs,
        )
    }
}

/// Compute the restart delay for a crash count.
///
/// Returns 0 below `threshold`, `starting_delay` at the threshold, and
/// doubles for each further crash until the value would exceed `max_delay`,
/// from which point `max_delay` is returned exactly.
///
/// Example with threshold=3, starting=30, max=950:
/// `0, 0, 0, 30, 60, 120, 240, 480, 950, 950, ...`
pub fn compute_crash_delay(crash_count: u32, threshold: u32, starting_delay: u64, max_delay: u64) -> u64 {
    if crash_count < threshold {
        return 0;
    }

    let mut delay = starting_delay;
    for _ in threshold..crash_count {
        // Every doubling from here on would only grow past the ceiling (or stay at 0).
        if delay == 0 || delay >= max_delay {
            break;
        }
        delay = delay.saturating_mul(2);
    }

    delay.min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 0)]
    #[case(2, 0)]
    #[case(3, 30)]
    #[case(4, 60)]
    #[case(5, 120)]
    #[case(6, 240)]
    #[case(7, 480)]
    #[case(8, 960)]
    #[case(9, 960)]
    #[case(10, 960)]
    #[case(10_000, 960)]
    fn test_power_of_two_ceiling(#[case] crashes: u32, #[case] expected: u64) {
        assert_eq!(compute_crash_delay(crashes, 3, 30, 960), expected);
    }

    #[rstest]
    #[case(2, 0)]
    #[case(3, 30)]
    #[case(7, 480)]
    #[case(8, 950)]
    #[case(9, 950)]
    #[case(1000, 950)]
    fn test_non_power_of_two_ceiling(#[case] crashes: u32, #[case] expected: u64) {
        assert_eq!(compute_crash_delay(crashes, 3, 30, 950), expected);
    }

    #[test]
    fn test_starting_delay_above_ceiling_is_clamped() {
        assert_eq!(compute_crash_delay(3, 3, 100, 50), 50);
    }

    #[test]
    fn test_zero_starting_delay_never_grows() {
        assert_eq!(compute_crash_delay(u32::MAX, 0, 0, 960), 0);
    }

    #[test]
    fn test_huge_crash_count_terminates() {
        assert_eq!(compute_crash_delay(u32::MAX, 0, 1, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_backoff_defaults() {
        let backoff = CrashBackoff::default();
        assert_eq!(backoff.delay_for(2), 0);
        assert_eq!(backoff.delay_for(3), 30);
        assert_eq!(backoff.delay_for(50), 960);
    }

    proptest! {
        #[test]
        fn delay_is_non_decreasing(
            crashes in 0u32..200,
            threshold in 0u32..10,
            starting in 1u64..120,
            max in 1u64..5000,
        ) {
            let this = compute_crash_delay(crashes, threshold, starting, max);
            let next = compute_crash_delay(crashes + 1, threshold, starting, max);
            prop_assert!(next >= this);
            prop_assert!(next <= max);
        }

        #[test]
        fn delay_doubles_until_ceiling(
            extra in 0u32..20,
            starting in 1u64..120,
            max in 1u64..100_000,
        ) {
            let this = compute_crash_delay(3 + extra, 3, starting, max);
            let next = compute_crash_delay(4 + extra, 3, starting, max);
            prop_assert!(next == this * 2 || next == max);
        }
    }
}
