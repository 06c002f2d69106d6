//! Shared hysteresis/dwell-timer primitive used by the loadpoint state
//! machine (phase-switch and enable/disable hysteresis) and the site
//! allocator (battery-mode-change dwell).

use chrono::{DateTime, Duration, Utc};

/// Tracks how long a condition has held continuously, and separately
/// debounces how recently a change was committed. A condition must hold
/// for its configured delay before `sustained_for` reports true, and a
/// commit resets the continuity clock and starts the dwell clock.
#[derive(Debug, Clone, Copy)]
pub struct DwellTimer {
    condition_since: Option<DateTime<Utc>>,
    last_change: Option<DateTime<Utc>>,
}

impl Default for DwellTimer {
    fn default() -> Self {
        Self { condition_since: None, last_change: None }
    }
}

impl DwellTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current truth of some boolean condition (e.g. "surplus
    /// exceeds the 3-phase threshold"). Returns how long it has held
    /// continuously, resetting to zero the moment it goes false.
    pub fn observe(&mut self, now: DateTime<Utc>, condition_true: bool) -> Duration {
        if condition_true {
            let since = *self.condition_since.get_or_insert(now);
            now - since
        } else {
            self.condition_since = None;
            Duration::zero()
        }
    }

    /// Whether the condition has held continuously for at least `delay`.
    pub fn sustained_for(&mut self, now: DateTime<Utc>, condition_true: bool, delay: Duration) -> bool {
        self.observe(now, condition_true) >= delay
    }

    /// Whether at least `dwell` has elapsed since the last recorded
    /// change; `true` (permits a change) when no change has ever been
    /// recorded.
    pub fn dwell_elapsed(&self, now: DateTime<Utc>, dwell: Duration) -> bool {
        match self.last_change {
            None => true,
            Some(last) => now - last >= dwell,
        }
    }

    /// Record that a change was just committed, resetting both clocks.
    pub fn record_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
        self.condition_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(s)
    }

    #[test]
    fn sustained_for_requires_continuous_true() {
        let mut timer = DwellTimer::new();
        assert!(!timer.sustained_for(t(0), true, Duration::seconds(10)));
        assert!(!timer.sustained_for(t(5), true, Duration::seconds(10)));
        assert!(timer.sustained_for(t(11), true, Duration::seconds(10)));
    }

    #[test]
    fn condition_going_false_resets_continuity() {
        let mut timer = DwellTimer::new();
        timer.observe(t(0), true);
        timer.observe(t(8), false);
        assert!(!timer.sustained_for(t(9), true, Duration::seconds(5)));
    }

    #[test]
    fn dwell_elapsed_blocks_rapid_repeated_changes() {
        let mut timer = DwellTimer::new();
        assert!(timer.dwell_elapsed(t(0), Duration::seconds(60)));
        timer.record_change(t(0));
        assert!(!timer.dwell_elapsed(t(30), Duration::seconds(60)));
        assert!(timer.dwell_elapsed(t(61), Duration::seconds(60)));
    }
}
