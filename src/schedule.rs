//! Poll interval scheduling
//!
//! During the day the device polls at the configured interval. Inside the
//! night window it is told to sleep straight through to the morning wake
//! time, collapsing a night of polls into one.

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Night window bounds, local time
///
/// The window is half-open: `[night_start, morning_wake)`, wrapping past
/// midnight. The instant `night_start` itself is night; `morning_wake` is day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    pub night_start: NaiveTime,
    pub morning_wake: NaiveTime,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            night_start: NaiveTime::from_hms_opt(22, 30, 0).unwrap_or_default(),
            morning_wake: NaiveTime::from_hms_opt(6, 30, 0).unwrap_or_default(),
        }
    }
}

impl NightWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.night_start > self.morning_wake {
            time >= self.night_start || time < self.morning_wake
        } else {
            time >= self.night_start && time < self.morning_wake
        }
    }

    /// Minutes the device should sleep before its next poll
    pub fn next_interval(&self, now: NaiveDateTime, daytime_minutes: u32) -> u32 {
        if !self.contains(now.time()) {
            tracing::debug!("Day mode active, using {} minutes", daytime_minutes);
            return daytime_minutes;
        }

        let today_wake = now.date().and_time(self.morning_wake);
        let target = if now < today_wake {
            today_wake
        } else {
            today_wake + Duration::days(1)
        };

        // One extra minute so the wake-up lands at or after the target
        let minutes = (target - now).num_minutes() as u32 + 1;

        tracing::info!(
            "Night mode active, sleeping {} minutes (until {})",
            minutes,
            target.format("%H:%M")
        );
        minutes
    }
}

/// Parse an `HH:MM` clock time
pub fn parse_clock(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| format!("expected HH:MM, got {:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn next_interval(now: NaiveDateTime, daytime_minutes: u32) -> u32 {
        NightWindow::default().next_interval(now, daytime_minutes)
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_daytime_returns_configured_interval() {
        assert_eq!(next_interval(at(22, 29, 0), 30), 30);
        assert_eq!(next_interval(at(6, 31, 0), 30), 30);
        assert_eq!(next_interval(at(12, 0, 0), 5), 5);
    }

    #[test]
    fn test_evening_sleeps_until_tomorrow_morning() {
        // 22:31 -> 06:31 next day
        assert_eq!(next_interval(at(22, 31, 0), 30), 8 * 60);
        assert_eq!(next_interval(at(23, 59, 0), 30), 6 * 60 + 32);
    }

    #[test]
    fn test_early_morning_sleeps_until_today() {
        // 06:29 -> 06:31
        assert_eq!(next_interval(at(6, 29, 0), 30), 2);
        assert_eq!(next_interval(at(0, 0, 0), 30), 6 * 60 + 31);
    }

    #[test]
    fn test_boundaries_are_half_open() {
        assert_eq!(next_interval(at(22, 30, 0), 30), 8 * 60 + 1);
        assert_eq!(next_interval(at(6, 30, 0), 30), 30);
    }

    #[test]
    fn test_partial_minutes_never_wake_early() {
        // 22:31:30 -> 478.5 minutes to 06:30, truncated to 478, plus one
        let now = at(22, 31, 30);
        let minutes = next_interval(now, 30);
        assert_eq!(minutes, 479);
        let wake = now + Duration::minutes(minutes as i64);
        assert!(wake >= at(6, 30, 0) + Duration::days(1));
    }

    #[test]
    fn test_custom_window() {
        let window = NightWindow {
            night_start: parse_clock("01:00").unwrap(),
            morning_wake: parse_clock("05:00").unwrap(),
        };
        assert!(!window.contains(parse_clock("00:59").unwrap()));
        assert!(window.contains(parse_clock("01:00").unwrap()));
        assert_eq!(window.next_interval(at(4, 0, 0), 15), 61);
        assert_eq!(window.next_interval(at(5, 0, 0), 15), 15);
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert!(parse_clock("25:00").is_err());
        assert!(parse_clock("noon").is_err());
    }
}
