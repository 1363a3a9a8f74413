//! Allowed-hours evaluation
//!
//! Windows are inclusive at both ends and may wrap past midnight
//! (`22:00-06:00`).

use crate::error::{Error, Result};
use crate::policy::{Profile, LAST_MINUTE};
use chrono::{NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};

const MINUTES_PER_DAY: u16 = 1440;

/// Minutes since midnight, 0..=1439
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Midnight
    pub const MIDNIGHT: Self = Self(0);

    /// From minutes of day
    pub fn new(minutes: u16) -> Result<Self> {
        if minutes > LAST_MINUTE {
            return Err(Error::config_value(
                "time",
                format!("{minutes} is not a minute of the day (0..=1439)"),
            ));
        }
        Ok(Self(minutes))
    }

    /// From hour and minute
    pub fn from_hm(hour: u16, minute: u16) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::config_value(
                "time",
                format!("{hour:02}:{minute:02} is not a valid time"),
            ));
        }
        Ok(Self(hour * 60 + minute))
    }

    /// Minutes since midnight
    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Hour part
    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    /// Minute part
    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl From<NaiveTime> for TimeOfDay {
    #[allow(clippy::cast_possible_truncation)]
    fn from(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::config_value("time", format!("'{s}' is not in HH:MM format"));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u16 = hour.parse().map_err(|_| invalid())?;
        let minute: u16 = minute.parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Source of the current wall-clock time of day
pub trait Clock: Send + Sync {
    /// Current local time of day
    fn now(&self) -> TimeOfDay;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeOfDay {
        TimeOfDay::from(chrono::Local::now().time())
    }
}

/// Settable clock for tests and dry runs
#[derive(Debug, Default)]
pub struct FixedClock {
    minutes: AtomicU16,
}

impl FixedClock {
    /// Clock stopped at `time`
    pub fn new(time: TimeOfDay) -> Self {
        Self {
            minutes: AtomicU16::new(time.minutes()),
        }
    }

    /// Move the clock
    pub fn set(&self, time: TimeOfDay) {
        self.minutes.store(time.minutes(), Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> TimeOfDay {
        TimeOfDay(self.minutes.load(Ordering::Relaxed))
    }
}

/// Whether `now` falls in the inclusive window `start..=end`
pub fn window_contains(start: u16, end: u16, now: TimeOfDay) -> bool {
    let now = now.minutes();
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Whether `profile` permits access at `now`
pub fn is_allowed_now(profile: &Profile, now: TimeOfDay) -> bool {
    !profile.schedule_enabled || window_contains(profile.allowed_start, profile.allowed_end, now)
}

/// Start of the next allowed window, `None` if access is allowed now
pub fn next_allowed(profile: &Profile, now: TimeOfDay) -> Option<TimeOfDay> {
    if is_allowed_now(profile, now) {
        return None;
    }
    Some(TimeOfDay(profile.allowed_start.min(LAST_MINUTE)))
}

/// Minutes until access is allowed again, 0 if allowed now
pub fn minutes_until_allowed(profile: &Profile, now: TimeOfDay) -> u16 {
    match next_allowed(profile, now) {
        None => 0,
        Some(start) => (start.minutes() + MINUTES_PER_DAY - now.minutes()) % MINUTES_PER_DAY,
    }
}

/// `HH:MM-HH:MM` rendering of a profile's window
pub fn describe_window(profile: &Profile) -> String {
    format!(
        "{}-{}",
        TimeOfDay(profile.allowed_start.min(LAST_MINUTE)),
        TimeOfDay(profile.allowed_end.min(LAST_MINUTE))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn profile(start: u16, end: u16) -> Profile {
        Profile::new(1, "kid").with_schedule(start, end)
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(at("08:00").minutes(), 480);
        assert_eq!(at("23:59").minutes(), 1439);
        assert_eq!(at(" 7:05 ").to_string(), "07:05");
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!(TimeOfDay::new(1440).is_err());
    }

    #[test]
    fn test_from_naive_time() {
        let time = NaiveTime::from_hms_opt(21, 30, 59).unwrap();
        assert_eq!(TimeOfDay::from(time).minutes(), 1290);
    }

    #[test]
    fn test_normal_window() {
        let p = profile(480, 1260);
        assert!(!is_allowed_now(&p, at("07:00")));
        assert!(is_allowed_now(&p, at("10:00")));
        assert!(is_allowed_now(&p, at("08:00")));
        assert!(is_allowed_now(&p, at("21:00")));
        assert!(!is_allowed_now(&p, at("21:01")));
    }

    #[test]
    fn test_wraparound_window() {
        let p = profile(1320, 360);
        assert!(is_allowed_now(&p, at("23:00")));
        assert!(is_allowed_now(&p, at("03:00")));
        assert!(!is_allowed_now(&p, at("12:00")));
    }

    #[test]
    fn test_disabled_schedule() {
        let mut p = profile(480, 500);
        p.schedule_enabled = false;
        assert!(is_allowed_now(&p, at("03:00")));
    }

    #[test]
    fn test_next_allowed() {
        let p = profile(480, 1260);
        assert_eq!(next_allowed(&p, at("10:00")), None);
        assert_eq!(next_allowed(&p, at("22:00")), Some(at("08:00")));
        assert_eq!(minutes_until_allowed(&p, at("22:00")), 600);
        assert_eq!(minutes_until_allowed(&p, at("07:30")), 30);
        assert_eq!(minutes_until_allowed(&p, at("10:00")), 0);
    }

    #[test]
    fn test_describe_window() {
        assert_eq!(describe_window(&profile(1320, 360)), "22:00-06:00");
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(at("06:00"));
        assert_eq!(clock.now(), at("06:00"));
        clock.set(at("18:45"));
        assert_eq!(clock.now().to_string(), "18:45");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn evaluation_is_deterministic(start in 0u16..1440, end in 0u16..1440, now in 0u16..1440) {
                let p = profile(start, end);
                let now = TimeOfDay(now);
                prop_assert_eq!(is_allowed_now(&p, now), is_allowed_now(&p, now));
            }

            #[test]
            fn disabled_schedule_always_allows(start in 0u16..1440, end in 0u16..1440, now in 0u16..1440) {
                let mut p = profile(start, end);
                p.schedule_enabled = false;
                prop_assert!(is_allowed_now(&p, TimeOfDay(now)));
            }

            #[test]
            fn window_contains_its_bounds(start in 0u16..1440, end in 0u16..1440) {
                let p = profile(start, end);
                prop_assert!(is_allowed_now(&p, TimeOfDay(start)));
                prop_assert!(is_allowed_now(&p, TimeOfDay(end)));
            }

            #[test]
            fn waiting_lands_in_window(start in 0u16..1440, end in 0u16..1440, now in 0u16..1440) {
                let p = profile(start, end);
                let wait = minutes_until_allowed(&p, TimeOfDay(now));
                let later = TimeOfDay((now + wait) % MINUTES_PER_DAY);
                prop_assert!(is_allowed_now(&p, later));
            }
        }
    }
}
