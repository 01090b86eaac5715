use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted `every@` period: one leap year.
pub const MAX_PERIOD_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid cadence '{0}': expected daily@HH:MM, every@SECONDS or disabled")]
    InvalidCadence(String),

    #[error("Invalid time of day '{0}'")]
    InvalidTimeOfDay(String),

    #[error("Cadence period must be at least one second")]
    ZeroPeriod,

    #[error("Cadence period of {0}s exceeds the {max}s limit", max = MAX_PERIOD_SECS)]
    PeriodTooLong(u64),
}

/// When a scan runs. `Daily` times are UTC wall-clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScanCadence {
    Daily { hour: u32, minute: u32 },
    Every(u64),
    Disabled,
}

impl ScanCadence {
    pub const fn daily(hour: u32, minute: u32) -> Self {
        ScanCadence::Daily { hour, minute }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ScanCadence::Disabled)
    }

    /// First run instant strictly after `now`. `None` when disabled or when
    /// the next instant is out of range.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            ScanCadence::Daily { hour, minute } => {
                let today = now.date_naive().and_hms_opt(hour, minute, 0)?;
                let today = Utc.from_utc_datetime(&today);
                if today > now {
                    Some(today)
                } else {
                    today.checked_add_signed(ChronoDuration::days(1))
                }
            }
            ScanCadence::Every(secs) => {
                let period = ChronoDuration::from_std(Duration::from_secs(secs)).ok()?;
                now.checked_add_signed(period)
            }
            ScanCadence::Disabled => None,
        }
    }

    /// How long to sleep from `now` until the next run.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_after(now)?;
        (next - now).to_std().ok()
    }
}

impl FromStr for ScanCadence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("disabled") || s.eq_ignore_ascii_case("off") {
            return Ok(ScanCadence::Disabled);
        }

        let (kind, value) = s
            .split_once('@')
            .ok_or_else(|| ConfigError::InvalidCadence(s.to_string()))?;

        match kind {
            "daily" => {
                let (hour, minute) = value
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidTimeOfDay(value.to_string()))?;
                let hour: u32 = hour
                    .parse()
                    .map_err(|_| ConfigError::InvalidTimeOfDay(value.to_string()))?;
                let minute: u32 = minute
                    .parse()
                    .map_err(|_| ConfigError::InvalidTimeOfDay(value.to_string()))?;
                if hour > 23 || minute > 59 {
                    return Err(ConfigError::InvalidTimeOfDay(value.to_string()));
                }
                Ok(ScanCadence::Daily { hour, minute })
            }
            "every" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidCadence(s.to_string()))?;
                if secs == 0 {
                    return Err(ConfigError::ZeroPeriod);
                }
                if secs > MAX_PERIOD_SECS {
                    return Err(ConfigError::PeriodTooLong(secs));
                }
                Ok(ScanCadence::Every(secs))
            }
            _ => Err(ConfigError::InvalidCadence(s.to_string())),
        }
    }
}

impl TryFrom<String> for ScanCadence {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScanCadence> for String {
    fn from(cadence: ScanCadence) -> Self {
        cadence.to_string()
    }
}

impl fmt::Display for ScanCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanCadence::Daily { hour, minute } => write!(f, "daily@{:02}:{:02}", hour, minute),
            ScanCadence::Every(secs) => write!(f, "every@{}", secs),
            ScanCadence::Disabled => f.write_str("disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn parses_all_forms() {
        assert_eq!("daily@23:55".parse::<ScanCadence>(), Ok(ScanCadence::daily(23, 55)));
        assert_eq!("every@60".parse::<ScanCadence>(), Ok(ScanCadence::Every(60)));
        assert_eq!("disabled".parse::<ScanCadence>(), Ok(ScanCadence::Disabled));
        assert_eq!("daily@24:00".parse::<ScanCadence>(), Err(ConfigError::InvalidTimeOfDay("24:00".into())));
        assert_eq!("every@0".parse::<ScanCadence>(), Err(ConfigError::ZeroPeriod));
        assert!("hourly".parse::<ScanCadence>().is_err());
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_passed() {
        let cadence = ScanCadence::daily(0, 30);
        assert_eq!(cadence.next_after(at(0, 0)), Some(at(0, 30)));
        assert_eq!(cadence.next_after(at(0, 30)), Some(at(0, 30) + ChronoDuration::days(1)));
        assert_eq!(cadence.next_after(at(12, 0)), Some(at(0, 30) + ChronoDuration::days(1)));
    }

    #[test]
    fn every_adds_period_and_disabled_never_fires() {
        assert_eq!(ScanCadence::Every(90).delay_from(at(1, 0)), Some(Duration::from_secs(90)));
        assert_eq!(ScanCadence::Disabled.next_after(at(1, 0)), None);
    }

    #[test]
    fn oversized_periods_are_rejected() {
        assert_eq!(
            "every@10000000000000000".parse::<ScanCadence>(),
            Err(ConfigError::PeriodTooLong(10_000_000_000_000_000))
        );
        assert_eq!(
            "every@9000000000000".parse::<ScanCadence>(),
            Err(ConfigError::PeriodTooLong(9_000_000_000_000))
        );
        let year = MAX_PERIOD_SECS.to_string();
        assert_eq!(format!("every@{year}").parse::<ScanCadence>(), Ok(ScanCadence::Every(MAX_PERIOD_SECS)));
        assert!(serde_json::from_str::<ScanCadence>("\"every@99999999999\"").is_err());
    }

    #[test]
    fn out_of_range_instants_do_not_panic() {
        // Built directly, bypassing the parser's bound.
        assert_eq!(ScanCadence::Every(u64::MAX).next_after(at(1, 0)), None);
        assert_eq!(ScanCadence::Every(9_000_000_000_000).delay_from(at(1, 0)), None);
        assert_eq!(ScanCadence::daily(0, 0).next_after(DateTime::<Utc>::MAX_UTC), None);
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&ScanCadence::daily(0, 0)).unwrap();
        assert_eq!(json, "\"daily@00:00\"");
        let back: ScanCadence = serde_json::from_str("\"every@5\"").unwrap();
        assert_eq!(back, ScanCadence::Every(5));
    }
}
