//! Declarative job schedules, evaluated in UTC at minute resolution

use std::fmt;

use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::application::errors::CronError;

/// When a job runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schedule {
    /// Start of every minute
    Minutely,
    /// Start of every hour
    Hourly,
    /// Midnight UTC
    Daily,
    /// Sunday midnight UTC
    Weekly,
    Custom(CustomSchedule),
}

/// Pins some units of the next occurrence.
///
/// Units finer than the coarsest pinned one default to zero, coarser ones are free:
/// `{hour: 9}` is daily at 09:00, `{minute: 30}` is every hour at :30,
/// `{day_of_week: Mon, hour: 8}` is Mondays at 08:00.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CustomSchedule {
    #[serde(default)]
    pub minute: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
}

impl CustomSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_minute(mut self, minute: u32) -> Self {
        self.minute = Some(minute);
        self
    }

    pub fn at_hour(mut self, hour: u32) -> Self {
        self.hour = Some(hour);
        self
    }

    pub fn on(mut self, day: Weekday) -> Self {
        self.day_of_week = Some(day);
        self
    }

    fn validate(&self) -> Result<(), CronError> {
        if let Some(minute) = self.minute {
            if minute > 59 {
                return Err(CronError::InvalidSchedule(format!("minute {} out of range", minute)));
            }
        }
        if let Some(hour) = self.hour {
            if hour > 23 {
                return Err(CronError::InvalidSchedule(format!("hour {} out of range", hour)));
            }
        }
        Ok(())
    }

    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours: Vec<u32> = match (self.hour, self.day_of_week) {
            (Some(h), _) => vec![h],
            (None, Some(_)) => vec![0],
            (None, None) => (0..24).collect(),
        };
        let minutes: Vec<u32> = match (self.minute, self.hour.is_some() || self.day_of_week.is_some()) {
            (Some(m), _) => vec![m],
            (None, true) => vec![0],
            (None, false) => (0..60).collect(),
        };

        // Eight days covers a pinned weekday whose slot today has already passed
        for offset in 0..=7 {
            let date = now.date_naive() + Duration::days(offset);
            if let Some(day) = self.day_of_week {
                if date.weekday() != day {
                    continue;
                }
            }
            for &hour in &hours {
                for &minute in &minutes {
                    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                    let candidate = Utc.from_utc_datetime(&date.and_time(time));
                    if candidate > now {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

impl Schedule {
    pub fn custom(custom: CustomSchedule) -> Self {
        Schedule::Custom(custom)
    }

    pub fn validate(&self) -> Result<(), CronError> {
        match self {
            Schedule::Custom(custom) => custom.validate(),
            _ => Ok(()),
        }
    }

    /// First occurrence strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        self.validate()?;
        let next = match self {
            Schedule::Minutely => truncate(now, Duration::minutes(1)).map(|t| t + Duration::minutes(1)),
            Schedule::Hourly => truncate(now, Duration::hours(1)).map(|t| t + Duration::hours(1)),
            Schedule::Daily => midnight_after(now, 1),
            Schedule::Weekly => {
                let days = 7 - i64::from(now.weekday().num_days_from_sunday());
                midnight_after(now, days)
            }
            Schedule::Custom(custom) => custom.next_after(now),
        };
        next.ok_or_else(|| CronError::InvalidSchedule(format!("no occurrence of {} after {}", self, now)))
    }
}

fn truncate(now: DateTime<Utc>, unit: Duration) -> Option<DateTime<Utc>> {
    now.duration_trunc(unit).ok()
}

fn midnight_after(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    let date = now.date_naive() + Duration::days(days);
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Minutely => f.write_str("minutely"),
            Schedule::Hourly => f.write_str("hourly"),
            Schedule::Daily => f.write_str("daily"),
            Schedule::Weekly => f.write_str("weekly"),
            Schedule::Custom(c) => {
                let minute = match (c.minute, c.hour.is_some() || c.day_of_week.is_some()) {
                    (Some(m), _) => format!("{:02}", m),
                    (None, true) => "00".to_string(),
                    (None, false) => "*".to_string(),
                };
                let hour = match (c.hour, c.day_of_week.is_some()) {
                    (Some(h), _) => format!("{:02}", h),
                    (None, true) => "00".to_string(),
                    (None, false) => "*".to_string(),
                };
                match c.day_of_week {
                    Some(day) => write!(f, "{} {}:{}", day, hour, minute),
                    None => write!(f, "{}:{}", hour, minute),
                }
            }
        }
    }
}
