//! Time intervals and the clock abstraction
//!
//! Dashboard queries and detectors are all scoped by a closed `[from, to]`
//! interval. The API layer builds intervals from `YYYY-MM-DD` date strings
//! interpreted in the configured timezone; `from` covers the start of its
//! day and `to` the end of its day.
//!
//! Detectors never read the wall clock directly: they receive a [`Clock`]
//! so tests can advance time deterministically.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A closed time interval, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeInterval {
    /// Build an interval from two `YYYY-MM-DD` date strings in the given
    /// timezone. `from` must not be after `to`.
    pub fn parse(from: &str, to: &str, tz: chrono_tz::Tz) -> Result<TimeInterval> {
        let from = start_of_day(from, tz)?;
        let to = end_of_day(to, tz)?;

        if from > to {
            return Err(Error::InvalidInput(format!(
                "Invalid interval: {} is after {}",
                from, to
            )));
        }

        Ok(TimeInterval { from, to })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("Invalid date {:?}: {}", s, e)))
}

fn start_of_day(s: &str, tz: chrono_tz::Tz) -> Result<DateTime<Utc>> {
    let date = parse_date(s)?;

    let local = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");

    resolve_local(local, tz)
}

fn end_of_day(s: &str, tz: chrono_tz::Tz) -> Result<DateTime<Utc>> {
    let date = parse_date(s)?;

    let local = date
        .and_hms_opt(23, 59, 59)
        .expect("end of day is always a valid time");

    resolve_local(local, tz)
}

fn resolve_local(local: chrono::NaiveDateTime, tz: chrono_tz::Tz) -> Result<DateTime<Utc>> {
    // On DST gaps pick the earliest valid instant
    tz.from_local_datetime(&local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidInput(format!("Nonexistent local time: {}", local)))
}

/// Source of "now" for periodic jobs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and historical replay
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> FakeClock {
        FakeClock {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += d;
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
