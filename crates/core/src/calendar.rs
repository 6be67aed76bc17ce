//! Business calendar: maps timestamps to calendar dates in one canonical zone.
//!
//! Point-in-time balance queries compare at calendar-day granularity. The day
//! boundary is taken from a single configured IANA timezone so that server and
//! client never disagree on which day a transaction belongs to.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    tz: Tz,
}

impl BusinessCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    /// Parse an IANA zone name such as `Asia/Dhaka`.
    pub fn from_name(name: &str) -> Result<Self, DomainError> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|e| DomainError::validation(format!("unknown timezone '{name}': {e}")))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The business date a timestamp falls on.
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::utc()
    }
}
