use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive calendar-day range (UTC).  Either bound may be open.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |f| day >= f) && self.to.map_or(true, |t| day <= t)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.contains_day(at.date_naive())
    }
}
