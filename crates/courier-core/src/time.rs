use chrono::{Local, NaiveDate, NaiveDateTime};

/// Storage format for every persisted timestamp. Locale independent.
pub const DB_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DB_DATE_FORMAT: &str = "%Y-%m-%d";
pub const EXPORT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn format_db(at: NaiveDateTime) -> String {
    at.format(DB_DATETIME_FORMAT).to_string()
}

pub fn parse_db(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DB_DATETIME_FORMAT).ok()
}

/// Midnight, 1970-01-01. Stands in for timestamps that fail to parse.
pub fn epoch_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn parse_db_or_epoch(value: &str) -> NaiveDateTime {
    parse_db(value).unwrap_or_else(epoch_start)
}

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn now_db(&self) -> String {
        format_db(self.now())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
