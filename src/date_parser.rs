use crate::schema::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",  // 2023-12-25
    "%m/%d/%Y",  // 12/25/2023
    "%d/%m/%Y",  // 25/12/2023
    "%m-%d-%Y",  // 12-25-2023
    "%d-%m-%Y",  // 25-12-2023
    "%Y/%m/%d",  // 2023/12/25
    "%d.%m.%Y",  // 25.12.2023
    "%Y.%m.%d",  // 2023.12.25
    "%b %d, %Y", // Dec 25, 2023
    "%B %d, %Y", // December 25, 2023
    "%d %b %Y",  // 25 Dec 2023
    "%d %B %Y",  // 25 December 2023
    "%Y %B %d",  // 2023 December 25
    "%B %Y %d",  // December 2023 25
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",  // 2023-12-25T10:30:00.123
    "%Y-%m-%dT%H:%M:%S",     // 2023-12-25T10:30:00
    "%Y-%m-%d %H:%M:%S%.f",  // 2023-12-25 10:30:00.123
    "%Y-%m-%d %H:%M:%S",     // 2023-12-25 10:30:00
    "%m/%d/%Y %H:%M:%S",     // 12/25/2023 10:30:00
    "%d/%m/%Y %H:%M:%S",     // 25/12/2023 10:30:00
    "%Y-%m-%d %H:%M",        // 2023-12-25 10:30
    "%m/%d/%Y %H:%M",        // 12/25/2023 10:30
    "%d/%m/%Y %H:%M",        // 25/12/2023 10:30
    "%Y-%m-%d %I:%M:%S %p",  // 2023-12-25 10:30:00 AM
    "%m/%d/%Y %I:%M:%S %p",  // 12/25/2023 10:30:00 AM
    "%Y-%m-%d %I:%M %p",     // 2023-12-25 10:30 AM
    "%m/%d/%Y %I:%M %p",     // 12/25/2023 10:30 AM
];

/// Parses the date and datetime spellings commonly found in exported tables.
/// Date-only input yields `Value::Date`; anything with a time component
/// yields a UTC `Value::Timestamp`.
pub struct DateParser;

impl DateParser {
    pub fn try_parse(value: &str) -> Option<Value> {
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(Value::Timestamp(dt.with_timezone(&Utc)));
        }

        if let Some(date) = Self::try_date_formats(trimmed) {
            return Some(Value::Date(date));
        }

        Self::try_datetime_formats(trimmed).map(Value::Timestamp)
    }

    /// Applies `try_parse` to an already typed value. Dates and timestamps
    /// pass through; nulls stay null; anything else that does not parse is
    /// returned as `None`.
    pub fn parse_value(value: &Value) -> Option<Value> {
        match value {
            Value::Date(_) | Value::Timestamp(_) | Value::Null => Some(value.clone()),
            Value::String(s) => Self::try_parse(s),
            _ => None,
        }
    }

    fn try_date_formats(value: &str) -> Option<NaiveDate> {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
    }

    fn try_datetime_formats(value: &str) -> Option<DateTime<Utc>> {
        DATETIME_FORMATS.iter().find_map(|format| {
            NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|ndt| Utc.from_utc_datetime(&ndt))
        })
    }
}
