//! Declarative cleaning rules and the engine that applies them.
//!
//! A [`CleaningProfile`] says which rules run and which columns play which
//! role. [`Cleaner::apply`] interprets a profile against a [`RecordSet`].
//! Data problems (missing columns, unparseable dates) never fail a run; they
//! are logged and returned as [`CleanIssue`]s next to the cleaned records.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::{
    date_parser::DateParser,
    extract::SourceKind,
    schema::{RecordSet, Row, Value},
};

pub const DATE_OF_BIRTH: &str = "date_of_birth";
pub const REGISTRATION_DATE: &str = "registration_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Values are converted to dates.
    Date,
    /// Values identify a row; duplicates are detected on these columns only.
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateMode {
    /// Convert every value that parses; leave the rest untouched.
    #[default]
    PerValue,
    /// Convert the column only if every non-null value parses.
    WholeColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub name: String,
    pub role: ColumnRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CleaningProfile {
    #[serde(default)]
    pub deduplicate: bool,
    #[serde(default)]
    pub drop_incomplete: bool,
    #[serde(default)]
    pub date_mode: DateMode,
    #[serde(default)]
    pub columns: Vec<ColumnRule>,
}

impl CleaningProfile {
    pub fn generic() -> Self {
        Self {
            deduplicate: true,
            ..Self::default()
        }
    }

    pub fn with_date_column(column: &str) -> Self {
        Self {
            date_mode: DateMode::PerValue,
            columns: vec![ColumnRule {
                name: column.to_string(),
                role: ColumnRole::Date,
            }],
            ..Self::default()
        }
    }

    pub fn drop_incomplete() -> Self {
        Self {
            drop_incomplete: true,
            ..Self::default()
        }
    }

    pub fn user_records() -> Self {
        Self {
            drop_incomplete: true,
            date_mode: DateMode::WholeColumn,
            columns: [DATE_OF_BIRTH, REGISTRATION_DATE]
                .iter()
                .map(|name| ColumnRule {
                    name: name.to_string(),
                    role: ColumnRole::Date,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// The rule set each kind of source gets when a job does not spell one out.
    pub fn for_source(kind: SourceKind) -> Self {
        match kind {
            SourceKind::File => Self::generic(),
            SourceKind::Endpoint => Self::with_date_column("date"),
            SourceKind::ObjectStore => Self::drop_incomplete(),
            SourceKind::Relational => Self::user_records(),
        }
    }

    fn columns_with_role(&self, role: ColumnRole) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(move |rule| rule.role == role)
            .map(|rule| rule.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanIssue {
    /// A column named by the profile is not in the record set.
    MissingColumn { column: String },
    /// Row indexes (into the cleaned records) whose date value did not parse.
    /// `converted` tells whether the rest of the column was converted.
    UnparseableDates {
        column: String,
        rows: Vec<usize>,
        converted: bool,
    },
}

impl std::fmt::Display for CleanIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanIssue::MissingColumn { column } => {
                write!(f, "column '{}' not found", column)
            }
            CleanIssue::UnparseableDates {
                column,
                rows,
                converted,
            } => write!(
                f,
                "{} unparseable date value(s) in column '{}' ({})",
                rows.len(),
                column,
                if *converted {
                    "other values converted"
                } else {
                    "column left unconverted"
                }
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub rows_in: usize,
    pub null_rows_dropped: usize,
    pub incomplete_rows_dropped: usize,
    pub duplicates_dropped: usize,
    pub rows_out: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutcome {
    pub records: RecordSet,
    pub issues: Vec<CleanIssue>,
    pub stats: CleanStats,
}

impl CleanOutcome {
    pub fn into_records(self) -> RecordSet {
        self.records
    }
}

pub struct Cleaner;

impl Cleaner {
    pub fn apply(profile: &CleaningProfile, mut records: RecordSet) -> CleanOutcome {
        let mut stats = CleanStats {
            rows_in: records.len(),
            ..CleanStats::default()
        };
        let mut issues = Vec::new();

        let before = records.len();
        records.retain_rows(|row| !row.iter().all(Value::is_null));
        stats.null_rows_dropped = before - records.len();

        if profile.drop_incomplete {
            let before = records.len();
            records.retain_rows(|row| !row.iter().any(Value::is_null));
            stats.incomplete_rows_dropped = before - records.len();
        }

        if profile.deduplicate {
            stats.duplicates_dropped = Self::deduplicate(profile, &mut records);
        }

        for column in profile.columns_with_role(ColumnRole::Date) {
            if let Some(issue) = Self::convert_dates(&mut records, column, profile.date_mode) {
                warn!("{}", issue);
                issues.push(issue);
            }
        }

        stats.rows_out = records.len();
        info!(
            "Cleaned {} rows -> {} rows ({} null, {} incomplete, {} duplicate dropped)",
            stats.rows_in,
            stats.rows_out,
            stats.null_rows_dropped,
            stats.incomplete_rows_dropped,
            stats.duplicates_dropped
        );

        CleanOutcome {
            records,
            issues,
            stats,
        }
    }

    /// Keeps the first occurrence of every row key, preserving order.
    fn deduplicate(profile: &CleaningProfile, records: &mut RecordSet) -> usize {
        let key_columns: Vec<usize> = profile
            .columns_with_role(ColumnRole::Identifier)
            .filter_map(|name| {
                let index = records.column_index(name);
                if index.is_none() {
                    debug!("Identifier column '{}' absent; comparing full rows", name);
                }
                index
            })
            .collect();

        let key_of = |row: &Row| -> Vec<Value> {
            if key_columns.is_empty() {
                row.clone()
            } else {
                key_columns.iter().map(|&i| row[i].clone()).collect()
            }
        };

        let before = records.len();
        let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(before);
        records.retain_rows(|row| seen.insert(key_of(row)));
        before - records.len()
    }

    fn convert_dates(records: &mut RecordSet, column: &str, mode: DateMode) -> Option<CleanIssue> {
        let index = match records.column_index(column) {
            Some(index) => index,
            None => {
                return Some(CleanIssue::MissingColumn {
                    column: column.to_string(),
                })
            }
        };

        let parsed: Vec<Option<Value>> = records
            .rows()
            .iter()
            .map(|row| DateParser::parse_value(&row[index]))
            .collect();

        let failed: Vec<usize> = parsed
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_none())
            .map(|(row, _)| row)
            .collect();

        let converted = failed.is_empty() || mode == DateMode::PerValue;
        if converted {
            for (row, value) in records.rows_mut().iter_mut().zip(parsed) {
                if let Some(value) = value {
                    row[index] = value;
                }
            }
        }

        if failed.is_empty() {
            None
        } else {
            Some(CleanIssue::UnparseableDates {
                column: column.to_string(),
                rows: failed,
                converted,
            })
        }
    }
}

/// Removes exact duplicate rows, keeping the first occurrence.
pub fn clean_generic(records: RecordSet) -> CleanOutcome {
    Cleaner::apply(&CleaningProfile::generic(), records)
}

/// Converts one column to dates value by value; values that do not parse
/// stay as they were and are reported.
pub fn clean_with_date_parsing(records: RecordSet, date_column: &str) -> CleanOutcome {
    Cleaner::apply(&CleaningProfile::with_date_column(date_column), records)
}

/// Drops every row that holds a null in any column.
pub fn clean_drop_incomplete(records: RecordSet) -> CleanOutcome {
    Cleaner::apply(&CleaningProfile::drop_incomplete(), records)
}

/// Drops incomplete rows, then converts `date_of_birth` and
/// `registration_date` when every value in the column parses.
pub fn clean_user_records(records: RecordSet) -> CleanOutcome {
    Cleaner::apply(&CleaningProfile::user_records(), records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn set(columns: &[&str], rows: Vec<Vec<Value>>) -> RecordSet {
        RecordSet::with_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_clean_generic_removes_duplicates_in_order() {
        let records = set(
            &["id", "name"],
            vec![
                vec![Value::Integer(1), "a".into()],
                vec![Value::Integer(2), "b".into()],
                vec![Value::Integer(1), "a".into()],
                vec![Value::Integer(3), "c".into()],
            ],
        );

        let outcome = clean_generic(records);
        let ids: Vec<&Value> = outcome.records.rows().iter().map(|r| &r[0]).collect();
        assert_eq!(ids, vec![&Value::Integer(1), &Value::Integer(2), &Value::Integer(3)]);
        assert_eq!(outcome.stats.duplicates_dropped, 1);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_clean_generic_is_idempotent() {
        let records = set(
            &["a", "b"],
            vec![
                vec!["x".into(), Value::Null],
                vec!["x".into(), Value::Null],
                vec![Value::Null, Value::Null],
                vec!["y".into(), Value::Float(1.5)],
                vec!["y".into(), Value::Float(1.5)],
            ],
        );

        let once = clean_generic(records).into_records();
        let twice = clean_generic(once.clone()).into_records();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_fully_null_rows_are_always_dropped() {
        let records = set(
            &["a", "b"],
            vec![vec![Value::Null, Value::Null], vec!["x".into(), Value::Null]],
        );
        let outcome = Cleaner::apply(&CleaningProfile::default(), records);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.stats.null_rows_dropped, 1);
    }

    #[test]
    fn test_clean_drop_incomplete_is_null_free_subset() {
        let input = set(
            &["a", "b"],
            vec![
                vec!["1".into(), "2".into()],
                vec!["3".into(), Value::Null],
                vec![Value::Null, "4".into()],
                vec!["5".into(), "6".into()],
            ],
        );

        let outcome = clean_drop_incomplete(input.clone());
        assert!(outcome
            .records
            .rows()
            .iter()
            .all(|row| row.iter().all(|v| !v.is_null())));
        assert_eq!(outcome.records.rows(), &[input.rows()[0].clone(), input.rows()[3].clone()]);
        assert_eq!(outcome.stats.incomplete_rows_dropped, 2);
    }

    #[test]
    fn test_clean_with_date_parsing_per_value() {
        let records = set(
            &["id", "date"],
            vec![
                vec![Value::Integer(1), "2022-01-01".into()],
                vec![Value::Integer(2), "soon".into()],
                vec![Value::Integer(3), Value::Null],
            ],
        );

        let outcome = clean_with_date_parsing(records, "date");
        assert_eq!(outcome.records.get(0, "date"), Some(&date(2022, 1, 1)));
        assert_eq!(outcome.records.get(1, "date"), Some(&Value::from("soon")));
        assert_eq!(outcome.records.get(2, "date"), Some(&Value::Null));
        assert_eq!(
            outcome.issues,
            vec![CleanIssue::UnparseableDates {
                column: "date".to_string(),
                rows: vec![1],
                converted: true,
            }]
        );
    }

    #[test]
    fn test_clean_with_date_parsing_missing_column() {
        let records = set(&["id"], vec![vec![Value::Integer(1)]]);
        let outcome = clean_with_date_parsing(records.clone(), "date");
        assert_eq!(outcome.records, records);
        assert_eq!(
            outcome.issues,
            vec![CleanIssue::MissingColumn {
                column: "date".to_string()
            }]
        );
    }

    #[test]
    fn test_clean_user_records_missing_registration_date() {
        let records = set(&["date_of_birth"], vec![vec!["2000-01-01".into()]]);

        let outcome = clean_user_records(records);
        assert_eq!(outcome.records.columns(), &["date_of_birth".to_string()]);
        assert_eq!(outcome.records.rows(), &[vec![date(2000, 1, 1)]]);
        assert_eq!(
            outcome.issues,
            vec![CleanIssue::MissingColumn {
                column: "registration_date".to_string()
            }]
        );
    }

    #[test]
    fn test_clean_user_records_whole_column_failure_leaves_column() {
        let records = set(
            &["name", "date_of_birth", "registration_date"],
            vec![
                vec!["ann".into(), "1990-05-01".into(), "2021-01-02".into()],
                vec!["bob".into(), "not a date".into(), "2021-03-04".into()],
                vec!["cy".into(), Value::Null, "2021-05-06".into()],
            ],
        );

        let outcome = clean_user_records(records);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records.get(0, "date_of_birth"), Some(&Value::from("1990-05-01")));
        assert_eq!(outcome.records.get(1, "date_of_birth"), Some(&Value::from("not a date")));
        assert_eq!(outcome.records.get(0, "registration_date"), Some(&date(2021, 1, 2)));
        assert_eq!(outcome.records.get(0, "name"), Some(&Value::from("ann")));
        assert_eq!(
            outcome.issues,
            vec![CleanIssue::UnparseableDates {
                column: "date_of_birth".to_string(),
                rows: vec![1],
                converted: false,
            }]
        );
    }

    #[test]
    fn test_identifier_columns_drive_deduplication() {
        let profile = CleaningProfile {
            deduplicate: true,
            columns: vec![ColumnRule {
                name: "uuid".to_string(),
                role: ColumnRole::Identifier,
            }],
            ..CleaningProfile::default()
        };
        let records = set(
            &["uuid", "name"],
            vec![
                vec!["u1".into(), "first".into()],
                vec!["u1".into(), "second".into()],
                vec!["u2".into(), "third".into()],
            ],
        );

        let outcome = Cleaner::apply(&profile, records);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records.get(0, "name"), Some(&Value::from("first")));
    }

    #[test]
    fn test_profile_from_yaml() {
        let yaml = r#"
deduplicate: true
date_mode: whole_column
columns:
  - name: joined
    role: date
  - name: user_uuid
    role: identifier
"#;
        let profile: CleaningProfile = serde_yaml::from_str(yaml).unwrap();
        assert!(profile.deduplicate);
        assert!(!profile.drop_incomplete);
        assert_eq!(profile.date_mode, DateMode::WholeColumn);
        assert_eq!(profile.columns_with_role(ColumnRole::Date).collect::<Vec<_>>(), vec!["joined"]);
    }

    #[test]
    fn test_profiles_for_source_kinds() {
        assert_eq!(CleaningProfile::for_source(SourceKind::File), CleaningProfile::generic());
        assert_eq!(
            CleaningProfile::for_source(SourceKind::Relational),
            CleaningProfile::user_records()
        );
        assert!(CleaningProfile::for_source(SourceKind::ObjectStore).drop_incomplete);
    }
}
