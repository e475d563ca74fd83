use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

/// A single cell. Floats compare and hash by bit pattern so that rows can be
/// used as set keys.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Value {
    /// Types a raw text field from a delimited source. Empty fields are null;
    /// dates are left as text for the cleaner to convert.
    pub fn from_field(field: &str) -> Value {
        if field.is_empty() {
            return Value::Null;
        }

        if let Ok(int_val) = field.parse::<i64>() {
            return Value::Integer(int_val);
        }

        if let Ok(float_val) = field.parse::<f64>() {
            if float_val.is_finite() {
                return Value::Float(float_val);
            }
        }

        match field {
            "true" | "True" | "TRUE" => Value::Boolean(true),
            "false" | "False" | "FALSE" => Value::Boolean(false),
            _ => Value::String(field.to_string()),
        }
    }

    pub fn from_json(json_val: &serde_json::Value) -> Value {
        match json_val {
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Value::String(json_val.to_string())
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Null => DataType::Null,
        }
    }

    /// Converts the value so it can be stored in a column of `data_type`.
    /// Widening only: integers to floats, dates to midnight timestamps,
    /// anything to text.
    pub fn coerce_to(&self, data_type: DataType) -> Value {
        match (self, data_type) {
            (Value::Null, _) => Value::Null,
            (Value::String(_), DataType::String) => self.clone(),
            (_, DataType::String) => Value::String(self.to_string()),
            (Value::Integer(i), DataType::Float) => Value::Float(*i as f64),
            (Value::Date(d), DataType::Timestamp) => match d.and_hms_opt(0, 0, 0) {
                Some(midnight) => Value::Timestamp(DateTime::from_naive_utc_and_offset(midnight, Utc)),
                None => Value::String(d.to_string()),
            },
            _ => self.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Null => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

pub type Row = Vec<Value>;

/// Ordered rows sharing one ordered column list. Every row holds exactly one
/// value per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: disambiguate_columns(columns),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        let mut set = Self::new(columns);
        for row in rows {
            set.push_row(row)?;
        }
        Ok(set)
    }

    /// Builds a set from key/value rows. Columns are ordered by first
    /// appearance; keys a row lacks are filled with `Null`.
    pub fn from_maps<I, K>(maps: I) -> Self
    where
        I: IntoIterator<Item = Vec<(K, Value)>>,
        K: Into<String>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut keyed_rows: Vec<Vec<(usize, Value)>> = Vec::new();

        for map in maps {
            let mut keyed = Vec::with_capacity(map.len());
            for (key, value) in map {
                let key = key.into();
                let position = match index.get(&key) {
                    Some(position) => *position,
                    None => {
                        columns.push(key.clone());
                        index.insert(key, columns.len() - 1);
                        columns.len() - 1
                    }
                };
                keyed.push((position, value));
            }
            keyed_rows.push(keyed);
        }

        let width = columns.len();
        let rows = keyed_rows
            .into_iter()
            .map(|keyed| {
                let mut row = vec![Value::Null; width];
                for (position, value) in keyed {
                    row[position] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(EtlError::Validation(format!(
                "row {} has {} values but the record set has {} columns",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[index])
    }

    pub fn retain_rows<F>(&mut self, keep: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(keep);
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// JSON objects, one per row, for previews.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(name, value)| {
                        let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                        (name.clone(), json)
                    })
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// Repeated header names get a `.N` suffix so every column stays addressable.
fn disambiguate_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(columns.len());

    for name in columns {
        if seen.insert(name.clone()) {
            result.push(name);
            continue;
        }
        let mut suffix = 1;
        let unique = loop {
            let candidate = format!("{}.{}", name, suffix);
            if !seen.contains(&candidate) {
                break candidate;
            }
            suffix += 1;
        };
        seen.insert(unique.clone());
        result.push(unique);
    }

    result
}

pub struct SchemaInferer;

impl SchemaInferer {
    pub fn infer(records: &RecordSet) -> Schema {
        let columns = records
            .columns()
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let types: Vec<DataType> = records
                    .rows()
                    .iter()
                    .map(|row| row[index].data_type())
                    .collect();
                let (data_type, nullable) = Self::resolve_column_type(&types);
                Column {
                    name: name.clone(),
                    data_type,
                    nullable,
                }
            })
            .collect();

        Schema { columns }
    }

    pub fn resolve_column_type(types: &[DataType]) -> (DataType, bool) {
        let has_null = types.iter().any(|t| matches!(t, DataType::Null));

        let mut non_null = types.iter().filter(|t| !matches!(t, DataType::Null));
        let first = match non_null.next() {
            Some(first) => *first,
            None => return (DataType::String, true),
        };

        let resolved = non_null.fold(first, |acc, t| match (acc, *t) {
            (a, b) if a == b => a,
            (DataType::Integer, DataType::Float) | (DataType::Float, DataType::Integer) => {
                DataType::Float
            }
            (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => {
                DataType::Timestamp
            }
            _ => DataType::String,
        });

        (resolved, has_null)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::String => write!(f, "TEXT"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "REAL"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Date => write!(f, "DATE"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Null => write!(f, "NULL"),
        }
    }
}
