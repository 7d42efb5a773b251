use chrono::NaiveDate;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One cell as read from the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Delimited-text cell, subject to type inference.
    Text(String),
    /// Structured-record value, kept as-is.
    Json(serde_json::Value),
}

/// A source row with its column order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub cells: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn push(&mut self, column: impl Into<String>, value: RawValue) {
        self.cells.push((column.into(), value));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    Attachments(Vec<AttachmentDescriptor>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn attachment(url: impl Into<String>) -> Self {
        FieldValue::Attachments(vec![AttachmentDescriptor { url: url.into() }])
    }

    /// The value read as a local file reference, if it is textual.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Json(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Empty => serializer.serialize_none(),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            FieldValue::Attachments(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Json(value) => value.serialize(serializer),
        }
    }
}

/// The unit of upload: one row's fields, owned by whichever stage or worker
/// is currently handling it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Record {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Snapshot of the destination table's declared fields, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSchema {
    pub table_id: String,
    pub table_name: String,
    /// Field name to remote field type.
    pub fields: BTreeMap<String, String>,
}

impl RemoteSchema {
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_names(&self) -> BTreeSet<&str> {
        self.fields.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    pub from: String,
    pub to: String,
}

/// First name is the source column, the rest receive copies of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyGroup {
    pub source: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMapping {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateColumnPolicy {
    Fail,
    /// Keep the right-most column of each duplicated name.
    #[default]
    Collapse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Queued,
    InFlight,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    /// Position of the record in the input.
    pub index: usize,
    pub reason: String,
}

/// Outcome of one upload batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub states: Vec<RecordState>,
    pub failures: Vec<RowFailure>,
    pub attachment_failures: usize,
    /// Set when a systemic failure or an interrupt stopped the batch early.
    pub halted: Option<String>,
}

impl UploadReport {
    pub fn total(&self) -> usize {
        self.states.len()
    }

    pub fn count(&self, state: RecordState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(RecordState::Uploaded)
    }

    pub fn failed(&self) -> usize {
        self.count(RecordState::Failed)
    }

    pub fn unprocessed(&self) -> usize {
        self.total() - self.uploaded() - self.failed()
    }

    pub fn is_success(&self) -> bool {
        self.halted.is_none()
    }
}
