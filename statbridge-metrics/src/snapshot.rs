//!
//! Snapshot data model
//!
//! A [`Snapshot`] is one poll's worth of tabular statistics: an ordered list of [`Row`]s, each
//! mapping attribute names to [`Value`]s. Snapshots are produced by a [`SnapshotSource`] and are
//! discarded once a [`Probe`](crate::Probe) has walked them.
//!
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

///
/// A single attribute value within a [`Row`]
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

///
/// Errors reading a tracked attribute or the identity attribute from a [`Row`]
///
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row has no string identity attribute '{0}'")]
    MissingIdentity(String),
    #[error("row '{entity}' is missing attribute '{attribute}'")]
    MissingAttribute { entity: String, attribute: String },
    #[error("row '{entity}' attribute '{attribute}' is a {found}, expected an integer")]
    TypeMismatch {
        entity: String,
        attribute: String,
        found: &'static str,
    },
    #[error("row {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
}

///
/// Errors obtaining a [`Snapshot`] from a [`SnapshotSource`]
///
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

///
/// One entity's statistics within a [`Snapshot`]
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    attributes: BTreeMap<String, Value>,
    malformed: Option<String>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.insert(attribute, value);
        self
    }

    pub fn insert(&mut self, attribute: &str, value: impl Into<Value>) {
        self.attributes.insert(attribute.to_owned(), value.into());
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    ///
    /// A row the source produced but that could not be read at all
    ///
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            malformed: Some(reason.into()),
            ..Self::default()
        }
    }

    ///
    /// Why this row could not be read, if it could not
    ///
    pub fn malformation(&self) -> Option<&str> {
        self.malformed.as_deref()
    }

    ///
    /// Returns the value of the identity column, which must be a string
    ///
    pub fn identity(&self, column: &str) -> Result<&str, RowError> {
        match self.attributes.get(column) {
            Some(Value::Str(s)) => Ok(s),
            _ => Err(RowError::MissingIdentity(column.to_owned())),
        }
    }

    ///
    /// Returns the integer value of a tracked attribute. `entity` is only used to give errors
    /// enough context to find the failing row.
    ///
    pub fn int(&self, entity: &str, attribute: &str) -> Result<i64, RowError> {
        match self.attributes.get(attribute) {
            Some(Value::Int(i)) => Ok(*i),
            Some(other) => Err(RowError::TypeMismatch {
                entity: entity.to_owned(),
                attribute: attribute.to_owned(),
                found: other.kind(),
            }),
            None => Err(RowError::MissingAttribute {
                entity: entity.to_owned(),
                attribute: attribute.to_owned(),
            }),
        }
    }

    ///
    /// Converts a JSON object into a `Row`
    ///
    /// Integers and strings map directly. Floats and booleans are kept in their textual form so
    /// that reading them as a counter reports a type mismatch. Nulls and nested values are
    /// dropped. Anything other than an object yields a [`malformed`](Row::malformed) row.
    ///
    pub fn from_json(json: serde_json::Value) -> Self {
        let serde_json::Value::Object(object) = json else {
            return Row::malformed(format!("expected a JSON object, found '{}'", json));
        };

        let mut row = Row::new();
        for (attribute, value) in object {
            match value {
                serde_json::Value::String(s) => row.insert(&attribute, s),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => row.insert(&attribute, i),
                    None => row.insert(&attribute, n.to_string()),
                },
                serde_json::Value::Bool(b) => row.insert(&attribute, b.to_string()),
                serde_json::Value::Null
                | serde_json::Value::Array(_)
                | serde_json::Value::Object(_) => (),
            }
        }
        row
    }
}

///
/// One poll's worth of rows, in the order the source produced them
///
pub type Snapshot = Vec<Row>;

///
/// Parses a JSON document into a [`Snapshot`]
///
/// The document must be an array. `null` is treated as an absent snapshot. Elements that are not
/// objects are kept as malformed rows so the rest of the snapshot is still usable.
///
pub fn snapshot_from_json(document: serde_json::Value) -> Result<Option<Snapshot>, FetchError> {
    match document {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Array(rows) => Ok(Some(rows.into_iter().map(Row::from_json).collect())),
        other => Err(FetchError::Malformed(format!(
            "expected a JSON array of rows, found '{}'",
            other
        ))),
    }
}

///
/// Produces a [`Snapshot`] each time a [`Probe`](crate::Probe) runs
///
/// Returning `Ok(None)` or an empty snapshot signals that no entities currently exist, which is
/// not an error. Implementations need not enforce a timeout; the probe bounds every fetch.
///
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Option<Snapshot>, FetchError>;

    fn describe(&self) -> String;
}
