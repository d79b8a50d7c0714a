//! Records — the plain attribute maps the engine reads and writes.
//!
//! The engine never sees host structs. A subject is anything implementing
//! [`Revisionable`]: a type name plus a flat map of column name to scalar
//! value. [`Record`] is the stock implementation used by the lifecycle
//! helpers and storage backends.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
pub use serde_json::Value;

use crate::{Error, Result, registry::EntitySchema};

/// Column name to scalar value. Ordered so serialised snapshots are stable.
pub type Attributes = BTreeMap<String, Value>;

// ─── Revisionable ────────────────────────────────────────────────────────────

/// The narrow capability the engine needs from a subject: its entity type and
/// its attribute map. Keys are resolved through the registered
/// [`EntitySchema`].
pub trait Revisionable {
  fn subject_type(&self) -> &str;

  fn attributes(&self) -> &Attributes;

  fn attributes_mut(&mut self) -> &mut Attributes;

  /// The primary key value according to `schema`.
  fn key(&self, schema: &EntitySchema) -> Result<Value> {
    match self.attributes().get(&schema.primary_key) {
      Some(v) if !v.is_null() => Ok(v.clone()),
      _ => Err(Error::MissingKey {
        entity: self.subject_type().to_owned(),
        column: schema.primary_key.clone(),
      }),
    }
  }

  fn subject_ref(&self, schema: &EntitySchema) -> Result<SubjectRef> {
    Ok(SubjectRef {
      subject_type: self.subject_type().to_owned(),
      subject_id:   self.key(schema)?,
    })
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A row of a registered entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub entity_type: String,
  pub attributes:  Attributes,
}

impl Record {
  pub fn new(entity_type: impl Into<String>, attributes: Attributes) -> Self {
    Self { entity_type: entity_type.into(), attributes }
  }

  /// Shorthand for reading one column.
  pub fn get(&self, column: &str) -> Option<&Value> {
    self.attributes.get(column)
  }
}

impl Revisionable for Record {
  fn subject_type(&self) -> &str { &self.entity_type }

  fn attributes(&self) -> &Attributes { &self.attributes }

  fn attributes_mut(&mut self) -> &mut Attributes { &mut self.attributes }
}

/// Build an [`Attributes`] map from a JSON object literal.
///
/// Non-object values produce an empty map.
pub fn attributes(value: Value) -> Attributes {
  match value {
    Value::Object(map) => map.into_iter().collect(),
    _ => Attributes::new(),
  }
}

/// Timestamp column value: fixed-width RFC 3339 in UTC, so lexical order is
/// chronological order.
pub fn timestamp(at: DateTime<Utc>) -> Value {
  Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

// ─── SubjectRef ──────────────────────────────────────────────────────────────

/// Identity of a subject: its entity type and primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
  pub subject_type: String,
  pub subject_id:   Value,
}

impl SubjectRef {
  pub fn new(subject_type: impl Into<String>, subject_id: impl Into<Value>) -> Self {
    Self { subject_type: subject_type.into(), subject_id: subject_id.into() }
  }
}

impl fmt::Display for SubjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.subject_type, self.subject_id)
  }
}
