//! Encoding and decoding helpers between engine types and SQLite values.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so text order is
//! time order. Snapshots and subject keys are stored as compact JSON. UUIDs
//! are stored as hyphenated lowercase strings. BLOB columns travel through
//! attribute maps as `{"$blob": "<base64>"}`.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, SecondsFormat, Utc};
use revisor_core::{Revision, Value};
use rusqlite::types::Value as SqlValue;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Subject keys ─────────────────────────────────────────────────────────────

/// Keys are compared as text, so `1` and `"1"` stay distinct.
pub fn encode_key(key: &Value) -> Result<String> { Ok(serde_json::to_string(key)?) }

pub fn decode_key(s: &str) -> Result<Value> { Ok(serde_json::from_str(s)?) }

// ─── Column values ────────────────────────────────────────────────────────────

/// Object key marking a base64-encoded BLOB.
pub const BLOB_TAG: &str = "$blob";

/// Scalars map onto SQLite storage classes; booleans become integers, tagged
/// blobs become BLOBs, and other arrays/objects are stored as JSON text.
pub fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    Value::Object(map) => match blob_bytes(map) {
      Some(bytes) => SqlValue::Blob(bytes),
      None => SqlValue::Text(value.to_string()),
    },
    Value::Array(_) => SqlValue::Text(value.to_string()),
  }
}

pub fn from_sql(value: SqlValue) -> Value {
  match value {
    SqlValue::Null => Value::Null,
    SqlValue::Integer(i) => Value::from(i),
    SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
    SqlValue::Text(s) => Value::String(s),
    SqlValue::Blob(bytes) => {
      let mut tagged = serde_json::Map::new();
      tagged.insert(BLOB_TAG.to_owned(), Value::String(B64.encode(bytes)));
      Value::Object(tagged)
    }
  }
}

/// The value as SQLite will hand it back after a write.
pub fn stored_form(value: &Value) -> Value { from_sql(to_sql(value)) }

fn blob_bytes(map: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
  if map.len() != 1 {
    return None;
  }
  let encoded = map.get(BLOB_TAG)?.as_str()?;
  B64.decode(encoded).ok()
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const REVISION_COLUMNS: &str = "seq, revision_id, author_id, subject_type, subject_id, \
                                    metadata, created_at, updated_at";

/// Raw strings read directly from a `revisions` row.
pub struct RawRevision {
  pub seq:          i64,
  pub revision_id:  String,
  pub author_id:    Option<String>,
  pub subject_type: String,
  pub subject_id:   String,
  pub metadata:     String,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawRevision {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:          row.get(0)?,
      revision_id:  row.get(1)?,
      author_id:    row.get(2)?,
      subject_type: row.get(3)?,
      subject_id:   row.get(4)?,
      metadata:     row.get(5)?,
      created_at:   row.get(6)?,
      updated_at:   row.get(7)?,
    })
  }

  pub fn into_revision(self) -> Result<Revision> {
    Ok(Revision {
      id:           decode_uuid(&self.revision_id)?,
      sequence:     self.seq,
      subject_type: self.subject_type,
      subject_id:   decode_key(&self.subject_id)?,
      author_id:    self.author_id,
      metadata:     serde_json::from_str(&self.metadata)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn keys_keep_their_json_type() {
    assert_eq!(encode_key(&json!(1)).unwrap(), "1");
    assert_eq!(encode_key(&json!("1")).unwrap(), "\"1\"");
    assert_eq!(decode_key("\"abc\"").unwrap(), json!("abc"));
  }

  #[test]
  fn scalar_mapping() {
    assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
    assert_eq!(to_sql(&json!(2.5)), SqlValue::Real(2.5));
    assert_eq!(to_sql(&json!({ "a": 1 })), SqlValue::Text("{\"a\":1}".into()));
    assert_eq!(from_sql(SqlValue::Integer(7)), json!(7));
    assert_eq!(from_sql(SqlValue::Text("x".into())), json!("x"));
  }

  #[test]
  fn blobs_survive_a_read_write_cycle() {
    let read = from_sql(SqlValue::Blob(vec![1, 2, 255]));
    assert_eq!(read, json!({ "$blob": "AQL/" }));
    assert_eq!(to_sql(&read), SqlValue::Blob(vec![1, 2, 255]));

    // Objects that only look tagged stay JSON text.
    let not_b64 = json!({ "$blob": "!!" });
    assert!(matches!(to_sql(&not_b64), SqlValue::Text(_)));
    let extra = json!({ "$blob": "AQL/", "x": 1 });
    assert!(matches!(to_sql(&extra), SqlValue::Text(_)));
  }

  #[test]
  fn stored_form_matches_what_is_read_back() {
    assert_eq!(stored_form(&json!(true)), json!(1));
    assert_eq!(stored_form(&json!(false)), json!(0));
    assert_eq!(stored_form(&json!([1, 2])), json!("[1,2]"));
    assert_eq!(stored_form(&json!("x")), json!("x"));
  }

  #[test]
  fn timestamps_are_fixed_width() {
    let a = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
    let b = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc);
    let (ea, eb) = (encode_dt(a), encode_dt(b));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }
}
