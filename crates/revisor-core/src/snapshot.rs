//! Snapshots — denormalised, self-contained copies of a subject's state.
//!
//! A snapshot carries no live references: related rows are copied in full,
//! together with the key names needed to find them again. The serialised form
//! is plain JSON and round-trips losslessly.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
  config::RevisionOptions,
  record::{Attributes, Value},
  registry::{EntitySchema, PivotKeys, Registry, RelationDescriptor, RelationKind},
  store::{Filter, Transaction},
};

// ─── Types ───────────────────────────────────────────────────────────────────

/// Point-in-time copy of a subject's tracked attributes and relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub attributes: Attributes,
  #[serde(default)]
  pub relations:  BTreeMap<String, RelationSnapshot>,
}

/// One captured relation. `pivot` is present only for
/// [`RelationKind::Pivoted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSnapshot {
  pub kind:             RelationKind,
  pub related_type:     String,
  pub subject_key_name: String,
  pub foreign_key_name: String,
  pub items:            Vec<RelatedItem>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pivot:            Option<PivotSnapshot>,
}

/// A related row, keyed for restoration. Position carries no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedItem {
  pub key:        Value,
  pub attributes: Attributes,
}

/// Pivot key names and the raw pivot rows linking subject and related rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotSnapshot {
  pub keys:  PivotKeys,
  pub items: Vec<Attributes>,
}

impl RelationSnapshot {
  /// The set of related keys this snapshot restores.
  pub fn keys(&self) -> impl Iterator<Item = &Value> {
    self.items.iter().map(|item| &item.key)
  }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Keep only the subject columns a snapshot records.
///
/// The primary key is never recorded. Timestamp columns are dropped unless
/// `include_timestamps_in_snapshot` is set. Field filters apply here and
/// nowhere else; related rows are always captured whole.
pub fn capture_attributes(
  schema: &EntitySchema,
  state: &Attributes,
  options: &RevisionOptions,
) -> Attributes {
  state
    .iter()
    .filter(|(column, _)| **column != schema.primary_key)
    .filter(|(column, _)| {
      options.include_timestamps_in_snapshot || !schema.is_timestamp_column(column)
    })
    .filter(|(column, _)| options.tracks_field(column))
    .map(|(column, value)| (column.clone(), value.clone()))
    .collect()
}

/// Build a snapshot of `state` (the subject's attributes at the moment being
/// recorded) and the current rows of every tracked relation.
///
/// Relations are read through `tx`, so they observe the same transaction the
/// revision will be written in. A tracked relation that is not registered, or
/// whose related type is unknown, is left out with a warning.
pub fn build<T: Transaction>(
  tx: &mut T,
  registry: &Registry,
  subject_type: &str,
  state: &Attributes,
  options: &RevisionOptions,
) -> Result<Snapshot, T::Error> {
  let schema = registry.schema(subject_type)?;
  let mut snapshot = Snapshot {
    attributes: capture_attributes(schema, state, options),
    relations:  BTreeMap::new(),
  };

  for name in &options.tracked_relations {
    let descriptor = match registry.classify(subject_type, name) {
      Ok(d) => d,
      Err(e) => {
        tracing::warn!(subject_type, relation = %name, error = %e, "skipping relation");
        continue;
      }
    };
    let related = match registry.schema(&descriptor.related_type) {
      Ok(s) => s,
      Err(e) => {
        tracing::warn!(subject_type, relation = %name, error = %e, "skipping relation");
        continue;
      }
    };

    let captured = match descriptor.kind {
      RelationKind::SingleDirect | RelationKind::MultiDirect => {
        capture_direct(tx, descriptor, related, state)?
      }
      RelationKind::Pivoted => match &descriptor.pivot {
        Some(pivot) => capture_pivoted(tx, descriptor, pivot, related, state)?,
        None => {
          tracing::warn!(subject_type, relation = %name, "pivoted relation without pivot keys");
          continue;
        }
      },
    };

    tracing::debug!(
      subject_type,
      relation = %name,
      items = captured.items.len(),
      "captured relation"
    );
    snapshot.relations.insert(name.clone(), captured);
  }

  Ok(snapshot)
}

fn subject_key_value<'a>(
  descriptor: &RelationDescriptor,
  state: &'a Attributes,
) -> Option<&'a Value> {
  state.get(&descriptor.subject_key).filter(|v| !v.is_null())
}

fn empty_relation(descriptor: &RelationDescriptor, related: &EntitySchema) -> RelationSnapshot {
  RelationSnapshot {
    kind:             descriptor.kind,
    related_type:     related.name.clone(),
    subject_key_name: descriptor.subject_key.clone(),
    foreign_key_name: descriptor.foreign_key.clone(),
    items:            Vec::new(),
    pivot:            None,
  }
}

fn capture_direct<T: Transaction>(
  tx: &mut T,
  descriptor: &RelationDescriptor,
  related: &EntitySchema,
  state: &Attributes,
) -> Result<RelationSnapshot, T::Error> {
  let mut captured = empty_relation(descriptor, related);
  let Some(owner) = subject_key_value(descriptor, state) else {
    return Ok(captured);
  };

  let filter = Filter::new()
    .eq(descriptor.foreign_key.as_str(), owner.clone())
    .live(related.soft_delete_column.as_deref(), false)
    .order_by(related.primary_key.as_str());
  let mut rows = tx.select(&related.table, &filter)?;
  if descriptor.kind == RelationKind::SingleDirect {
    rows.truncate(1);
  }

  captured.items = rows
    .into_iter()
    .filter_map(|row| keyed_item(&related.primary_key, row))
    .collect();
  Ok(captured)
}

fn capture_pivoted<T: Transaction>(
  tx: &mut T,
  descriptor: &RelationDescriptor,
  pivot: &PivotKeys,
  related: &EntitySchema,
  state: &Attributes,
) -> Result<RelationSnapshot, T::Error> {
  let mut captured = empty_relation(descriptor, related);
  let mut pivot_items = Vec::new();

  if let Some(owner) = subject_key_value(descriptor, state) {
    let filter = Filter::new()
      .eq(pivot.subject_key.as_str(), owner.clone())
      .order_by(pivot.primary_key.as_str());
    let pivot_rows = tx.select(&pivot.table, &filter)?;

    let mut seen = HashSet::new();
    for pivot_row in pivot_rows {
      let Some(related_key) = pivot_row.get(&pivot.related_key).cloned() else {
        continue;
      };
      let filter = Filter::new()
        .eq(descriptor.foreign_key.as_str(), related_key.clone())
        .live(related.soft_delete_column.as_deref(), false);
      // Links to soft-deleted rows are not part of the loaded relation.
      let Some(row) = tx.select(&related.table, &filter)?.into_iter().next() else {
        continue;
      };
      if seen.insert(related_key.to_string()) {
        captured.items.push(RelatedItem { key: related_key, attributes: row });
      }
      pivot_items.push(pivot_row);
    }
  }

  captured.pivot = Some(PivotSnapshot { keys: pivot.clone(), items: pivot_items });
  Ok(captured)
}

fn keyed_item(key_column: &str, row: Attributes) -> Option<RelatedItem> {
  let key = row.get(key_column).filter(|v| !v.is_null())?.clone();
  Some(RelatedItem { key, attributes: row })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::record::attributes;

  fn options() -> RevisionOptions { RevisionOptions::default() }

  #[test]
  fn capture_drops_key_and_timestamps() {
    let schema = EntitySchema::new("post").with_timestamps();
    let state = attributes(json!({
      "id": 7, "title": "Hello", "votes": 3,
      "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z"
    }));

    let captured = capture_attributes(&schema, &state, &options());
    assert_eq!(captured, attributes(json!({ "title": "Hello", "votes": 3 })));

    let with_ts = RevisionOptions { include_timestamps_in_snapshot: true, ..options() };
    let captured = capture_attributes(&schema, &state, &with_ts);
    assert!(captured.contains_key("created_at"));
    assert!(!captured.contains_key("id"));
  }

  #[test]
  fn tracked_fields_take_precedence_over_excluded() {
    let schema = EntitySchema::new("post");
    let state = attributes(json!({ "id": 1, "title": "a", "body": "b", "votes": 2 }));
    let opts = RevisionOptions {
      tracked_fields: vec!["title".into()],
      excluded_fields: vec!["title".into()],
      ..options()
    };
    assert_eq!(
      capture_attributes(&schema, &state, &opts),
      attributes(json!({ "title": "a" }))
    );

    let opts = RevisionOptions { excluded_fields: vec!["body".into()], ..options() };
    assert_eq!(
      capture_attributes(&schema, &state, &opts),
      attributes(json!({ "title": "a", "votes": 2 }))
    );
  }

  #[test]
  fn snapshot_json_shape() {
    let snapshot = Snapshot {
      attributes: attributes(json!({ "name": "X", "votes": 10 })),
      relations:  BTreeMap::from([(
        "comments".to_owned(),
        RelationSnapshot {
          kind:             RelationKind::MultiDirect,
          related_type:     "comment".into(),
          subject_key_name: "id".into(),
          foreign_key_name: "post_id".into(),
          items:            vec![RelatedItem {
            key:        json!(1),
            attributes: attributes(json!({ "id": 1, "post_id": 5, "body": "hi" })),
          }],
          pivot:            None,
        },
      )]),
    };

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["relations"]["comments"]["kind"], "multi_direct");
    assert!(value["relations"]["comments"].get("pivot").is_none());

    let back: Snapshot = serde_json::from_value(value).unwrap();
    assert_eq!(back, snapshot);
  }

  #[test]
  fn attributes_only_document_parses() {
    let snapshot: Snapshot =
      serde_json::from_value(json!({ "attributes": { "name": "X" } })).unwrap();
    assert!(snapshot.relations.is_empty());
    assert_eq!(snapshot.attributes["name"], "X");
  }
}
