//! Rollback: restore a subject and its relation graph from a revision.
//!
//! Every write goes through the caller's transaction. If any step fails the
//! caller drops the transaction and nothing of the rollback is visible.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error,
  engine::{Revisor, SnapshotCause},
  record::{Attributes, Revisionable, Value, timestamp},
  registry::{EntitySchema, RelationKind},
  revision::Revision,
  snapshot::{RelatedItem, RelationSnapshot},
  store::{Filter, Transaction},
};

/// What one relation's restoration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationReport {
  /// Existing related rows overwritten or taken out of the trash.
  pub updated:   usize,
  /// Related rows inserted again under their original key.
  pub recreated: usize,
  /// Related rows deleted because the revision did not contain them.
  pub pruned:    usize,
  /// Pivot rows inserted.
  pub attached:  usize,
}

/// Summary of a completed rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
  pub revision:              Uuid,
  /// The revision holding the state that was replaced, if one was taken.
  pub pre_rollback_revision: Option<Uuid>,
  pub restored_fields:       Vec<String>,
  pub relations:             BTreeMap<String, RelationReport>,
}

impl Revisor {
  /// Restore `subject` to `revision`.
  ///
  /// Order of work: mute lifecycle hooks for the subject, optionally record
  /// the current state, overwrite attributes the revision and the subject
  /// share, then restore each captured relation by kind. `subject` is updated
  /// in place to match what was persisted.
  pub fn rollback<T: Transaction, S: Revisionable + ?Sized>(
    &self,
    tx: &mut T,
    subject: &mut S,
    revision: &Revision,
    author_id: Option<&str>,
  ) -> Result<RollbackReport, T::Error> {
    let schema = self.registry().schema(subject.subject_type())?;
    let subject_ref = subject.subject_ref(schema)?;
    if !revision.belongs_to(&subject_ref) {
      return Err(
        Error::SubjectMismatch {
          revision:      revision.id,
          expected_type: revision.subject_type.clone(),
          expected_id:   revision.subject_id.to_string(),
          actual_type:   subject_ref.subject_type.clone(),
          actual_id:     subject_ref.subject_id.to_string(),
        }
        .into(),
      );
    }

    let _muted = self.suppress(&subject_ref);
    let options = self.options_for(&subject_ref.subject_type);

    let pre_rollback_revision = if options.create_revision_when_rolling_back {
      let current = subject.attributes().clone();
      self
        .record(tx, &subject_ref, &current, SnapshotCause::Rollback, author_id)?
        .revision()
        .map(|r| r.id)
    } else {
      None
    };

    let restored_fields =
      restore_attributes(tx, schema, subject, &revision.metadata.attributes, &subject_ref.subject_id)?;

    let mut relations = BTreeMap::new();
    for (name, captured) in &revision.metadata.relations {
      let owner = subject
        .attributes()
        .get(&captured.subject_key_name)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| Error::MissingKey {
          entity: subject_ref.subject_type.clone(),
          column: captured.subject_key_name.clone(),
        })?;
      let related = self.registry().schema(&captured.related_type)?;

      let report = match captured.kind {
        RelationKind::MultiDirect => restore_many(tx, related, captured, &owner)?,
        RelationKind::SingleDirect => restore_single(tx, related, captured)?,
        RelationKind::Pivoted => restore_pivoted(tx, related, captured, &owner)?,
      };
      tracing::debug!(subject = %subject_ref, relation = %name, ?report, "restored relation");
      relations.insert(name.clone(), report);
    }

    tracing::info!(
      subject = %subject_ref,
      revision = %revision.id,
      fields = restored_fields.len(),
      relations = relations.len(),
      "rolled back"
    );

    Ok(RollbackReport {
      revision: revision.id,
      pre_rollback_revision,
      restored_fields,
      relations,
    })
  }
}

/// Overwrite every column present in both `target` and the live subject.
/// Columns the revision does not know about are left alone.
fn restore_attributes<T: Transaction, S: Revisionable + ?Sized>(
  tx: &mut T,
  schema: &EntitySchema,
  subject: &mut S,
  target: &Attributes,
  key: &Value,
) -> Result<Vec<String>, T::Error> {
  let live = subject.attributes_mut();
  let mut restored = Vec::new();
  let mut changes = Attributes::new();

  for (column, value) in target {
    let Some(current) = live.get_mut(column) else {
      continue;
    };
    if current != value {
      *current = value.clone();
      changes.insert(column.clone(), value.clone());
    }
    restored.push(column.clone());
  }

  if changes.is_empty() {
    return Ok(restored);
  }

  if let Some(column) = &schema.updated_at_column
    && !target.contains_key(column)
    && live.contains_key(column)
  {
    let now = timestamp(Utc::now());
    live.insert(column.clone(), now.clone());
    changes.insert(column.clone(), now);
  }

  let filter = Filter::new().eq(schema.primary_key.as_str(), key.clone());
  tx.update(&schema.table, &filter, &changes)?;
  Ok(restored)
}

/// Owned, many: prune rows the revision lacks, then restore each item.
fn restore_many<T: Transaction>(
  tx: &mut T,
  related: &EntitySchema,
  captured: &RelationSnapshot,
  owner: &Value,
) -> Result<RelationReport, T::Error> {
  let mut report = RelationReport::default();
  let target: HashSet<String> = captured.keys().map(Value::to_string).collect();

  // Trashed rows included: a soft-deleted row outside the revision goes too.
  let attached = Filter::new().eq(captured.foreign_key_name.as_str(), owner.clone());
  for row in tx.select(&related.table, &attached)? {
    let Some(key) = row.get(&related.primary_key) else {
      continue;
    };
    if !target.contains(&key.to_string()) {
      let filter = Filter::new().eq(related.primary_key.as_str(), key.clone());
      report.pruned += tx.delete(&related.table, &filter)?;
    }
  }

  for item in &captured.items {
    restore_owned_item(tx, related, item, &mut report)?;
  }
  Ok(report)
}

/// Owned, single: find-or-recreate the one captured row, nothing pruned.
fn restore_single<T: Transaction>(
  tx: &mut T,
  related: &EntitySchema,
  captured: &RelationSnapshot,
) -> Result<RelationReport, T::Error> {
  let mut report = RelationReport::default();
  if let Some(item) = captured.items.first() {
    restore_owned_item(tx, related, item, &mut report)?;
  }
  Ok(report)
}

fn restore_owned_item<T: Transaction>(
  tx: &mut T,
  related: &EntitySchema,
  item: &RelatedItem,
  report: &mut RelationReport,
) -> Result<(), T::Error> {
  let by_key = Filter::new().eq(related.primary_key.as_str(), item.key.clone());
  let exists = !tx.select(&related.table, &by_key)?.is_empty();

  let mut row = item.attributes.clone();
  if let Some(marker) = &related.soft_delete_column {
    row.insert(marker.clone(), Value::Null);
  }

  if exists {
    row.remove(&related.primary_key);
    tx.update(&related.table, &by_key, &row)?;
    report.updated += 1;
  } else {
    // Reuse the original key so anything else pointing at it still resolves.
    row.insert(related.primary_key.clone(), item.key.clone());
    tx.insert(&related.table, &row)?;
    report.recreated += 1;
  }
  Ok(())
}

/// Referenced, pivoted: recreate missing related rows, untrash trashed ones,
/// then replace the subject's pivot rows with the captured ones.
fn restore_pivoted<T: Transaction>(
  tx: &mut T,
  related: &EntitySchema,
  captured: &RelationSnapshot,
  owner: &Value,
) -> Result<RelationReport, T::Error> {
  let mut report = RelationReport::default();

  for item in &captured.items {
    let by_key = Filter::new().eq(captured.foreign_key_name.as_str(), item.key.clone());
    let existing = tx.select(&related.table, &by_key)?.into_iter().next();

    match existing {
      None => {
        let mut row = item.attributes.clone();
        row.insert(captured.foreign_key_name.clone(), item.key.clone());
        if let Some(marker) = &related.soft_delete_column {
          row.insert(marker.clone(), Value::Null);
        }
        tx.insert(&related.table, &row)?;
        report.recreated += 1;
      }
      Some(row) => {
        let Some(marker) = &related.soft_delete_column else {
          continue;
        };
        if row.get(marker).is_some_and(|v| !v.is_null()) {
          let clear = Attributes::from([(marker.clone(), Value::Null)]);
          tx.update(&related.table, &by_key, &clear)?;
          report.updated += 1;
        }
      }
    }
  }

  let Some(pivot) = &captured.pivot else {
    tracing::warn!(related = %captured.related_type, "pivoted snapshot without pivot rows");
    return Ok(report);
  };
  let keys = &pivot.keys;

  let links = Filter::new().eq(keys.subject_key.as_str(), owner.clone());
  tx.delete(&keys.table, &links)?;

  for pivot_row in &pivot.items {
    let Some(related_key) = pivot_row.get(&keys.related_key).cloned() else {
      continue;
    };
    let mut row: Attributes = pivot_row
      .iter()
      .filter(|(column, _)| !keys.is_key_column(column))
      .map(|(column, value)| (column.clone(), value.clone()))
      .collect();
    row.insert(keys.subject_key.clone(), owner.clone());
    row.insert(keys.related_key.clone(), related_key);
    tx.insert(&keys.table, &row)?;
    report.attached += 1;
  }
  Ok(report)
}
