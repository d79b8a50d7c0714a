//! Host-side record operations with the engine wired in.
//!
//! These are the mutations a host performs on registered entities, each
//! calling the matching [`Revisor`] entry point inside the same transaction:
//! a failed revision insert aborts the write that triggered it.

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error,
  change,
  engine::{Revisor, SkipReason, SnapshotOutcome},
  record::{Attributes, Record, Value, timestamp},
  registry::EntitySchema,
  rollback::RollbackReport,
  store::{Filter, Transaction},
};

impl Revisor {
  /// Load one row by primary key. Soft-deleted rows need `with_trashed`.
  pub fn find<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
    with_trashed: bool,
  ) -> Result<Option<Record>, T::Error> {
    let schema = self.registry().schema(entity)?;
    let filter = by_key(schema, key).live(schema.soft_delete_column.as_deref(), with_trashed);
    Ok(
      tx.select(&schema.table, &filter)?
        .into_iter()
        .next()
        .map(|row| Record::new(entity, row)),
    )
  }

  fn find_or_fail<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
  ) -> Result<Record, T::Error> {
    self.find(tx, entity, key, true)?.ok_or_else(|| {
      Error::RecordNotFound { entity: entity.to_owned(), key: key.to_string() }.into()
    })
  }

  /// Insert a row, stamping timestamps, then fire the create hook with the
  /// row as persisted.
  pub fn create<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    mut attributes: Attributes,
    author_id: Option<&str>,
  ) -> Result<(Record, SnapshotOutcome), T::Error> {
    let schema = self.registry().schema(entity)?;
    let now = timestamp(Utc::now());
    for column in [&schema.created_at_column, &schema.updated_at_column].into_iter().flatten() {
      attributes.entry(column.clone()).or_insert_with(|| now.clone());
    }

    let row_id = tx.insert(&schema.table, &attributes)?;
    let key = match attributes.get(&schema.primary_key) {
      Some(key) if !key.is_null() => key.clone(),
      _ => Value::from(row_id),
    };

    let record = self.find_or_fail(tx, entity, &key)?;
    let outcome = self.on_create(tx, &record, author_id)?;
    Ok((record, outcome))
  }

  /// Apply `changes` to the row with `key`.
  ///
  /// `changes` are compared in the form the store reads them back, and
  /// nothing is written when no value differs. Otherwise the update hook sees
  /// the persisted state before the write, and the updated timestamp is
  /// bumped after change detection.
  pub fn update<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
    mut changes: Attributes,
    author_id: Option<&str>,
  ) -> Result<(Record, SnapshotOutcome), T::Error> {
    let schema = self.registry().schema(entity)?;
    let previous = self.find_or_fail(tx, entity, key)?;

    changes.remove(&schema.primary_key);
    for value in changes.values_mut() {
      *value = tx.stored_form(value);
    }
    let mut next = previous.clone();
    next.attributes.extend(changes.clone());
    if change::changed_fields(&previous.attributes, &next.attributes).is_empty() {
      return Ok((previous, SnapshotOutcome::Skipped(SkipReason::Unchanged)));
    }

    let outcome = self.on_update(tx, &next, &previous.attributes, author_id)?;

    if let Some(column) = &schema.updated_at_column
      && !changes.contains_key(column)
    {
      let now = timestamp(Utc::now());
      next.attributes.insert(column.clone(), now.clone());
      changes.insert(column.clone(), now);
    }
    tx.update(&schema.table, &by_key(schema, key), &changes)?;
    Ok((next, outcome))
  }

  /// Set the soft-delete marker. Never records a revision on its own, and
  /// leaves existing revisions in place. Already-trashed rows are returned
  /// untouched.
  pub fn soft_delete<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
    author_id: Option<&str>,
  ) -> Result<Record, T::Error> {
    let marker = self.soft_delete_column(entity)?;
    let current = self.find_or_fail(tx, entity, key)?;
    if current.get(&marker).is_some_and(|v| !v.is_null()) {
      return Ok(current);
    }
    let changes = Attributes::from([(marker, timestamp(Utc::now()))]);
    Ok(self.update(tx, entity, key, changes, author_id)?.0)
  }

  /// Clear the soft-delete marker.
  pub fn restore<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
    author_id: Option<&str>,
  ) -> Result<(Record, SnapshotOutcome), T::Error> {
    let marker = self.soft_delete_column(entity)?;
    let changes = Attributes::from([(marker, Value::Null)]);
    self.update(tx, entity, key, changes, author_id)
  }

  /// Permanently delete the row and every revision of it. Returns the number
  /// of revisions removed.
  pub fn force_delete<T: Transaction>(
    &self,
    tx: &mut T,
    entity: &str,
    key: &Value,
  ) -> Result<usize, T::Error> {
    let schema = self.registry().schema(entity)?;
    let record = self.find_or_fail(tx, entity, key)?;
    let removed = self.on_permanent_delete(tx, &record)?;
    tx.delete(&schema.table, &by_key(schema, key))?;
    Ok(removed)
  }

  /// Load a stored revision and its subject (trashed or not) and roll the
  /// subject back to it.
  pub fn rollback_to<T: Transaction>(
    &self,
    tx: &mut T,
    revision_id: Uuid,
    author_id: Option<&str>,
  ) -> Result<(Record, RollbackReport), T::Error> {
    let revision = tx
      .get_revision(revision_id)?
      .ok_or(Error::RevisionNotFound(revision_id))?;
    let mut record = self.find_or_fail(tx, &revision.subject_type, &revision.subject_id)?;
    let report = self.rollback(tx, &mut record, &revision, author_id)?;
    Ok((record, report))
  }

  fn soft_delete_column(&self, entity: &str) -> crate::Result<String> {
    self
      .registry()
      .schema(entity)?
      .soft_delete_column
      .clone()
      .ok_or_else(|| Error::SoftDeleteUnsupported(entity.to_owned()))
  }
}

fn by_key(schema: &EntitySchema, key: &Value) -> Filter {
  Filter::new().eq(schema.primary_key.as_str(), key.clone())
}
