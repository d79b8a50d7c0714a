//! The `Transaction` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `revisor-store-sqlite`). The engine only ever talks to an already-open
//! transaction, so everything it does for one operation lands atomically or
//! not at all. Dropping a transaction without calling
//! [`Transaction::commit`] must roll it back.

use crate::{
  record::{Attributes, SubjectRef, Value},
  revision::{NewRevision, Revision, RevisionOrder},
};

// ─── Filter ──────────────────────────────────────────────────────────────────

/// One predicate of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
  /// `column = value`; a `Null` value matches `IS NULL`.
  Eq(String, Value),
  IsNull(String),
}

/// A conjunction of conditions plus an optional ascending sort column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
  pub conditions: Vec<Condition>,
  pub order_by:   Option<String>,
}

impl Filter {
  pub fn new() -> Self { Self::default() }

  pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
    self.conditions.push(Condition::Eq(column.into(), value.into()));
    self
  }

  pub fn is_null(mut self, column: impl Into<String>) -> Self {
    self.conditions.push(Condition::IsNull(column.into()));
    self
  }

  /// Add `IS NULL` on the soft-delete column unless `with_trashed`.
  pub fn live(self, soft_delete_column: Option<&str>, with_trashed: bool) -> Self {
    match soft_delete_column {
      Some(column) if !with_trashed => self.is_null(column),
      _ => self,
    }
  }

  pub fn order_by(mut self, column: impl Into<String>) -> Self {
    self.order_by = Some(column.into());
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Callback queued to run once the surrounding transaction has committed.
pub type AfterCommit = Box<dyn FnOnce() + Send + 'static>;

/// One open storage transaction.
///
/// Errors raised by the engine itself are converted into the backend's error
/// type, so callers see a single error channel and storage failures pass
/// through untouched.
pub trait Transaction {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Rows ──────────────────────────────────────────────────────────────────

  /// All rows of `table` matching `filter`.
  fn select(
    &mut self,
    table: &str,
    filter: &Filter,
  ) -> Result<Vec<Attributes>, Self::Error>;

  /// Insert a row and return the storage-assigned row id.
  fn insert(&mut self, table: &str, row: &Attributes) -> Result<i64, Self::Error>;

  /// Overwrite `changes` on every row matching `filter`; returns the count.
  fn update(
    &mut self,
    table: &str,
    filter: &Filter,
    changes: &Attributes,
  ) -> Result<usize, Self::Error>;

  /// Permanently delete rows matching `filter`; returns the count.
  fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, Self::Error>;

  /// `value` as a later `select` would return it once written. Backends that
  /// coerce types (booleans to integers, say) override this so change
  /// detection compares like with like.
  fn stored_form(&self, value: &Value) -> Value { value.clone() }

  // ── Revisions ─────────────────────────────────────────────────────────────

  /// Persist a revision. `id`, `sequence` and timestamps are assigned here.
  fn insert_revision(&mut self, input: NewRevision) -> Result<Revision, Self::Error>;

  fn get_revision(&mut self, id: uuid::Uuid) -> Result<Option<Revision>, Self::Error>;

  /// Revisions of one subject in creation order (sequence breaks ties).
  fn revisions_for(
    &mut self,
    subject: &SubjectRef,
    order: RevisionOrder,
  ) -> Result<Vec<Revision>, Self::Error>;

  /// Revisions recorded by `author_id`, oldest first.
  fn revisions_by_author(&mut self, author_id: &str)
  -> Result<Vec<Revision>, Self::Error>;

  fn count_revisions(&mut self, subject: &SubjectRef) -> Result<usize, Self::Error>;

  /// Delete the `count` oldest revisions of a subject; returns the count.
  fn delete_oldest_revisions(
    &mut self,
    subject: &SubjectRef,
    count: usize,
  ) -> Result<usize, Self::Error>;

  fn delete_revisions_for(&mut self, subject: &SubjectRef) -> Result<usize, Self::Error>;

  // ── Completion ────────────────────────────────────────────────────────────

  /// Queue `f` to run after a successful commit. Discarded on rollback.
  fn after_commit(&mut self, f: AfterCommit);

  fn commit(self) -> Result<(), Self::Error>;
}
