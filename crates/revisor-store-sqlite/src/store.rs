//! [`SqliteRevisor`] — an async handle pairing a SQLite file with a
//! [`Revisor`].
//!
//! Each method runs as a single transaction on the connection's worker thread:
//! the host write, the snapshot, and the retention prune commit together or
//! not at all.

use std::{path::Path, sync::Arc};

use uuid::Uuid;

use revisor_core::{
  Attributes, Record, Revision, RevisionOrder, Revisor, RollbackReport, SnapshotOutcome,
  SubjectRef, Value, store::Transaction,
};

use crate::{Result, schema::SCHEMA, transaction::SqliteTransaction};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A revision engine bound to a single SQLite database.
///
/// Clones share the connection and the engine.
#[derive(Clone)]
pub struct SqliteRevisor {
  conn:    tokio_rusqlite::Connection,
  revisor: Arc<Revisor>,
}

impl SqliteRevisor {
  /// Open (or create) a database at `path` and create the revision table.
  pub async fn open(path: impl AsRef<Path>, revisor: Revisor) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, revisor: Arc::new(revisor) };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory database — useful for testing.
  pub async fn open_in_memory(revisor: Revisor) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, revisor: Arc::new(revisor) };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("revision schema ready");
    Ok(())
  }

  pub fn revisor(&self) -> &Revisor { &self.revisor }

  /// Run host DDL or seed statements outside the engine.
  pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<()> {
    let sql = sql.into();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` inside one transaction, committing if it returns `Ok`.
  pub async fn transaction<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut SqliteTransaction<'_>, &Revisor) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let revisor = Arc::clone(&self.revisor);
    self
      .conn
      .call(move |conn| Ok(run_in_transaction(conn, &revisor, f)))
      .await?
  }

  // ── Lifecycle ─────────────────────────────────────────────────────────────

  pub async fn create(
    &self,
    entity: impl Into<String>,
    attributes: Attributes,
    author_id: Option<String>,
  ) -> Result<(Record, SnapshotOutcome)> {
    let entity = entity.into();
    self
      .transaction(move |tx, revisor| {
        revisor.create(tx, &entity, attributes, author_id.as_deref())
      })
      .await
  }

  pub async fn update(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
    changes: Attributes,
    author_id: Option<String>,
  ) -> Result<(Record, SnapshotOutcome)> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| {
        revisor.update(tx, &entity, &key, changes, author_id.as_deref())
      })
      .await
  }

  pub async fn soft_delete(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
    author_id: Option<String>,
  ) -> Result<Record> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| revisor.soft_delete(tx, &entity, &key, author_id.as_deref()))
      .await
  }

  pub async fn restore(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
    author_id: Option<String>,
  ) -> Result<(Record, SnapshotOutcome)> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| revisor.restore(tx, &entity, &key, author_id.as_deref()))
      .await
  }

  /// Permanently delete a row and its revisions; returns revisions removed.
  pub async fn force_delete(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
  ) -> Result<usize> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| revisor.force_delete(tx, &entity, &key))
      .await
  }

  pub async fn find(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
    with_trashed: bool,
  ) -> Result<Option<Record>> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| revisor.find(tx, &entity, &key, with_trashed))
      .await
  }

  // ── Revisions ─────────────────────────────────────────────────────────────

  /// Record the current state of a row as a revision.
  pub async fn snapshot(
    &self,
    entity: impl Into<String>,
    key: impl Into<Value>,
    author_id: Option<String>,
  ) -> Result<SnapshotOutcome> {
    let (entity, key) = (entity.into(), key.into());
    self
      .transaction(move |tx, revisor| {
        let record = revisor.find(tx, &entity, &key, true)?.ok_or_else(|| {
          revisor_core::Error::RecordNotFound { entity: entity.clone(), key: key.to_string() }
        })?;
        revisor.snapshot(tx, &record, author_id.as_deref())
      })
      .await
  }

  /// Roll the revision's subject back to it.
  pub async fn rollback(
    &self,
    revision_id: Uuid,
    author_id: Option<String>,
  ) -> Result<(Record, RollbackReport)> {
    self
      .transaction(move |tx, revisor| revisor.rollback_to(tx, revision_id, author_id.as_deref()))
      .await
  }

  pub async fn revision(&self, id: Uuid) -> Result<Option<Revision>> {
    self.transaction(move |tx, _| tx.get_revision(id)).await
  }

  pub async fn revisions(
    &self,
    subject: SubjectRef,
    order: RevisionOrder,
  ) -> Result<Vec<Revision>> {
    self
      .transaction(move |tx, revisor| revisor.revisions(tx, &subject, order))
      .await
  }

  pub async fn latest_revision(&self, subject: SubjectRef) -> Result<Option<Revision>> {
    self
      .transaction(move |tx, revisor| revisor.latest_revision(tx, &subject))
      .await
  }

  pub async fn revisions_by_author(&self, author_id: impl Into<String>) -> Result<Vec<Revision>> {
    let author_id = author_id.into();
    self
      .transaction(move |tx, _| tx.revisions_by_author(&author_id))
      .await
  }
}

fn run_in_transaction<R, F>(
  conn: &mut rusqlite::Connection,
  revisor: &Revisor,
  f: F,
) -> Result<R>
where
  F: FnOnce(&mut SqliteTransaction<'_>, &Revisor) -> Result<R>,
{
  let mut tx = SqliteTransaction::begin(conn)?;
  let out = f(&mut tx, revisor)?;
  tx.commit()?;
  Ok(out)
}
