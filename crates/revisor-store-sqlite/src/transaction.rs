//! [`SqliteTransaction`] — the SQLite implementation of [`Transaction`].

use chrono::Utc;
use rusqlite::{OptionalExtension as _, types::Value as SqlValue};
use uuid::Uuid;

use revisor_core::{
  Attributes, NewRevision, Revision, RevisionOrder, SubjectRef, Value,
  store::{AfterCommit, Condition, Filter, Transaction},
};

use crate::{
  Result,
  encode::{REVISION_COLUMNS, RawRevision, encode_dt, encode_key, encode_uuid, from_sql, to_sql},
};

/// An open SQLite transaction. Dropping it without [`Transaction::commit`]
/// rolls everything back and discards queued after-commit callbacks.
pub struct SqliteTransaction<'c> {
  tx:           rusqlite::Transaction<'c>,
  after_commit: Vec<AfterCommit>,
}

impl<'c> SqliteTransaction<'c> {
  pub fn begin(conn: &'c mut rusqlite::Connection) -> Result<Self> {
    Ok(Self { tx: conn.transaction()?, after_commit: Vec::new() })
  }

  /// Direct access for host statements that should share the transaction.
  pub fn connection(&self) -> &rusqlite::Connection { &self.tx }

  fn query_revisions(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Revision>> {
    let mut stmt = self.tx.prepare(sql)?;
    let raws = stmt
      .query_map(rusqlite::params_from_iter(params.iter()), RawRevision::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawRevision::into_revision).collect()
  }
}

// ─── SQL building ────────────────────────────────────────────────────────────

fn quote(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

/// Render `filter` as a `WHERE` clause, pushing bound values onto `params`.
fn where_clause(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
  if filter.conditions.is_empty() {
    return String::new();
  }
  let conds: Vec<String> = filter
    .conditions
    .iter()
    .map(|cond| match cond {
      Condition::Eq(column, value) if value.is_null() => format!("{} IS NULL", quote(column)),
      Condition::Eq(column, value) => {
        params.push(to_sql(value));
        format!("{} = ?", quote(column))
      }
      Condition::IsNull(column) => format!("{} IS NULL", quote(column)),
    })
    .collect();
  format!(" WHERE {}", conds.join(" AND "))
}

fn order_clause(filter: &Filter) -> String {
  filter
    .order_by
    .as_deref()
    .map(|column| format!(" ORDER BY {}", quote(column)))
    .unwrap_or_default()
}

fn subject_params(subject: &SubjectRef) -> Result<Vec<SqlValue>> {
  Ok(vec![
    SqlValue::Text(subject.subject_type.clone()),
    SqlValue::Text(encode_key(&subject.subject_id)?),
  ])
}

const SUBJECT_WHERE: &str = "subject_type = ?1 AND subject_id = ?2";

// ─── Transaction impl ────────────────────────────────────────────────────────

impl Transaction for SqliteTransaction<'_> {
  type Error = crate::Error;

  // ── Rows ──────────────────────────────────────────────────────────────────

  fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<Attributes>> {
    let mut params = Vec::new();
    let sql = format!(
      "SELECT * FROM {}{}{}",
      quote(table),
      where_clause(filter, &mut params),
      order_clause(filter)
    );

    let mut stmt = self.tx.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
    let rows = stmt
      .query_map(rusqlite::params_from_iter(params.iter()), |row| {
        let mut attrs = Attributes::new();
        for (i, name) in columns.iter().enumerate() {
          attrs.insert(name.clone(), from_sql(row.get::<_, SqlValue>(i)?));
        }
        Ok(attrs)
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  fn insert(&mut self, table: &str, row: &Attributes) -> Result<i64> {
    if row.is_empty() {
      self.tx.execute(&format!("INSERT INTO {} DEFAULT VALUES", quote(table)), [])?;
      return Ok(self.tx.last_insert_rowid());
    }

    let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
    let placeholders = vec!["?"; row.len()].join(", ");
    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({placeholders})",
      quote(table),
      columns.join(", ")
    );
    let params: Vec<SqlValue> = row.values().map(to_sql).collect();
    self.tx.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
    Ok(self.tx.last_insert_rowid())
  }

  fn update(&mut self, table: &str, filter: &Filter, changes: &Attributes) -> Result<usize> {
    if changes.is_empty() {
      return Ok(0);
    }

    let mut params: Vec<SqlValue> = changes.values().map(to_sql).collect();
    let assignments: Vec<String> =
      changes.keys().map(|c| format!("{} = ?", quote(c))).collect();
    let sql = format!(
      "UPDATE {} SET {}{}",
      quote(table),
      assignments.join(", "),
      where_clause(filter, &mut params)
    );
    Ok(self.tx.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
  }

  fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize> {
    let mut params = Vec::new();
    let sql = format!("DELETE FROM {}{}", quote(table), where_clause(filter, &mut params));
    Ok(self.tx.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
  }

  fn stored_form(&self, value: &Value) -> Value { crate::encode::stored_form(value) }

  // ── Revisions ─────────────────────────────────────────────────────────────

  fn insert_revision(&mut self, input: NewRevision) -> Result<Revision> {
    let now = Utc::now();
    let id = Uuid::new_v4();

    self.tx.execute(
      "INSERT INTO revisions (
         revision_id, author_id, subject_type, subject_id, metadata, created_at, updated_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
      rusqlite::params![
        encode_uuid(id),
        input.author_id.as_deref(),
        input.subject.subject_type.as_str(),
        encode_key(&input.subject.subject_id)?,
        serde_json::to_string(&input.metadata)?,
        encode_dt(now),
      ],
    )?;

    Ok(Revision {
      id,
      sequence: self.tx.last_insert_rowid(),
      subject_type: input.subject.subject_type,
      subject_id: input.subject.subject_id,
      author_id: input.author_id,
      metadata: input.metadata,
      created_at: now,
      updated_at: now,
    })
  }

  fn get_revision(&mut self, id: Uuid) -> Result<Option<Revision>> {
    let raw = self
      .tx
      .query_row(
        &format!("SELECT {REVISION_COLUMNS} FROM revisions WHERE revision_id = ?1"),
        rusqlite::params![encode_uuid(id)],
        RawRevision::from_row,
      )
      .optional()?;
    raw.map(RawRevision::into_revision).transpose()
  }

  fn revisions_for(&mut self, subject: &SubjectRef, order: RevisionOrder) -> Result<Vec<Revision>> {
    let direction = match order {
      RevisionOrder::OldestFirst => "ASC",
      RevisionOrder::NewestFirst => "DESC",
    };
    let sql = format!(
      "SELECT {REVISION_COLUMNS} FROM revisions WHERE {SUBJECT_WHERE}
       ORDER BY created_at {direction}, seq {direction}"
    );
    self.query_revisions(&sql, &subject_params(subject)?)
  }

  fn revisions_by_author(&mut self, author_id: &str) -> Result<Vec<Revision>> {
    let sql = format!(
      "SELECT {REVISION_COLUMNS} FROM revisions WHERE author_id = ?1
       ORDER BY created_at ASC, seq ASC"
    );
    self.query_revisions(&sql, &[SqlValue::Text(author_id.to_owned())])
  }

  fn count_revisions(&mut self, subject: &SubjectRef) -> Result<usize> {
    let count: i64 = self.tx.query_row(
      &format!("SELECT COUNT(*) FROM revisions WHERE {SUBJECT_WHERE}"),
      rusqlite::params_from_iter(subject_params(subject)?.iter()),
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  fn delete_oldest_revisions(&mut self, subject: &SubjectRef, count: usize) -> Result<usize> {
    let mut params = subject_params(subject)?;
    params.push(SqlValue::Integer(count as i64));
    let deleted = self.tx.execute(
      &format!(
        "DELETE FROM revisions WHERE seq IN (
           SELECT seq FROM revisions WHERE {SUBJECT_WHERE}
           ORDER BY created_at ASC, seq ASC
           LIMIT ?3
         )"
      ),
      rusqlite::params_from_iter(params.iter()),
    )?;
    Ok(deleted)
  }

  fn delete_revisions_for(&mut self, subject: &SubjectRef) -> Result<usize> {
    Ok(self.tx.execute(
      &format!("DELETE FROM revisions WHERE {SUBJECT_WHERE}"),
      rusqlite::params_from_iter(subject_params(subject)?.iter()),
    )?)
  }

  // ── Completion ────────────────────────────────────────────────────────────

  fn after_commit(&mut self, f: AfterCommit) { self.after_commit.push(f); }

  fn commit(self) -> Result<()> {
    let Self { tx, after_commit } = self;
    tx.commit()?;
    for callback in after_commit {
      callback();
    }
    Ok(())
  }
}
