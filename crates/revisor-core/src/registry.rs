//! Entity schemas and the relation classifier.
//!
//! Every entity type the engine touches registers an [`EntitySchema`] once,
//! and every subject type registers its revisionable relations by name. The
//! resulting [`Registry`] is immutable after construction; classification is
//! a map lookup, never an inspection of host code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Entity schema ───────────────────────────────────────────────────────────

/// Storage metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
  pub name:              String,
  pub table:             String,
  pub primary_key:       String,
  pub created_at_column: Option<String>,
  pub updated_at_column: Option<String>,
  /// Column holding the soft-delete marker; `NULL` means live.
  pub soft_delete_column: Option<String>,
}

impl EntitySchema {
  /// A schema whose table shares the entity name and whose key is `id`.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      table: name.clone(),
      name,
      primary_key: "id".to_owned(),
      created_at_column: None,
      updated_at_column: None,
      soft_delete_column: None,
    }
  }

  pub fn table(mut self, table: impl Into<String>) -> Self {
    self.table = table.into();
    self
  }

  pub fn primary_key(mut self, column: impl Into<String>) -> Self {
    self.primary_key = column.into();
    self
  }

  /// Enable `created_at` / `updated_at` bookkeeping.
  pub fn with_timestamps(mut self) -> Self {
    self.created_at_column = Some("created_at".to_owned());
    self.updated_at_column = Some("updated_at".to_owned());
    self
  }

  /// Enable soft deletion through a `deleted_at` column.
  pub fn soft_deletes(mut self) -> Self {
    self.soft_delete_column = Some("deleted_at".to_owned());
    self
  }

  pub fn is_timestamp_column(&self, column: &str) -> bool {
    self.created_at_column.as_deref() == Some(column)
      || self.updated_at_column.as_deref() == Some(column)
  }
}

// ─── Relations ───────────────────────────────────────────────────────────────

/// The shape of a relation, which decides how it is captured and restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
  /// At most one related row holding a foreign key to the subject.
  SingleDirect,
  /// Any number of related rows holding a foreign key to the subject.
  MultiDirect,
  /// Many-to-many through a pivot table.
  Pivoted,
}

/// Whether rollback is responsible for the related rows' lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
  /// Rollback may recreate and prune related rows.
  Owned,
  /// Rollback only recreates missing rows and never deletes.
  Referenced,
}

impl RelationKind {
  pub fn ownership(self) -> Ownership {
    match self {
      Self::SingleDirect | Self::MultiDirect => Ownership::Owned,
      Self::Pivoted => Ownership::Referenced,
    }
  }
}

/// Column names of a pivot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotKeys {
  pub table:       String,
  /// Pivot column referencing the subject.
  pub subject_key: String,
  /// Pivot column referencing the related row.
  pub related_key: String,
  /// The pivot row's own primary key.
  pub primary_key: String,
}

impl PivotKeys {
  pub fn new(
    table: impl Into<String>,
    subject_key: impl Into<String>,
    related_key: impl Into<String>,
  ) -> Self {
    Self {
      table:       table.into(),
      subject_key: subject_key.into(),
      related_key: related_key.into(),
      primary_key: "id".to_owned(),
    }
  }

  pub fn primary_key(mut self, column: impl Into<String>) -> Self {
    self.primary_key = column.into();
    self
  }

  pub(crate) fn is_key_column(&self, column: &str) -> bool {
    column == self.subject_key
      || column == self.related_key
      || column == self.primary_key
  }
}

/// Everything the engine needs to capture and restore one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
  pub name:         String,
  pub kind:         RelationKind,
  pub related_type: String,
  /// Subject column the relation joins on (usually its primary key).
  pub subject_key:  String,
  /// Direct kinds: related column pointing at the subject. Pivoted: related
  /// column the pivot's `related_key` points at.
  pub foreign_key:  String,
  pub pivot:        Option<PivotKeys>,
}

impl RelationDescriptor {
  /// One related row owning `foreign_key` back to the subject's `id`.
  pub fn single(
    name: impl Into<String>,
    related_type: impl Into<String>,
    foreign_key: impl Into<String>,
  ) -> Self {
    Self::direct(RelationKind::SingleDirect, name, related_type, foreign_key)
  }

  /// Many related rows owning `foreign_key` back to the subject's `id`.
  pub fn many(
    name: impl Into<String>,
    related_type: impl Into<String>,
    foreign_key: impl Into<String>,
  ) -> Self {
    Self::direct(RelationKind::MultiDirect, name, related_type, foreign_key)
  }

  /// Many-to-many through `pivot`; the related rows are matched on `id`.
  pub fn pivoted(
    name: impl Into<String>,
    related_type: impl Into<String>,
    pivot: PivotKeys,
  ) -> Self {
    Self {
      name:         name.into(),
      kind:         RelationKind::Pivoted,
      related_type: related_type.into(),
      subject_key:  "id".to_owned(),
      foreign_key:  "id".to_owned(),
      pivot:        Some(pivot),
    }
  }

  fn direct(
    kind: RelationKind,
    name: impl Into<String>,
    related_type: impl Into<String>,
    foreign_key: impl Into<String>,
  ) -> Self {
    Self {
      name: name.into(),
      kind,
      related_type: related_type.into(),
      subject_key: "id".to_owned(),
      foreign_key: foreign_key.into(),
      pivot: None,
    }
  }

  /// Join on a subject column other than `id`.
  pub fn subject_key(mut self, column: impl Into<String>) -> Self {
    self.subject_key = column.into();
    self
  }

  /// Pivoted only: match related rows on a column other than `id`.
  pub fn related_key(mut self, column: impl Into<String>) -> Self {
    self.foreign_key = column.into();
    self
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Statically registered entity schemas and relation descriptors.
#[derive(Debug, Clone, Default)]
pub struct Registry {
  entities:  HashMap<String, EntitySchema>,
  relations: HashMap<String, HashMap<String, RelationDescriptor>>,
}

impl Registry {
  pub fn new() -> Self { Self::default() }

  /// Register (or replace) an entity schema.
  pub fn entity(mut self, schema: EntitySchema) -> Self {
    self.entities.insert(schema.name.clone(), schema);
    self
  }

  /// Register a revisionable relation on `subject_type`.
  pub fn relation(
    mut self,
    subject_type: impl Into<String>,
    descriptor: RelationDescriptor,
  ) -> Self {
    self
      .relations
      .entry(subject_type.into())
      .or_default()
      .insert(descriptor.name.clone(), descriptor);
    self
  }

  pub fn schema(&self, entity_type: &str) -> Result<&EntitySchema> {
    self
      .entities
      .get(entity_type)
      .ok_or_else(|| Error::UnknownEntity(entity_type.to_owned()))
  }

  /// Resolve a relation name on a subject type to its descriptor.
  pub fn classify(
    &self,
    subject_type: &str,
    relation: &str,
  ) -> Result<&RelationDescriptor> {
    self
      .relations
      .get(subject_type)
      .and_then(|by_name| by_name.get(relation))
      .ok_or_else(|| Error::UnregisteredRelation {
        subject_type: subject_type.to_owned(),
        relation:     relation.to_owned(),
      })
  }

  /// Check that every relation points at registered entity types and that
  /// pivot metadata is present exactly for pivoted relations.
  pub fn validate(&self) -> Result<()> {
    let mut problems = Vec::new();

    for (subject_type, by_name) in &self.relations {
      if !self.entities.contains_key(subject_type) {
        problems.push(format!("subject type {subject_type:?} is not registered"));
      }
      for descriptor in by_name.values() {
        if !self.entities.contains_key(&descriptor.related_type) {
          problems.push(format!(
            "{subject_type}.{} targets unregistered type {:?}",
            descriptor.name, descriptor.related_type
          ));
        }
        match (descriptor.kind, &descriptor.pivot) {
          (RelationKind::Pivoted, None) => problems.push(format!(
            "{subject_type}.{} is pivoted but has no pivot keys",
            descriptor.name
          )),
          (RelationKind::SingleDirect | RelationKind::MultiDirect, Some(_)) => {
            problems.push(format!(
              "{subject_type}.{} is direct but declares pivot keys",
              descriptor.name
            ))
          }
          _ => {}
        }
      }
    }

    if problems.is_empty() {
      Ok(())
    } else {
      problems.sort();
      Err(Error::InvalidRegistry(problems.join("; ")))
    }
  }
}
