//! Revision records — immutable, persisted snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  record::{SubjectRef, Value},
  snapshot::Snapshot,
};

/// A stored snapshot of one subject. Never modified after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
  pub id:           Uuid,
  /// Store-assigned, strictly increasing; breaks `created_at` ties.
  pub sequence:     i64,
  pub subject_type: String,
  pub subject_id:   Value,
  pub author_id:    Option<String>,
  pub metadata:     Snapshot,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

impl Revision {
  pub fn subject(&self) -> SubjectRef {
    SubjectRef {
      subject_type: self.subject_type.clone(),
      subject_id:   self.subject_id.clone(),
    }
  }

  pub fn belongs_to(&self, subject: &SubjectRef) -> bool {
    self.subject_type == subject.subject_type && self.subject_id == subject.subject_id
  }
}

/// Input to [`crate::store::Transaction::insert_revision`].
/// Identity and timestamps are always set by the store.
#[derive(Debug, Clone)]
pub struct NewRevision {
  pub subject:   SubjectRef,
  pub author_id: Option<String>,
  pub metadata:  Snapshot,
}

/// Sort direction for revision listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevisionOrder {
  #[default]
  OldestFirst,
  NewestFirst,
}
