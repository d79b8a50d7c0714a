//! Error types for `revisor-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("entity type {0:?} is not registered")]
  UnknownEntity(String),

  #[error("relation {relation:?} is not registered for {subject_type:?}")]
  UnregisteredRelation {
    subject_type: String,
    relation:     String,
  },

  #[error("invalid registry: {0}")]
  InvalidRegistry(String),

  #[error("{entity} record has no value for key column {column:?}")]
  MissingKey { entity: String, column: String },

  #[error("{entity} {key} not found")]
  RecordNotFound { entity: String, key: String },

  #[error("revision not found: {0}")]
  RevisionNotFound(uuid::Uuid),

  #[error("entity type {0:?} does not support soft deletion")]
  SoftDeleteUnsupported(String),

  #[error(
    "revision {revision} belongs to {expected_type}:{expected_id}, not \
     {actual_type}:{actual_id}"
  )]
  SubjectMismatch {
    revision:      uuid::Uuid,
    expected_type: String,
    expected_id:   String,
    actual_type:   String,
    actual_id:     String,
  },

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
