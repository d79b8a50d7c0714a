//! Core types and the revision engine.
//!
//! This crate captures point-in-time snapshots of registered entities (and
//! their relations) and rolls them back. It is deliberately free of database
//! dependencies: storage backends implement [`store::Transaction`] and the
//! engine does all of its work through one open transaction.

pub mod change;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod record;
pub mod registry;
pub mod retention;
pub mod revision;
pub mod rollback;
pub mod snapshot;
pub mod store;

pub use config::{RevisionConfig, RevisionOptions};
pub use engine::{Revisor, SkipReason, SnapshotCause, SnapshotOutcome, SnapshotRequest};
pub use error::{Error, Result};
pub use record::{Attributes, Record, Revisionable, SubjectRef, Value};
pub use registry::{EntitySchema, PivotKeys, Registry, RelationDescriptor, RelationKind};
pub use revision::{NewRevision, Revision, RevisionOrder};
pub use rollback::{RelationReport, RollbackReport};
pub use snapshot::Snapshot;
