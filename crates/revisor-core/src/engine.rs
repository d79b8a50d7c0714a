//! [`Revisor`] — the revision engine.
//!
//! A `Revisor` owns the registry, the per-type options and the snapshot hooks.
//! The host calls it at its lifecycle points with the transaction that carries
//! the triggering write, so a failed revision insert undoes that write too.

use std::{
  collections::HashSet,
  fmt,
  sync::{Arc, Mutex, PoisonError},
};

use crate::{
  change,
  config::{RevisionConfig, RevisionOptions},
  record::{Attributes, Revisionable, SubjectRef},
  registry::Registry,
  retention,
  revision::{NewRevision, Revision, RevisionOrder},
  snapshot::{self, Snapshot},
  store::Transaction,
};

// ─── Hooks and outcomes ──────────────────────────────────────────────────────

/// Why a snapshot is being taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCause {
  Create,
  Update,
  /// The pre-rollback copy of the current state.
  Rollback,
  Manual,
}

/// What the `before_snapshot` hook gets to inspect.
#[derive(Debug)]
pub struct SnapshotRequest<'a> {
  pub subject:   &'a SubjectRef,
  pub cause:     SnapshotCause,
  pub author_id: Option<&'a str>,
  pub snapshot:  &'a Snapshot,
}

/// Returns `false` to veto the snapshot.
pub type BeforeSnapshot = Arc<dyn Fn(&SnapshotRequest<'_>) -> bool + Send + Sync>;

/// Runs after the transaction holding the new revision commits.
pub type AfterSnapshot = Arc<dyn Fn(&Revision) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// No tracked field changed.
  Unchanged,
  /// `revision_on_create` is off.
  CreateDisabled,
  /// The `before_snapshot` hook declined.
  Vetoed,
  /// The subject is being rolled back.
  Suppressed,
  /// `revision_limit` is zero, so nothing would be kept.
  NotRetained,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
  Recorded(Revision),
  Skipped(SkipReason),
}

impl SnapshotOutcome {
  pub fn revision(&self) -> Option<&Revision> {
    match self {
      Self::Recorded(r) => Some(r),
      Self::Skipped(_) => None,
    }
  }

  pub fn is_recorded(&self) -> bool { matches!(self, Self::Recorded(_)) }
}

// ─── Revisor ─────────────────────────────────────────────────────────────────

pub struct Revisor {
  registry:        Registry,
  config:          RevisionConfig,
  before_snapshot: Option<BeforeSnapshot>,
  after_snapshot:  Option<AfterSnapshot>,
  /// Subjects with a rollback in flight; their lifecycle hooks are muted.
  rolling_back:    Mutex<HashSet<String>>,
}

impl fmt::Debug for Revisor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Revisor")
      .field("registry", &self.registry)
      .field("config", &self.config)
      .field("before_snapshot", &self.before_snapshot.is_some())
      .field("after_snapshot", &self.after_snapshot.is_some())
      .finish_non_exhaustive()
  }
}

impl Revisor {
  pub fn new(registry: Registry, config: RevisionConfig) -> Self {
    Self {
      registry,
      config,
      before_snapshot: None,
      after_snapshot: None,
      rolling_back: Mutex::new(HashSet::new()),
    }
  }

  /// Install a hook that may veto snapshots.
  pub fn before_snapshot(
    mut self,
    hook: impl Fn(&SnapshotRequest<'_>) -> bool + Send + Sync + 'static,
  ) -> Self {
    self.before_snapshot = Some(Arc::new(hook));
    self
  }

  /// Install a hook notified of every committed revision.
  pub fn after_snapshot(mut self, hook: impl Fn(&Revision) + Send + Sync + 'static) -> Self {
    self.after_snapshot = Some(Arc::new(hook));
    self
  }

  pub fn registry(&self) -> &Registry { &self.registry }

  pub fn config(&self) -> &RevisionConfig { &self.config }

  pub fn options_for(&self, subject_type: &str) -> &RevisionOptions {
    self.config.options_for(subject_type)
  }

  // ── Lifecycle entry points ────────────────────────────────────────────────

  /// A subject was just inserted; record it if `revision_on_create` is set.
  pub fn on_create<T: Transaction, S: Revisionable + ?Sized>(
    &self,
    tx: &mut T,
    subject: &S,
    author_id: Option<&str>,
  ) -> Result<SnapshotOutcome, T::Error> {
    let subject_ref = self.subject_ref(subject)?;
    if self.is_suppressed(&subject_ref) {
      return Ok(SnapshotOutcome::Skipped(SkipReason::Suppressed));
    }
    if !change::should_revision_create(self.options_for(subject.subject_type())) {
      return Ok(SnapshotOutcome::Skipped(SkipReason::CreateDisabled));
    }
    self.record(tx, &subject_ref, subject.attributes(), SnapshotCause::Create, author_id)
  }

  /// `subject` is about to be (or was just) changed from `previous`, the
  /// persisted state. Records `previous` when the change is relevant.
  pub fn on_update<T: Transaction, S: Revisionable + ?Sized>(
    &self,
    tx: &mut T,
    subject: &S,
    previous: &Attributes,
    author_id: Option<&str>,
  ) -> Result<SnapshotOutcome, T::Error> {
    let subject_ref = self.subject_ref(subject)?;
    if self.is_suppressed(&subject_ref) {
      return Ok(SnapshotOutcome::Skipped(SkipReason::Suppressed));
    }

    let schema = self.registry.schema(subject.subject_type())?;
    let relevant = change::should_revision_update(
      previous,
      subject.attributes(),
      self.options_for(subject.subject_type()),
      schema.soft_delete_column.as_deref(),
    );
    if !relevant {
      return Ok(SnapshotOutcome::Skipped(SkipReason::Unchanged));
    }

    // The previous state may lack columns the host did not load.
    let mut state = subject.attributes().clone();
    state.extend(previous.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.record(tx, &subject_ref, &state, SnapshotCause::Update, author_id)
  }

  /// A subject is being permanently deleted; drop all of its revisions.
  /// Soft deletion must not call this.
  pub fn on_permanent_delete<T: Transaction, S: Revisionable + ?Sized>(
    &self,
    tx: &mut T,
    subject: &S,
  ) -> Result<usize, T::Error> {
    let subject_ref = self.subject_ref(subject)?;
    let removed = tx.delete_revisions_for(&subject_ref)?;
    tracing::debug!(subject = %subject_ref, removed, "deleted revisions of purged subject");
    Ok(removed)
  }

  /// Record the subject's current state unconditionally (hooks still apply).
  pub fn snapshot<T: Transaction, S: Revisionable + ?Sized>(
    &self,
    tx: &mut T,
    subject: &S,
    author_id: Option<&str>,
  ) -> Result<SnapshotOutcome, T::Error> {
    let subject_ref = self.subject_ref(subject)?;
    self.record(tx, &subject_ref, subject.attributes(), SnapshotCause::Manual, author_id)
  }

  // ── Queries ───────────────────────────────────────────────────────────────

  pub fn revisions<T: Transaction>(
    &self,
    tx: &mut T,
    subject: &SubjectRef,
    order: RevisionOrder,
  ) -> Result<Vec<Revision>, T::Error> {
    tx.revisions_for(subject, order)
  }

  pub fn latest_revision<T: Transaction>(
    &self,
    tx: &mut T,
    subject: &SubjectRef,
  ) -> Result<Option<Revision>, T::Error> {
    Ok(tx.revisions_for(subject, RevisionOrder::NewestFirst)?.into_iter().next())
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  pub(crate) fn subject_ref<S: Revisionable + ?Sized>(
    &self,
    subject: &S,
  ) -> crate::Result<SubjectRef> {
    let schema = self.registry.schema(subject.subject_type())?;
    subject.subject_ref(schema)
  }

  /// Build, offer to the veto hook, insert, prune. One transaction. A limit
  /// of zero records nothing and fires no hooks.
  pub(crate) fn record<T: Transaction>(
    &self,
    tx: &mut T,
    subject: &SubjectRef,
    state: &Attributes,
    cause: SnapshotCause,
    author_id: Option<&str>,
  ) -> Result<SnapshotOutcome, T::Error> {
    let options = self.options_for(&subject.subject_type);
    if options.revision_limit == Some(0) {
      return Ok(SnapshotOutcome::Skipped(SkipReason::NotRetained));
    }
    let metadata = snapshot::build(tx, &self.registry, &subject.subject_type, state, options)?;

    if let Some(hook) = &self.before_snapshot {
      let request = SnapshotRequest { subject, cause, author_id, snapshot: &metadata };
      if !hook(&request) {
        tracing::debug!(%subject, ?cause, "snapshot vetoed");
        return Ok(SnapshotOutcome::Skipped(SkipReason::Vetoed));
      }
    }

    let revision = tx.insert_revision(NewRevision {
      subject:   subject.clone(),
      author_id: author_id.map(str::to_owned),
      metadata,
    })?;
    tracing::debug!(%subject, revision = %revision.id, ?cause, "recorded revision");

    retention::prune(tx, subject, options.revision_limit)?;

    if let Some(hook) = &self.after_snapshot {
      let hook = Arc::clone(hook);
      let committed = revision.clone();
      tx.after_commit(Box::new(move || hook(&committed)));
    }

    Ok(SnapshotOutcome::Recorded(revision))
  }

  pub(crate) fn is_suppressed(&self, subject: &SubjectRef) -> bool {
    self
      .rolling_back
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains(&subject.to_string())
  }

  /// Mute lifecycle hooks for `subject` until the guard drops.
  pub(crate) fn suppress(&self, subject: &SubjectRef) -> SuppressionGuard<'_> {
    let key = subject.to_string();
    self
      .rolling_back
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.clone());
    SuppressionGuard { set: &self.rolling_back, key }
  }
}

pub(crate) struct SuppressionGuard<'a> {
  set: &'a Mutex<HashSet<String>>,
  key: String,
}

impl Drop for SuppressionGuard<'_> {
  fn drop(&mut self) {
    self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
  }
}
