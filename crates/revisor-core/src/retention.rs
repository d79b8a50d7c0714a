//! Retention: cap the number of revisions kept per subject.

use crate::{record::SubjectRef, store::Transaction};

/// Delete the oldest revisions of `subject` beyond `limit`; returns how many
/// were removed. Runs in the caller's transaction, right after an insert.
pub fn prune<T: Transaction>(
  tx: &mut T,
  subject: &SubjectRef,
  limit: Option<usize>,
) -> Result<usize, T::Error> {
  let Some(limit) = limit else {
    return Ok(0);
  };

  let count = tx.count_revisions(subject)?;
  if count <= limit {
    return Ok(0);
  }

  let removed = tx.delete_oldest_revisions(subject, count - limit)?;
  tracing::info!(%subject, removed, limit, "pruned revisions");
  Ok(removed)
}
