//! Change detection: does a mutation warrant a new revision?
//!
//! Pure functions over attribute maps; nothing here touches storage.

use std::collections::BTreeSet;

use crate::{config::RevisionOptions, record::Attributes};

/// The columns whose values differ between `previous` and `current`. A column
/// missing on one side counts as `null`.
pub fn changed_fields<'a>(previous: &'a Attributes, current: &'a Attributes) -> BTreeSet<&'a str> {
  previous
    .keys()
    .chain(current.keys())
    .map(String::as_str)
    .filter(|column| {
      let before = previous.get(*column).filter(|v| !v.is_null());
      let after = current.get(*column).filter(|v| !v.is_null());
      before != after
    })
    .collect()
}

/// Whether an update from `previous` to `current` should record a revision.
///
/// Rules, first match wins:
/// 1. only a newly set soft-delete marker changed: no;
/// 2. `tracked_fields` non-empty: yes iff a tracked field changed;
/// 3. `excluded_fields` non-empty: yes iff a field outside the set changed;
/// 4. otherwise: yes iff anything changed.
pub fn should_revision_update(
  previous: &Attributes,
  current: &Attributes,
  options: &RevisionOptions,
  soft_delete_column: Option<&str>,
) -> bool {
  let changed = changed_fields(previous, current);

  if let Some(marker) = soft_delete_column {
    let newly_trashed = previous.get(marker).is_none_or(|v| v.is_null())
      && current.get(marker).is_some_and(|v| !v.is_null());
    if newly_trashed && changed.len() == 1 && changed.contains(marker) {
      return false;
    }
  }

  changed.iter().any(|column| options.tracks_field(column))
}

/// Whether creating a subject should record a revision.
pub fn should_revision_create(options: &RevisionOptions) -> bool {
  options.revision_on_create
}
