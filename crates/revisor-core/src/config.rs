//! Per-subject-type revisioning options.
//!
//! Options can be built in code or loaded from a TOML file, with
//! `REVISOR__`-prefixed environment variables layered on top:
//!
//! ```toml
//! [defaults]
//! revision_limit = 50
//!
//! [types.post]
//! revision_on_create = true
//! tracked_relations = ["comments", "tags"]
//! ```

use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::Result;

/// How revisions are taken for one subject type. Every field is optional in
/// configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RevisionOptions {
  /// Record the just-created state on insert.
  pub revision_on_create:                bool,
  /// Keep at most this many revisions per subject; `None` is unbounded.
  pub revision_limit:                    Option<usize>,
  /// When non-empty, only these fields are compared and recorded.
  pub tracked_fields:                    Vec<String>,
  /// Ignored when `tracked_fields` is non-empty.
  pub excluded_fields:                   Vec<String>,
  pub tracked_relations:                 Vec<String>,
  /// Record the current state as a new revision before rolling back.
  pub create_revision_when_rolling_back: bool,
  pub include_timestamps_in_snapshot:    bool,
}

impl Default for RevisionOptions {
  fn default() -> Self {
    Self {
      revision_on_create:                false,
      revision_limit:                    None,
      tracked_fields:                    Vec::new(),
      excluded_fields:                   Vec::new(),
      tracked_relations:                 Vec::new(),
      create_revision_when_rolling_back: true,
      include_timestamps_in_snapshot:    false,
    }
  }
}

impl RevisionOptions {
  /// Whether `field` passes the tracked/excluded filter.
  pub fn tracks_field(&self, field: &str) -> bool {
    if !self.tracked_fields.is_empty() {
      self.tracked_fields.iter().any(|f| f == field)
    } else {
      !self.excluded_fields.iter().any(|f| f == field)
    }
  }
}

/// Options for every subject type, with a fallback for unlisted types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RevisionConfig {
  pub defaults: RevisionOptions,
  pub types:    HashMap<String, RevisionOptions>,
}

impl RevisionConfig {
  /// Read an optional TOML file at `path`, then apply environment overrides
  /// such as `REVISOR__TYPES__POST__REVISION_LIMIT=10`.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> { Self::load_with_env(path.as_ref(), None) }

  /// `env` replaces the process environment when given.
  fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("REVISOR")
          .separator("__")
          .try_parsing(true)
          .source(env),
      )
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// Builder-style registration of options for one subject type.
  pub fn with_type(mut self, subject_type: impl Into<String>, options: RevisionOptions) -> Self {
    self.types.insert(subject_type.into(), options);
    self
  }

  pub fn options_for(&self, subject_type: &str) -> &RevisionOptions {
    self.types.get(subject_type).unwrap_or(&self.defaults)
  }
}
