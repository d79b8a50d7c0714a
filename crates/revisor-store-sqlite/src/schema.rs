//! SQL schema for the revision table.
//!
//! Host tables are owned by the host; only `revisions` lives here. Executed
//! once at connection startup.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

-- Revisions are append-only: rows are inserted and deleted, never updated.
CREATE TABLE IF NOT EXISTS revisions (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,  -- creation order tie-break
    revision_id   TEXT NOT NULL UNIQUE,
    author_id     TEXT,
    subject_type  TEXT NOT NULL,
    subject_id    TEXT NOT NULL,   -- JSON-encoded key value
    metadata      TEXT NOT NULL,   -- JSON-encoded Snapshot
    created_at    TEXT NOT NULL,   -- fixed-width RFC 3339 UTC
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS revisions_subject_idx
    ON revisions(subject_type, subject_id, created_at, seq);
CREATE INDEX IF NOT EXISTS revisions_author_idx ON revisions(author_id);

PRAGMA user_version = 1;
";
