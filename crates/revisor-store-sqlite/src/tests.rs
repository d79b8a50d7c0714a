//! Integration tests for the engine over `SqliteRevisor` and an in-memory
//! database.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use revisor_core::{
  Attributes, EntitySchema, PivotKeys, Record, Registry, RelationDescriptor, RelationKind,
  RevisionConfig, RevisionOptions, RevisionOrder, Revisor, SkipReason, SnapshotCause,
  SnapshotOutcome, SubjectRef, Value, record::attributes, store::Filter, store::Transaction,
};
use serde_json::json;

use crate::SqliteRevisor;

const HOST_SCHEMA: &str = "
CREATE TABLE posts (
    id INTEGER PRIMARY KEY, name TEXT, votes INTEGER,
    created_at TEXT, updated_at TEXT, deleted_at TEXT
);
CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER, body TEXT, deleted_at TEXT);
CREATE TABLE covers   (id INTEGER PRIMARY KEY AUTOINCREMENT, post_id INTEGER, url TEXT);
CREATE TABLE tags     (id INTEGER PRIMARY KEY, name TEXT, deleted_at TEXT);
CREATE TABLE post_tag (id INTEGER PRIMARY KEY, post_id INTEGER, tag_id INTEGER, weight INTEGER);
CREATE TABLE assets   (id INTEGER PRIMARY KEY, data BLOB, pinned INTEGER);
";

fn registry() -> Registry {
  Registry::new()
    .entity(EntitySchema::new("post").table("posts").with_timestamps().soft_deletes())
    .entity(EntitySchema::new("comment").table("comments").soft_deletes())
    .entity(EntitySchema::new("cover").table("covers"))
    .entity(EntitySchema::new("tag").table("tags").soft_deletes())
    .entity(EntitySchema::new("asset").table("assets"))
    .relation("post", RelationDescriptor::many("comments", "comment", "post_id"))
    .relation("post", RelationDescriptor::single("cover", "cover", "post_id"))
    .relation(
      "post",
      RelationDescriptor::pivoted("tags", "tag", PivotKeys::new("post_tag", "post_id", "tag_id")),
    )
}

async fn open(revisor: Revisor) -> SqliteRevisor {
  let s = SqliteRevisor::open_in_memory(revisor).await.expect("in-memory store");
  s.execute_batch(HOST_SCHEMA).await.expect("host schema");
  s
}

async fn store_with(options: RevisionOptions) -> SqliteRevisor {
  let config = RevisionConfig::default().with_type("post", options);
  open(Revisor::new(registry(), config)).await
}

async fn store() -> SqliteRevisor { store_with(RevisionOptions::default()).await }

fn relations(names: &[&str]) -> RevisionOptions {
  RevisionOptions {
    tracked_relations: names.iter().map(|n| (*n).to_owned()).collect(),
    ..Default::default()
  }
}

async fn new_post(s: &SqliteRevisor, name: &str, votes: i64) -> Record {
  s.create("post", attributes(json!({ "name": name, "votes": votes })), None)
    .await
    .unwrap()
    .0
}

async fn new_row(s: &SqliteRevisor, entity: &str, attrs: Value) -> Value {
  let (record, _) = s.create(entity, attributes(attrs), None).await.unwrap();
  record.get("id").cloned().unwrap()
}

fn id_of(record: &Record) -> Value { record.get("id").cloned().unwrap() }

fn post_ref(record: &Record) -> SubjectRef { SubjectRef::new("post", id_of(record)) }

async fn rows(s: &SqliteRevisor, table: &'static str, filter: Filter) -> Vec<Attributes> {
  s.transaction(move |tx, _| tx.select(table, &filter)).await.unwrap()
}

async fn revision_count(s: &SqliteRevisor, post: &Record) -> usize {
  s.revisions(post_ref(post), RevisionOrder::OldestFirst).await.unwrap().len()
}

// ─── Change detection ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_records_nothing_by_default() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;
  assert_eq!(revision_count(&s, &post).await, 0);
}

#[tokio::test]
async fn create_records_created_state_when_enabled() {
  let s = store_with(RevisionOptions { revision_on_create: true, ..Default::default() }).await;
  let (post, outcome) = s
    .create("post", attributes(json!({ "name": "X", "votes": 10 })), Some("alice".into()))
    .await
    .unwrap();

  let revision = outcome.revision().unwrap();
  assert_eq!(revision.author_id.as_deref(), Some("alice"));
  assert_eq!(revision.subject_id, id_of(&post));
  assert_eq!(revision.metadata.attributes["name"], "X");
  assert!(!revision.metadata.attributes.contains_key("id"));
  assert!(!revision.metadata.attributes.contains_key("created_at"));
}

#[tokio::test]
async fn update_records_previous_state() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;

  let (updated, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "votes": 11 })), None)
    .await
    .unwrap();
  assert_eq!(updated.get("votes"), Some(&json!(11)));

  let revision = outcome.revision().unwrap();
  assert_eq!(
    revision.metadata.attributes,
    attributes(json!({ "name": "X", "votes": 10, "deleted_at": null }))
  );
  assert_eq!(revision_count(&s, &post).await, 1);
}

#[tokio::test]
async fn unchanged_update_writes_nothing() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "votes": 10 })), None)
    .await
    .unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::Unchanged));
  assert_eq!(revision_count(&s, &post).await, 0);
}

#[tokio::test]
async fn tracked_fields_filter_detection_and_capture() {
  let s = store_with(RevisionOptions {
    tracked_fields: vec!["name".into()],
    ..Default::default()
  })
  .await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "votes": 20 })), None)
    .await
    .unwrap();
  assert!(!outcome.is_recorded());

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y" })), None)
    .await
    .unwrap();
  assert_eq!(outcome.revision().unwrap().metadata.attributes, attributes(json!({ "name": "X" })));
}

#[tokio::test]
async fn excluded_fields_are_not_revisioned() {
  let s = store_with(RevisionOptions {
    excluded_fields: vec!["votes".into()],
    ..Default::default()
  })
  .await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "votes": 20 })), None)
    .await
    .unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::Unchanged));
}

#[tokio::test]
async fn resetting_a_boolean_is_not_a_change() {
  let s = store().await;
  let asset = new_row(&s, "asset", json!({ "pinned": true })).await;
  let subject = SubjectRef::new("asset", asset.clone());

  let (record, outcome) = s
    .update("asset", asset.clone(), attributes(json!({ "pinned": true })), None)
    .await
    .unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::Unchanged));
  assert_eq!(record.get("pinned"), Some(&json!(1)));
  assert!(s.revisions(subject.clone(), RevisionOrder::OldestFirst).await.unwrap().is_empty());

  let (_, outcome) = s
    .update("asset", asset, attributes(json!({ "pinned": false })), None)
    .await
    .unwrap();
  assert_eq!(outcome.revision().unwrap().metadata.attributes["pinned"], 1);
  assert_eq!(s.revisions(subject, RevisionOrder::OldestFirst).await.unwrap().len(), 1);
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn soft_delete_keeps_revisions_and_force_delete_removes_them() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;
  s.update("post", id_of(&post), attributes(json!({ "votes": 11 })), None).await.unwrap();
  s.update("post", id_of(&post), attributes(json!({ "votes": 12 })), None).await.unwrap();

  let trashed = s.soft_delete("post", id_of(&post), None).await.unwrap();
  assert!(trashed.get("deleted_at").is_some_and(|v| !v.is_null()));
  assert_eq!(revision_count(&s, &post).await, 2);
  assert!(s.find("post", id_of(&post), false).await.unwrap().is_none());
  assert!(s.find("post", id_of(&post), true).await.unwrap().is_some());

  let removed = s.force_delete("post", id_of(&post)).await.unwrap();
  assert_eq!(removed, 2);
  assert_eq!(revision_count(&s, &post).await, 0);
  assert!(s.find("post", id_of(&post), true).await.unwrap().is_none());
}

#[tokio::test]
async fn restoring_from_trash_is_revisioned() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;
  s.soft_delete("post", id_of(&post), None).await.unwrap();

  let (restored, outcome) = s.restore("post", id_of(&post), None).await.unwrap();
  assert_eq!(restored.get("deleted_at"), Some(&Value::Null));
  assert!(outcome.revision().unwrap().metadata.attributes["deleted_at"].is_string());
}

#[tokio::test]
async fn soft_deleting_a_trashed_row_changes_nothing() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;

  let first = s.soft_delete("post", id_of(&post), None).await.unwrap();
  let second = s.soft_delete("post", id_of(&post), None).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(revision_count(&s, &post).await, 0);
}

// ─── Retention ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn retention_keeps_most_recent_revisions() {
  let s = store_with(RevisionOptions { revision_limit: Some(3), ..Default::default() }).await;
  let post = new_post(&s, "X", 0).await;

  for votes in 1..=5 {
    s.update("post", id_of(&post), attributes(json!({ "votes": votes })), None)
      .await
      .unwrap();
  }

  let kept = s.revisions(post_ref(&post), RevisionOrder::OldestFirst).await.unwrap();
  let votes: Vec<_> = kept.iter().map(|r| r.metadata.attributes["votes"].clone()).collect();
  assert_eq!(votes, vec![json!(2), json!(3), json!(4)]);
  assert!(kept.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test]
async fn zero_limit_records_nothing() {
  let fired = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&fired);
  let config = RevisionConfig::default()
    .with_type("post", RevisionOptions { revision_limit: Some(0), ..Default::default() });
  let revisor = Revisor::new(registry(), config).after_snapshot(move |_| {
    counter.fetch_add(1, Ordering::SeqCst);
  });
  let s = open(revisor).await;
  let post = new_post(&s, "X", 10).await;

  let (updated, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "votes": 11 })), None)
    .await
    .unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::NotRetained));
  assert_eq!(updated.get("votes"), Some(&json!(11)));

  let outcome = s.snapshot("post", id_of(&post), None).await.unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::NotRetained));

  assert_eq!(revision_count(&s, &post).await, 0);
  assert_eq!(fired.load(Ordering::SeqCst), 0);
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn revision_queries_by_subject_and_author() {
  let s = store().await;
  let post = new_post(&s, "X", 0).await;
  s.update("post", id_of(&post), attributes(json!({ "votes": 1 })), Some("alice".into()))
    .await
    .unwrap();
  s.update("post", id_of(&post), attributes(json!({ "votes": 2 })), Some("bob".into()))
    .await
    .unwrap();

  let newest = s.revisions(post_ref(&post), RevisionOrder::NewestFirst).await.unwrap();
  assert_eq!(newest.len(), 2);
  assert_eq!(newest[0].author_id.as_deref(), Some("bob"));

  let latest = s.latest_revision(post_ref(&post)).await.unwrap().unwrap();
  assert_eq!(latest.id, newest[0].id);
  assert_eq!(s.revision(latest.id).await.unwrap(), Some(latest));

  let by_alice = s.revisions_by_author("alice").await.unwrap();
  assert_eq!(by_alice.len(), 1);
  assert_eq!(by_alice[0].metadata.attributes["votes"], 0);
}

// ─── Hooks and atomicity ─────────────────────────────────────────────────────

#[tokio::test]
async fn before_snapshot_veto_skips_without_blocking_write() {
  let revisor = Revisor::new(registry(), RevisionConfig::default())
    .before_snapshot(|req| req.cause != SnapshotCause::Update);
  let s = open(revisor).await;
  let post = new_post(&s, "X", 10).await;

  let (updated, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y" })), None)
    .await
    .unwrap();
  assert_eq!(outcome, SnapshotOutcome::Skipped(SkipReason::Vetoed));
  assert_eq!(updated.get("name"), Some(&json!("Y")));
  assert_eq!(revision_count(&s, &post).await, 0);
}

#[tokio::test]
async fn after_snapshot_fires_only_on_commit() {
  let fired = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&fired);
  let revisor = Revisor::new(registry(), RevisionConfig::default())
    .after_snapshot(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
  let s = open(revisor).await;
  let post = new_post(&s, "X", 10).await;

  s.update("post", id_of(&post), attributes(json!({ "votes": 11 })), None).await.unwrap();
  assert_eq!(fired.load(Ordering::SeqCst), 1);

  let key = id_of(&post);
  let err = s
    .transaction(move |tx, revisor| {
      revisor.update(tx, "post", &key, attributes(json!({ "name": "Z" })), None)?;
      Err::<(), _>(crate::Error::DateParse("abort".into()))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::DateParse(_)));

  assert_eq!(fired.load(Ordering::SeqCst), 1);
  assert_eq!(revision_count(&s, &post).await, 1);
  let current = s.find("post", id_of(&post), false).await.unwrap().unwrap();
  assert_eq!(current.get("name"), Some(&json!("X")));
}

#[tokio::test]
async fn failed_revision_insert_aborts_the_update() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;
  s.execute_batch("DROP TABLE revisions").await.unwrap();

  let err = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y" })), None)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Sqlite(_)));

  let current = s.find("post", id_of(&post), false).await.unwrap().unwrap();
  assert_eq!(current.get("name"), Some(&json!("X")));
}

// ─── Snapshots of relations ──────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_captures_relations_and_skips_unregistered() {
  let s = store_with(relations(&["comments", "cover", "tags", "ghost"])).await;
  let post = new_post(&s, "X", 10).await;
  let post_id = id_of(&post);

  new_row(&s, "comment", json!({ "post_id": post_id, "body": "one" })).await;
  let gone = new_row(&s, "comment", json!({ "post_id": post_id, "body": "two" })).await;
  s.soft_delete("comment", gone, None).await.unwrap();

  let outcome = s.snapshot("post", post_id.clone(), None).await.unwrap();
  let metadata = &outcome.revision().unwrap().metadata;

  assert!(!metadata.relations.contains_key("ghost"));

  let comments = &metadata.relations["comments"];
  assert_eq!(comments.kind, RelationKind::MultiDirect);
  assert_eq!(comments.foreign_key_name, "post_id");
  assert_eq!(comments.items.len(), 1);
  assert_eq!(comments.items[0].attributes["body"], "one");

  let cover = &metadata.relations["cover"];
  assert!(cover.items.is_empty());

  let tags = &metadata.relations["tags"];
  assert!(tags.items.is_empty());
  assert_eq!(tags.pivot.as_ref().unwrap().keys.related_key, "tag_id");
}

// ─── Rollback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_restores_attributes_and_records_current_state() {
  let s = store().await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y", "votes": 20 })), None)
    .await
    .unwrap();
  let revision = outcome.revision().unwrap().clone();
  assert_eq!(revision.metadata.attributes["name"], "X");
  assert_eq!(revision.metadata.attributes["votes"], 10);

  let (record, report) = s.rollback(revision.id, None).await.unwrap();
  assert_eq!(record.get("name"), Some(&json!("X")));
  assert_eq!(record.get("votes"), Some(&json!(10)));

  let stored = s.find("post", id_of(&post), false).await.unwrap().unwrap();
  assert_eq!(stored.get("name"), Some(&json!("X")));
  assert_eq!(stored.get("votes"), Some(&json!(10)));

  let pre = s.revision(report.pre_rollback_revision.unwrap()).await.unwrap().unwrap();
  assert_eq!(pre.metadata.attributes["name"], "Y");
  assert_eq!(pre.metadata.attributes["votes"], 20);
  assert_eq!(revision_count(&s, &post).await, 2);
}

#[tokio::test]
async fn rollback_to_fresh_snapshot_changes_nothing() {
  let s = store_with(RevisionOptions {
    create_revision_when_rolling_back: false,
    ..Default::default()
  })
  .await;
  let post = new_post(&s, "X", 10).await;

  let outcome = s.snapshot("post", id_of(&post), None).await.unwrap();
  let (_, report) = s.rollback(outcome.revision().unwrap().id, None).await.unwrap();
  assert!(report.pre_rollback_revision.is_none());
  assert!(report.restored_fields.contains(&"name".to_owned()));

  let stored = s.find("post", id_of(&post), false).await.unwrap().unwrap();
  assert_eq!(stored, post);
  assert_eq!(revision_count(&s, &post).await, 1);
}

#[tokio::test]
async fn rollback_ignores_fields_unknown_to_the_revision() {
  let s = store_with(RevisionOptions {
    tracked_fields: vec!["name".into()],
    create_revision_when_rolling_back: false,
    ..Default::default()
  })
  .await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y", "votes": 20 })), None)
    .await
    .unwrap();
  let (record, report) = s.rollback(outcome.revision().unwrap().id, None).await.unwrap();

  assert_eq!(report.restored_fields, vec!["name".to_owned()]);
  assert_eq!(record.get("name"), Some(&json!("X")));
  assert_eq!(record.get("votes"), Some(&json!(20)));
}

#[tokio::test]
async fn rollback_rejects_revision_of_another_subject() {
  let s = store().await;
  let first = new_post(&s, "X", 10).await;
  let second = new_post(&s, "Y", 20).await;
  let outcome = s.snapshot("post", id_of(&first), None).await.unwrap();
  let revision_id = outcome.revision().unwrap().id;

  let other = id_of(&second);
  let err = s
    .transaction(move |tx, revisor| {
      let mut record = revisor.find(tx, "post", &other, false)?.unwrap();
      let revision = tx.get_revision(revision_id)?.unwrap();
      revisor.rollback(tx, &mut record, &revision, None)
    })
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Core(revisor_core::Error::SubjectMismatch { .. })));

  let untouched = s.find("post", id_of(&second), false).await.unwrap().unwrap();
  assert_eq!(untouched.get("name"), Some(&json!("Y")));
}

#[tokio::test]
async fn rollback_of_unknown_revision_errors() {
  let s = store().await;
  let err = s.rollback(uuid::Uuid::new_v4(), None).await.unwrap_err();
  assert!(matches!(err, crate::Error::Core(revisor_core::Error::RevisionNotFound(_))));
}

#[tokio::test]
async fn rollback_restores_owned_children() {
  let s = store_with(relations(&["comments"])).await;
  let post = new_post(&s, "X", 10).await;
  let post_id = id_of(&post);

  let c1 = new_row(&s, "comment", json!({ "post_id": post_id, "body": "one" })).await;
  let c2 = new_row(&s, "comment", json!({ "post_id": post_id, "body": "two" })).await;
  let c3 = new_row(&s, "comment", json!({ "post_id": post_id, "body": "three" })).await;

  let outcome = s.snapshot("post", post_id.clone(), None).await.unwrap();
  let revision = outcome.revision().unwrap().clone();

  s.update("comment", c1.clone(), attributes(json!({ "body": "edited" })), None)
    .await
    .unwrap();
  s.force_delete("comment", c2.clone()).await.unwrap();
  s.soft_delete("comment", c3.clone(), None).await.unwrap();
  let c4 = new_row(&s, "comment", json!({ "post_id": post_id, "body": "four" })).await;

  let (_, report) = s.rollback(revision.id, None).await.unwrap();
  let comments = &report.relations["comments"];
  assert_eq!(comments.pruned, 1);
  assert_eq!(comments.recreated, 1);
  assert_eq!(comments.updated, 2);

  let restored = rows(&s, "comments", Filter::new().eq("post_id", post_id).order_by("id")).await;
  let ids: Vec<_> = restored.iter().map(|r| r["id"].clone()).collect();
  assert_eq!(ids, vec![c1, c2, c3]);
  assert!(!ids.contains(&c4));

  let captured: Vec<_> =
    revision.metadata.relations["comments"].items.iter().map(|i| i.attributes.clone()).collect();
  assert_eq!(restored, captured);
}

#[tokio::test]
async fn rollback_is_idempotent() {
  let s = store_with(RevisionOptions {
    create_revision_when_rolling_back: false,
    ..relations(&["comments"])
  })
  .await;
  let post = new_post(&s, "X", 10).await;
  let post_id = id_of(&post);
  new_row(&s, "comment", json!({ "post_id": post_id, "body": "one" })).await;

  let outcome = s.snapshot("post", post_id.clone(), None).await.unwrap();
  let revision_id = outcome.revision().unwrap().id;
  s.update("post", post_id.clone(), attributes(json!({ "name": "Y" })), None).await.unwrap();
  new_row(&s, "comment", json!({ "post_id": post_id, "body": "two" })).await;

  let (first, _) = s.rollback(revision_id, None).await.unwrap();
  let after_first = rows(&s, "comments", Filter::new().order_by("id")).await;
  let (second, report) = s.rollback(revision_id, None).await.unwrap();
  let after_second = rows(&s, "comments", Filter::new().order_by("id")).await;

  assert_eq!(first, second);
  assert_eq!(after_first, after_second);
  assert_eq!(report.relations["comments"].pruned, 0);
}

#[tokio::test]
async fn rollback_recreates_single_child_without_pruning() {
  let s = store_with(relations(&["cover"])).await;
  let post = new_post(&s, "X", 10).await;
  let post_id = id_of(&post);
  let cover = new_row(&s, "cover", json!({ "post_id": post_id, "url": "a.png" })).await;

  let outcome = s.snapshot("post", post_id.clone(), None).await.unwrap();
  let revision_id = outcome.revision().unwrap().id;

  s.force_delete("cover", cover.clone()).await.unwrap();
  let replacement = new_row(&s, "cover", json!({ "post_id": post_id, "url": "b.png" })).await;
  assert_ne!(replacement, cover);

  let (_, report) = s.rollback(revision_id, None).await.unwrap();
  assert_eq!(report.relations["cover"].recreated, 1);
  assert_eq!(report.relations["cover"].pruned, 0);

  let covers = rows(&s, "covers", Filter::new().eq("post_id", post_id).order_by("id")).await;
  let ids: Vec<_> = covers.iter().map(|r| r["id"].clone()).collect();
  assert_eq!(ids, vec![cover, replacement]);
  assert_eq!(covers[0]["url"], "a.png");
}

#[tokio::test]
async fn rollback_reattaches_pivoted_relations() {
  let s = store_with(relations(&["tags"])).await;
  let post = new_post(&s, "X", 10).await;
  let post_id = id_of(&post);

  let mut tags = Vec::new();
  for (name, weight) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
    let tag = new_row(&s, "tag", json!({ "name": name })).await;
    let link = attributes(json!({ "post_id": post_id, "tag_id": tag, "weight": weight }));
    s.transaction(move |tx, _| tx.insert("post_tag", &link)).await.unwrap();
    tags.push(tag);
  }
  let [a, b, c, d] = <[Value; 4]>::try_from(tags).unwrap();

  let outcome = s.snapshot("post", post_id.clone(), None).await.unwrap();
  let revision_id = outcome.revision().unwrap().id;

  // Detach a, rename b, trash c, purge d.
  let detach = Filter::new().eq("post_id", post_id.clone()).eq("tag_id", a.clone());
  s.transaction(move |tx, _| tx.delete("post_tag", &detach)).await.unwrap();
  s.update("tag", b.clone(), attributes(json!({ "name": "b2" })), None).await.unwrap();
  s.soft_delete("tag", c.clone(), None).await.unwrap();
  s.force_delete("tag", d.clone()).await.unwrap();

  let (_, report) = s.rollback(revision_id, None).await.unwrap();
  let tags_report = &report.relations["tags"];
  assert_eq!(tags_report.recreated, 1);
  assert_eq!(tags_report.updated, 1);
  assert_eq!(tags_report.attached, 4);
  assert_eq!(tags_report.pruned, 0);

  let links = rows(&s, "post_tag", Filter::new().eq("post_id", post_id).order_by("tag_id")).await;
  let linked: Vec<_> = links.iter().map(|r| (r["tag_id"].clone(), r["weight"].clone())).collect();
  assert_eq!(
    linked,
    vec![(a, json!(1)), (b.clone(), json!(2)), (c.clone(), json!(3)), (d.clone(), json!(4))]
  );

  let b_row = s.find("tag", b, false).await.unwrap().unwrap();
  assert_eq!(b_row.get("name"), Some(&json!("b2")));
  assert!(s.find("tag", c, false).await.unwrap().is_some());
  let d_row = s.find("tag", d, false).await.unwrap().unwrap();
  assert_eq!(d_row.get("name"), Some(&json!("d")));
}

#[tokio::test]
async fn vetoed_pre_rollback_snapshot_still_rolls_back() {
  let revisor = Revisor::new(registry(), RevisionConfig::default())
    .before_snapshot(|req| req.cause != SnapshotCause::Rollback);
  let s = open(revisor).await;
  let post = new_post(&s, "X", 10).await;

  let (_, outcome) = s
    .update("post", id_of(&post), attributes(json!({ "name": "Y" })), None)
    .await
    .unwrap();
  let revision_id = outcome.revision().unwrap().id;

  let (record, report) = s.rollback(revision_id, None).await.unwrap();
  assert!(report.pre_rollback_revision.is_none());
  assert_eq!(record.get("name"), Some(&json!("X")));
  assert_eq!(revision_count(&s, &post).await, 1);

  let stored = s.find("post", id_of(&post), false).await.unwrap().unwrap();
  assert_eq!(stored.get("name"), Some(&json!("X")));
}

#[tokio::test]
async fn rollback_restores_blob_bytes() {
  let s = store().await;
  s.execute_batch("INSERT INTO assets (id, data) VALUES (1, X'0102')").await.unwrap();

  let outcome = s.snapshot("asset", 1, None).await.unwrap();
  let revision = outcome.revision().unwrap().clone();
  assert_eq!(revision.metadata.attributes["data"], json!({ "$blob": "AQI=" }));

  s.update("asset", 1, attributes(json!({ "data": { "$blob": "/w==" } })), None)
    .await
    .unwrap();
  s.rollback(revision.id, None).await.unwrap();

  let (kind, hex) = s
    .transaction(|tx, _| {
      Ok(tx.connection().query_row(
        "SELECT typeof(data), hex(data) FROM assets WHERE id = 1",
        [],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(kind, "blob");
  assert_eq!(hex, "0102");
}
