use std::sync::Arc;

use serde_json::json;

use forum_migrate::migrate::{categories, posts, reconcile, topics, users};
use forum_migrate::test_support::{MemoryStore, fields};
use forum_migrate::{
    ImportDataset, ImportState, MigrateEvent, Migrator, RunConfig, RunContext, SkipReason,
    TargetStore,
};

fn drain(rx: &mut tokio::sync::broadcast::Receiver<MigrateEvent>) -> Vec<MigrateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn sample_dataset() -> ImportDataset {
    let mut data = ImportDataset::new();

    data.add_category(
        "c1",
        fields(json!({"_name": "General", "_description": "talk about anything"})),
    );
    data.add_category("c2", fields(json!({"_name": "Broken"})));

    data.add_user(
        "u1",
        fields(json!({
            "_username": "alice",
            "_email": "alice@example.com",
            "_signature": "x".repeat(300),
            "_banned": 1,
            "_reputation": 10,
            "_timestamp": 1000
        })),
    );
    data.add_user("u2", fields(json!({"_username": "@@@"})));
    data.add_user(
        "u3",
        fields(json!({"_username": "mona", "_level": "Moderator", "_email": "mona@example.com"})),
    );
    data.add_user(
        "u4",
        fields(json!({"_username": "arthur", "_level": "administrator"})),
    );

    data.add_topic(
        "t1",
        fields(json!({
            "_cid": "c1",
            "_uid": "u1",
            "_title": "welcome",
            "_content": "first!",
            "_timestamp": 2000,
            "_locked": 1
        })),
    );
    data.add_topic(
        "t2",
        fields(json!({"_cid": "c2", "_uid": "u1", "_title": "lost", "_content": "never lands"})),
    );
    data.add_topic(
        "t3",
        fields(json!({"_cid": "missing", "_uid": "u3", "_title": "orphan", "_content": "?"})),
    );

    data.add_post(
        "p1",
        fields(json!({
            "_tid": "t1", "_uid": "u3", "_content": "reply one",
            "_timestamp": 3000, "_reply_to": 102
        })),
    );
    data.add_post(
        "p2",
        fields(json!({
            "_tid": "t1", "_uid": "u1", "_content": "reply two",
            "_timestamp": 4000, "_reply_to": 101
        })),
    );
    data.add_post(
        "p3",
        fields(json!({"_tid": "t2", "_uid": "u1", "_content": "into the void"})),
    );

    data
}

fn config_with_seed() -> RunConfig {
    RunConfig {
        random_seed: Some(42),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn full_run_imports_dependent_entities_and_skips_broken_ones() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.seed_config(fields(json!({"min_post_length": 8, "site_title": "prod"})));
    store.seed_users(3);
    store.seed_categories(2);
    store.reject_category_named("Broken");

    let migrator = Migrator::new(
        sample_dataset(),
        config_with_seed(),
        store.clone(),
        dir.path().join("backup.json"),
    );
    let mut rx = migrator.subscribe();
    migrator.run().await.unwrap();

    let ctx = migrator.context();

    // pre-existing content was flushed, only account 1 survived
    assert!(store.live_user_ids().iter().all(|uid| *uid == 1 || *uid > 4));

    // category c1 imported with provenance, c2 skipped
    let c1 = ctx.data.categories.get("c1").unwrap();
    let cid = c1.imported_id().expect("c1 imported");
    assert_eq!(c1.str_field("_imported_cid"), Some("c1"));
    let stored = store.object(&format!("category:{}", cid)).unwrap();
    assert_eq!(stored["_imported_name"], json!("General"));
    drop(c1);

    let c2 = ctx.data.categories.get("c2").unwrap();
    assert!(matches!(
        c2.state(),
        ImportState::Skipped { reason: SkipReason::CreationFailed(_) }
    ));
    assert!(c2.field("_imported_cid").is_none());
    drop(c2);

    // users: alice imported with profile fields, bad username skipped
    let alice = ctx.data.users.get("u1").unwrap();
    let alice_uid = alice.imported_id().expect("alice imported");
    drop(alice);
    let alice_obj = store.object(&format!("user:{}", alice_uid)).unwrap();
    assert_eq!(alice_obj["banned"], json!(1));
    assert_eq!(alice_obj["status"], json!("offline"));
    assert_eq!(alice_obj["signature"].as_str().unwrap().chars().count(), 252);
    assert_eq!(alice_obj["_imported_uid"], json!("u1"));
    assert_eq!(
        store.object_field("email:confirmed", "alice@example.com"),
        Some(json!("1"))
    );

    let bad = ctx.data.users.get("u2").unwrap();
    assert_eq!(
        bad.state(),
        &ImportState::Skipped { reason: SkipReason::InvalidUsername }
    );
    drop(bad);

    // role grants
    let mona_uid = ctx.data.users.get("u3").unwrap().imported_id().unwrap();
    assert_eq!(
        store.group_members(&format!("category:{}:moderators", cid)),
        vec![mona_uid]
    );
    let arthur_uid = ctx.data.users.get("u4").unwrap().imported_id().unwrap();
    assert_eq!(store.group_members("administrators"), vec![arthur_uid]);

    // topic t1 imported; t2 gated out by its broken category; t3 orphan
    let t1 = ctx.data.topics.get("t1").unwrap();
    let tid = t1.imported_id().expect("t1 imported");
    assert_eq!(t1.str_field("_imported_tid"), Some("t1"));
    drop(t1);
    for skipped in ["t2", "t3"] {
        let topic = ctx.data.topics.get(skipped).unwrap();
        assert!(
            matches!(topic.state(), ImportState::Skipped { reason: SkipReason::MissingParent { .. } }),
            "{} should be gated out",
            skipped
        );
    }
    // nothing for t2/t3 ever reached the target: only t1 exists there
    assert!(store.object(&format!("topic:{}", tid)).is_some());
    assert_eq!(store.object_field(&format!("topic:{}", tid), "_imported_tid"), Some(json!("t1")));

    // the deferred lock was re-applied by reconciliation
    assert_eq!(
        store.object_field(&format!("topic:{}", tid), "locked"),
        Some(json!(1))
    );

    // both mutually-referencing replies were accepted best-effort
    for (id, reply_to) in [("p1", 102), ("p2", 101)] {
        let post = ctx.data.posts.get(id).unwrap();
        let pid = post.imported_id().expect("reply imported");
        drop(post);
        assert_eq!(
            store.object_field(&format!("post:{}", pid), "toPid"),
            Some(json!(reply_to))
        );
    }
    let void_post = ctx.data.posts.get("p3").unwrap();
    assert!(matches!(
        void_post.state(),
        ImportState::Skipped { reason: SkipReason::MissingParent { .. } }
    ));
    drop(void_post);

    // config swap round-tripped and the run completed
    assert_eq!(
        store.config(),
        fields(json!({"min_post_length": 8, "site_title": "prod"}))
    );
    assert!(!dir.path().join("backup.json").exists());

    let events = drain(&mut rx);
    assert!(events.contains(&MigrateEvent::Complete));
    assert!(events.iter().any(|e| matches!(e, MigrateEvent::Warn { .. })));
}

#[tokio::test]
async fn admin_takeover_remaps_the_legacy_admin_onto_account_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());

    let mut data = ImportDataset::new();
    data.add_category("c1", fields(json!({"_name": "General"})));
    data.add_user("7", fields(json!({"_username": "root", "_level": "administrator", "_uid": 7})));
    data.add_topic(
        "t1",
        fields(json!({"_cid": "c1", "_uid": "7", "_title": "announcement", "_content": "hi"})),
    );

    let mut config = config_with_seed();
    config.admin_take_ownership.enable = true;
    config.admin_take_ownership.username = "root".to_string();

    let migrator = Migrator::new(data, config, store.clone(), dir.path().join("backup.json"));
    migrator.run().await.unwrap();

    let ctx = migrator.context();
    // no new account was created: only the target's own account 1 exists
    assert_eq!(store.live_user_ids(), vec![1]);
    assert_eq!(ctx.data.users.get("7").unwrap().imported_id(), Some(1));
    assert_eq!(ctx.config().takeover_source().as_deref(), Some("7"));

    // the topic authored by the legacy admin resolved to account 1
    let tid = ctx.data.topics.get("t1").unwrap().imported_id().unwrap();
    assert_eq!(
        store.object_field(&format!("topic:{}", tid), "uid"),
        Some(json!(1))
    );
}

#[tokio::test]
async fn pinned_topics_sort_first_after_the_topic_phase() {
    let mut data = ImportDataset::new();
    data.add_category("c1", fields(json!({"_name": "General"})));
    // the pinned topic is the oldest by far
    data.add_topic(
        "t_pinned",
        fields(json!({"_cid": "c1", "_title": "rules", "_content": "read me", "_timestamp": 100, "_pinned": 1})),
    );
    data.add_topic(
        "t_new",
        fields(json!({"_cid": "c1", "_title": "latest", "_content": "fresh", "_timestamp": 90000})),
    );
    data.add_topic(
        "t_mid",
        fields(json!({"_cid": "c1", "_title": "middle", "_content": "meh", "_timestamp": 50000})),
    );

    let ctx = Arc::new(RunContext::new(data, config_with_seed()));
    let store = Arc::new(MemoryStore::new());
    let target: Arc<dyn TargetStore> = store.clone();

    categories::import_categories(&ctx, &target).await.unwrap();
    topics::import_topics(&ctx, &target).await.unwrap();

    let cid = ctx.data.categories.get("c1").unwrap().imported_id().unwrap();
    let pinned_tid = ctx.data.topics.get("t_pinned").unwrap().imported_id().unwrap();

    let ordering = store.sorted_set_desc(&format!("category:{}:topics", cid));
    assert_eq!(ordering.len(), 3);
    assert_eq!(ordering[0].0, pinned_tid.to_string());
    assert!(ordering[0].1 > 9.0e15, "pinned topics use the sentinel key");
    // the rest are keyed by timestamp
    assert!(ordering[1].1 >= ordering[2].1);
}

#[tokio::test]
async fn timestamp_fix_is_idempotent() {
    let mut data = ImportDataset::new();
    data.add_category("c1", fields(json!({"_name": "General"})));
    data.add_user("u1", fields(json!({"_username": "alice"})));
    data.add_topic(
        "t1",
        fields(json!({"_cid": "c1", "_uid": "u1", "_title": "a", "_content": "a", "_timestamp": 1000})),
    );
    data.add_topic(
        "t2",
        fields(json!({"_cid": "c1", "_uid": "u1", "_title": "b", "_content": "b", "_timestamp": 2000})),
    );
    data.add_post(
        "p1",
        fields(json!({"_tid": "t1", "_uid": "u1", "_content": "late reply", "_timestamp": 9000})),
    );

    let ctx = Arc::new(RunContext::new(data, config_with_seed()));
    let store = Arc::new(MemoryStore::new());
    let target: Arc<dyn TargetStore> = store.clone();

    categories::import_categories(&ctx, &target).await.unwrap();
    users::import_users(&ctx, &target).await.unwrap();
    topics::import_topics(&ctx, &target).await.unwrap();
    posts::import_posts(&ctx, &target).await.unwrap();

    let cid = ctx.data.categories.get("c1").unwrap().imported_id().unwrap();
    let key = format!("category:{}:topics", cid);

    reconcile::fix_topic_timestamps(&ctx, &target).await.unwrap();
    let first = store.sorted_set_desc(&key);

    reconcile::fix_topic_timestamps(&ctx, &target).await.unwrap();
    let second = store.sorted_set_desc(&key);

    assert_eq!(first, second);
}
