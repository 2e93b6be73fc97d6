//! End-to-end runs of the repair engine against the in-memory store.

mod common;

use common::*;
use seqwarden::{
    CacheKey, ConsistencyWarning, CursorRef, DiffusionKind, EngineConfig, EntityRef, EventFilter,
    GroupId, MemoryStore, RepairEvent, Seq, SubscriptionConfig, UserId,
};
use seqwarden::tiers::DEFAULT_CACHE_CAPACITY;
use std::sync::Arc;
use tempfile::TempDir;

// --- Retention ---

#[test]
fn test_retention_sets_min_to_first_retained_seq() {
    let store = store();
    let user = seed_user(&store, "alice", 5, 1);

    let report = engine(&store).scheduled_retention_run();

    let record = engine(&store).inspect_user(&user).unwrap();
    assert_eq!(record.cache_min_seq, Seq(6));
    assert_eq!(record.cache_max_seq, Seq(6));
    assert_eq!(store.user_message_seqs(&user), vec![Seq(6)]);
    assert_eq!(report.clamp_count(), 0);
    assert_eq!(report.failed_count(), 0);
}

#[test]
fn test_nothing_expired_leaves_user_untouched() {
    let store = store();
    let user = seed_user(&store, "bob", 0, 4);

    engine(&store).scheduled_retention_run();

    assert_eq!(store.user_message_seqs(&user).len(), 4);
    assert_eq!(store.deleted_message_count(), 0);
    assert_eq!(engine(&store).inspect_user(&user).unwrap().cache_min_seq, Seq(0));
}

#[test]
fn test_fully_expired_user_is_clamped_to_max() {
    let store = store();
    let user = seed_user(&store, "carol", 3, 0);

    let report = engine(&store).scheduled_retention_run();

    let record = engine(&store).inspect_user(&user).unwrap();
    assert_eq!(record.cache_min_seq, Seq(3));
    assert_eq!(record.cache_max_seq, Seq(3));
    assert!(store.user_message_seqs(&user).is_empty());
    assert_eq!(report.clamp_count(), 1);
}

#[test]
fn test_read_diffusion_group_retention() {
    let store = store();
    let group = seed_group(
        &store,
        "team",
        DiffusionKind::ReadDiffusion,
        &["a", "b"],
        3,
        2,
    );

    let report = engine(&store).scheduled_retention_run();

    assert_eq!(store.group_stored_messages(&group), 2);
    for member in ["a", "b"] {
        let cursor = engine(&store)
            .inspect_member(&group, &UserId::new(member))
            .unwrap();
        assert_eq!(cursor.min_seq, Seq(4));
    }
    assert_eq!(report.groups.as_ref().unwrap().attempted, 1);
}

#[test]
fn test_write_diffusion_group_retention() {
    let store = store();
    let group = seed_group(
        &store,
        "broadcast",
        DiffusionKind::WriteDiffusion,
        &["a", "b", "c"],
        4,
        1,
    );
    let config = EngineConfig {
        group_fanout_kind: DiffusionKind::WriteDiffusion,
        ..config()
    };

    engine_with(&store, config).scheduled_retention_run();

    // One surviving copy per member.
    assert_eq!(store.group_stored_messages(&group), 3);
    for member in ["a", "b", "c"] {
        let cursor = engine(&store)
            .inspect_member(&group, &UserId::new(member))
            .unwrap();
        assert_eq!(cursor.min_seq, Seq(5));
    }
}

#[test]
fn test_scheduled_run_only_sweeps_configured_fanout_kind() {
    let store = store();
    let shared = seed_group(&store, "shared", DiffusionKind::ReadDiffusion, &["a"], 2, 1);
    let copied = seed_group(&store, "copied", DiffusionKind::WriteDiffusion, &["a"], 2, 1);

    engine(&store).scheduled_retention_run();

    assert_eq!(store.group_stored_messages(&shared), 1);
    assert_eq!(store.group_stored_messages(&copied), 3);
}

#[test]
fn test_scheduled_run_is_idempotent() {
    let store = store();
    seed_user(&store, "alice", 5, 2);
    seed_user(&store, "bob", 3, 0);
    seed_user(&store, "carol", 0, 3);
    seed_group(&store, "team", DiffusionKind::ReadDiffusion, &["alice", "bob"], 4, 4);
    seed_group(&store, "empty", DiffusionKind::ReadDiffusion, &["carol"], 2, 0);

    let engine = engine(&store);
    engine.scheduled_retention_run();
    let after_first = store.snapshot();

    let second = engine.scheduled_retention_run();
    assert_eq!(store.snapshot(), after_first);
    assert_eq!(second.clamp_count(), 0);
}

// --- On-demand group repair ---

#[test]
fn test_on_demand_repair_clamps_member_without_deleting() {
    let store = store();
    let group = seed_group(&store, "g", DiffusionKind::ReadDiffusion, &["u"], 50, 0);
    let user = UserId::new("u");
    store.put_cache(CacheKey::MemberMinSeq(group.clone(), user.clone()), Seq(60));

    let engine = engine(&store);
    let events = engine.events().subscribe(SubscriptionConfig {
        filter: EventFilter::warnings(),
        ..Default::default()
    });

    let report = engine.on_demand_group_repair(&group).unwrap();

    assert_eq!(engine.inspect_member(&group, &user).unwrap().min_seq, Seq(50));
    assert_eq!(store.group_stored_messages(&group), 50);
    assert_eq!(store.deleted_message_count(), 0);

    let expected = ConsistencyWarning::Clamp {
        cursor: CursorRef::Member {
            group_id: group.clone(),
            user_id: user,
        },
        original_min: Seq(60),
        original_max: Seq(50),
    };
    assert_eq!(report.warnings().collect::<Vec<_>>(), vec![&expected]);

    let published: Vec<_> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            RepairEvent::Warning { warning, .. } => Some(warning),
            _ => None,
        })
        .collect();
    assert_eq!(published, vec![expected]);
}

#[test]
fn test_member_at_or_below_max_is_not_clamped() {
    let store = store();
    let group = seed_group(&store, "g", DiffusionKind::ReadDiffusion, &["u"], 0, 100);
    let user = UserId::new("u");
    store.put_cache(CacheKey::MemberMinSeq(group.clone(), user.clone()), Seq(50));

    let report = engine(&store).on_demand_group_repair(&group).unwrap();

    assert_eq!(report.clamp_count(), 0);
    assert_eq!(
        engine(&store).inspect_member(&group, &user).unwrap().min_seq,
        Seq(50)
    );
}

#[test]
fn test_member_clamp_uses_cache_max() {
    let store = store();
    let group = seed_group(&store, "g", DiffusionKind::ReadDiffusion, &["u"], 0, 80);
    let user = UserId::new("u");
    store.put_cache(CacheKey::GroupMaxSeq(group.clone()), Seq(70));
    store.put_cache(CacheKey::MemberMinSeq(group.clone(), user.clone()), Seq(75));

    engine(&store).on_demand_group_repair(&group).unwrap();

    assert_eq!(
        engine(&store).inspect_member(&group, &user).unwrap().min_seq,
        Seq(70)
    );
}

// --- Drift ---

#[test]
fn test_drift_beyond_threshold_is_reported() {
    let store = store();
    let drifted = seed_group(&store, "drifted", DiffusionKind::ReadDiffusion, &[], 0, 120);
    store.put_cache(CacheKey::GroupMaxSeq(drifted.clone()), Seq(100));
    let close = seed_group(&store, "close", DiffusionKind::ReadDiffusion, &[], 0, 105);
    store.put_cache(CacheKey::GroupMaxSeq(close.clone()), Seq(100));

    let engine = engine(&store);
    let report = engine.on_demand_group_repair(&drifted).unwrap();
    assert_eq!(
        report.warnings().collect::<Vec<_>>(),
        vec![&ConsistencyWarning::Drift {
            entity: EntityRef::Group(drifted),
            cache_max: Seq(100),
            durable_max: Seq(120),
        }]
    );

    let report = engine.on_demand_group_repair(&close).unwrap();
    assert_eq!(report.drift_count(), 0);
}

#[test]
fn test_drift_is_reported_not_corrected() {
    let store = store();
    let user = seed_user(&store, "alice", 0, 30);
    store.put_cache(CacheKey::UserMaxSeq(user.clone()), Seq(5));

    let engine = engine(&store);
    let report = engine.scheduled_retention_run();

    assert_eq!(report.drift_count(), 1);
    let record = engine.inspect_user(&user).unwrap();
    assert_eq!(record.cache_max_seq, Seq(5));
    assert_eq!(record.durable_max_seq, Seq(30));
}

#[test]
fn test_custom_drift_threshold() {
    let store = store();
    let group = seed_group(&store, "g", DiffusionKind::ReadDiffusion, &[], 0, 105);
    store.put_cache(CacheKey::GroupMaxSeq(group.clone()), Seq(100));
    let config = EngineConfig {
        drift_warn_threshold: 2,
        ..config()
    };

    let report = engine_with(&store, config)
        .on_demand_group_repair(&group)
        .unwrap();
    assert_eq!(report.drift_count(), 1);
}

// --- Full sweep ---

#[test]
fn test_full_sweep_clamps_without_deleting() {
    let store = store();
    let user = seed_user(&store, "alice", 10, 0);
    store.put_cache(CacheKey::UserMinSeq(user.clone()), Seq(15));
    let group = seed_group(&store, "g", DiffusionKind::WriteDiffusion, &["m"], 20, 0);
    let member = UserId::new("m");
    store.put_cache(CacheKey::MemberMinSeq(group.clone(), member.clone()), Seq(25));

    let engine = engine(&store);
    let report = engine.full_sweep_repair().unwrap();

    assert_eq!(engine.inspect_user(&user).unwrap().cache_min_seq, Seq(10));
    assert_eq!(engine.inspect_member(&group, &member).unwrap().min_seq, Seq(20));
    assert_eq!(store.deleted_message_count(), 0);
    assert_eq!(store.user_message_seqs(&user).len(), 10);
    assert_eq!(report.clamp_count(), 2);
    assert!(!report.cancelled);
}

#[test]
fn test_full_sweep_reads_missing_min_as_zero() {
    let store = store();
    let user = seed_user(&store, "alice", 0, 3);
    let group = seed_group(&store, "g", DiffusionKind::ReadDiffusion, &["m"], 0, 3);

    let engine = engine(&store);
    let report = engine.full_sweep_repair().unwrap();

    assert_eq!(report.failed_count(), 0);
    assert_eq!(report.clamp_count(), 0);
    assert_eq!(engine.inspect_user(&user).unwrap().cache_min_seq, Seq(0));
    assert_eq!(
        engine
            .inspect_member(&group, &UserId::new("m"))
            .unwrap()
            .min_seq,
        Seq(0)
    );
}

// --- Events and reports ---

#[test]
fn test_run_lifecycle_events() {
    let store = store();
    seed_user(&store, "alice", 1, 1);
    let engine = engine(&store);
    let events = engine.events().subscribe(SubscriptionConfig {
        filter: EventFilter::lifecycle(),
        ..Default::default()
    });

    let report = engine.scheduled_retention_run();

    let received = events.drain();
    assert_eq!(received.len(), 2);
    match &received[0] {
        RepairEvent::RunStarted { run_id, mode } => {
            assert_eq!(run_id, &report.run_id);
            assert_eq!(mode, "scheduled_retention");
        }
        other => panic!("Expected RunStarted, got {:?}", other),
    }
    match &received[1] {
        RepairEvent::RunFinished { summary } => assert_eq!(summary, &report.summary()),
        other => panic!("Expected RunFinished, got {:?}", other),
    }
}

#[test]
fn test_summary_serializes() {
    let store = store();
    seed_user(&store, "alice", 2, 0);
    let report = engine(&store).scheduled_retention_run();

    let json = serde_json::to_value(report.summary()).unwrap();
    assert_eq!(json["mode"], "scheduled_retention");
    assert_eq!(json["users_attempted"], 1);
    assert_eq!(json["clamps"], 1);
}

// --- Persistence and configuration ---

#[test]
fn test_restored_store_repairs_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.sqd");

    let store = store();
    let user = seed_user(&store, "alice", 5, 1);
    seed_group(&store, "g", DiffusionKind::ReadDiffusion, &["alice"], 3, 3);
    store.persist_durable(&path).unwrap();

    let restored = Arc::new(MemoryStore::restore_durable(&path, DEFAULT_CACHE_CAPACITY).unwrap());
    restored.warm_cache();

    let report = engine(&restored).scheduled_retention_run();
    assert_eq!(report.failed_count(), 0);
    assert_eq!(
        engine(&restored).inspect_user(&user).unwrap().cache_min_seq,
        Seq(6)
    );
    assert_eq!(
        engine(&restored)
            .inspect_member(&GroupId::new("g"), &user)
            .unwrap()
            .min_seq,
        Seq(4)
    );
}

#[test]
fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seqwarden.json");
    std::fs::write(
        &path,
        r#"{ "retain_days": 7, "drift_warn_threshold": 3, "workers": 2 }"#,
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.workers, 2);

    let store = store();
    let user = seed_user(&store, "alice", 2, 2);
    engine_with(&store, config).scheduled_retention_run();
    assert_eq!(store.user_message_seqs(&user), vec![Seq(3), Seq(4)]);
}
