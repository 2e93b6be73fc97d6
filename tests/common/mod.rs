#![allow(dead_code)]
//! Shared integration test fixtures.

use seqwarden::{
    DiffusionKind, EngineConfig, GroupId, MemoryStore, RepairEngine, Timestamp, UserId,
};
use proptest::prelude::ProptestConfig;
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

pub const DAY: Duration = Duration::from_secs(86_400);

/// Retention window used by every fixture engine.
pub const RETAIN_DAYS: u64 = 7;

/// Route `tracing` output through the test harness. First call wins.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Property test config with a fixed case count.
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

pub fn days_ago(days: u32) -> Timestamp {
    Timestamp::now().saturating_sub(DAY * days)
}

/// Outside the fixture retention window.
pub fn expired() -> Timestamp {
    days_ago(20)
}

/// Inside the fixture retention window.
pub fn fresh() -> Timestamp {
    days_ago(1)
}

pub fn config() -> EngineConfig {
    EngineConfig {
        retain_days: RETAIN_DAYS,
        ..EngineConfig::default()
    }
}

pub fn store() -> Arc<MemoryStore> {
    init_test_logging();
    Arc::new(MemoryStore::new())
}

pub fn engine(store: &Arc<MemoryStore>) -> RepairEngine<MemoryStore, MemoryStore> {
    engine_with(store, config())
}

pub fn engine_with(
    store: &Arc<MemoryStore>,
    config: EngineConfig,
) -> RepairEngine<MemoryStore, MemoryStore> {
    RepairEngine::from_shared(Arc::clone(store), config).unwrap()
}

/// A user with `old` expired messages followed by `recent` retained ones.
pub fn seed_user(store: &MemoryStore, name: &str, old: usize, recent: usize) -> UserId {
    let user = UserId::new(name);
    store.add_user(&user);
    for _ in 0..old {
        store.append_user_message(&user, expired());
    }
    for _ in 0..recent {
        store.append_user_message(&user, fresh());
    }
    user
}

/// A group with the given members, `old` expired and `recent` retained messages.
pub fn seed_group(
    store: &MemoryStore,
    name: &str,
    kind: DiffusionKind,
    members: &[&str],
    old: usize,
    recent: usize,
) -> GroupId {
    let group = GroupId::new(name);
    store.add_group(&group, kind);
    for member in members {
        store.add_member(&group, &UserId::new(*member)).unwrap();
    }
    for _ in 0..old {
        store.append_group_message(&group, expired()).unwrap();
    }
    for _ in 0..recent {
        store.append_group_message(&group, fresh()).unwrap();
    }
    group
}
