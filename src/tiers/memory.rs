//! In-memory two-tier sequence store.
//!
//! The cache tier is a bounded LRU of sequence keys and may lose entries;
//! a lost key reads as `NotFound`. The durable tier holds the append-only
//! message logs and group membership, and can be persisted to a snapshot
//! file. Ingestion is simulated through the `append_*` methods.

use super::{PopulationEnumerator, SequenceStore};
use crate::context::RunContext;
use crate::error::{Population, StoreError, StoreResult, Tier};
use crate::types::{
    DiffusionKind, GroupId, GroupSeqRange, Seq, Timestamp, UserId, UserSeqRange,
};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Magic bytes for durable snapshot files.
const DURABLE_SNAPSHOT_MAGIC: &[u8; 4] = b"SQD\0";

/// Current durable snapshot format version.
const DURABLE_SNAPSHOT_VERSION: u8 = 1;

/// Magic, version byte and body length.
const DURABLE_SNAPSHOT_HEADER_LEN: u64 = 13;

/// Default number of sequence keys the cache tier holds.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// A key in the cache tier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    UserMinSeq(UserId),
    UserMaxSeq(UserId),
    GroupMaxSeq(GroupId),
    MemberMinSeq(GroupId, UserId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StoredMessage {
    seq: Seq,
    sent_at: Timestamp,
}

/// Result of expiring part of a log.
#[derive(Clone, Copy, Debug)]
struct Expiry {
    /// First seq still retrievable; `max + 1` when the log was emptied.
    low_water: Seq,
    removed: usize,
}

/// Ordered message log. `max` never decreases, even when messages expire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MessageLog {
    messages: VecDeque<StoredMessage>,
    max: Seq,
}

impl MessageLog {
    fn starting_after(max: Seq) -> Self {
        Self {
            messages: VecDeque::new(),
            max,
        }
    }

    fn append(&mut self, sent_at: Timestamp) -> Seq {
        let seq = self.max.next();
        self.append_at(seq, sent_at);
        seq
    }

    fn append_at(&mut self, seq: Seq, sent_at: Timestamp) {
        self.messages.push_back(StoredMessage { seq, sent_at });
        self.max = self.max.max(seq);
    }

    fn first_seq(&self) -> Option<Seq> {
        self.messages.front().map(|m| m.seq)
    }

    fn seqs(&self) -> Vec<Seq> {
        self.messages.iter().map(|m| m.seq).collect()
    }

    fn delete_expired(&mut self, cutoff: Timestamp) -> Option<Expiry> {
        let before = self.messages.len();
        self.messages.retain(|m| m.sent_at >= cutoff);
        let removed = before - self.messages.len();
        if removed == 0 {
            return None;
        }
        Some(Expiry {
            low_water: self.first_seq().unwrap_or_else(|| self.max.next()),
            removed,
        })
    }
}

/// Write-diffusion storage: every member owns a physical copy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PerMemberLogs {
    copies: BTreeMap<UserId, MessageLog>,
    max: Seq,
}

impl PerMemberLogs {
    fn add_member(&mut self, user: UserId) {
        let max = self.max;
        self.copies
            .entry(user)
            .or_insert_with(|| MessageLog::starting_after(max));
    }

    fn append(&mut self, sent_at: Timestamp) -> Seq {
        let seq = self.max.next();
        for copy in self.copies.values_mut() {
            copy.append_at(seq, sent_at);
        }
        self.max = seq;
        seq
    }

    /// Expire the copies of the listed members only.
    fn delete_expired_copies(
        &mut self,
        members: &[UserId],
        cutoff: Timestamp,
    ) -> Vec<(UserId, Expiry)> {
        members
            .iter()
            .filter_map(|user| {
                let copy = self.copies.get_mut(user)?;
                copy.delete_expired(cutoff).map(|e| (user.clone(), e))
            })
            .collect()
    }

    fn first_seq(&self) -> Option<Seq> {
        self.copies.values().filter_map(MessageLog::first_seq).min()
    }

    fn stored_messages(&self) -> usize {
        self.copies.values().map(|c| c.messages.len()).sum()
    }
}

/// Read-diffusion storage: one shared log, members only hold cursors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SharedLog {
    log: MessageLog,
}

impl SharedLog {
    fn append(&mut self, sent_at: Timestamp) -> Seq {
        self.log.append(sent_at)
    }

    fn delete_expired_shared(&mut self, cutoff: Timestamp) -> Option<Expiry> {
        self.log.delete_expired(cutoff)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum GroupLog {
    WriteDiffusion(PerMemberLogs),
    ReadDiffusion(SharedLog),
}

impl GroupLog {
    fn new(kind: DiffusionKind) -> Self {
        match kind {
            DiffusionKind::WriteDiffusion => GroupLog::WriteDiffusion(PerMemberLogs::default()),
            DiffusionKind::ReadDiffusion => GroupLog::ReadDiffusion(SharedLog::default()),
        }
    }

    fn kind(&self) -> DiffusionKind {
        match self {
            GroupLog::WriteDiffusion(_) => DiffusionKind::WriteDiffusion,
            GroupLog::ReadDiffusion(_) => DiffusionKind::ReadDiffusion,
        }
    }

    fn max(&self) -> Seq {
        match self {
            GroupLog::WriteDiffusion(copies) => copies.max,
            GroupLog::ReadDiffusion(shared) => shared.log.max,
        }
    }

    fn first_seq(&self) -> Option<Seq> {
        match self {
            GroupLog::WriteDiffusion(copies) => copies.first_seq(),
            GroupLog::ReadDiffusion(shared) => shared.log.first_seq(),
        }
    }

    fn stored_messages(&self) -> usize {
        match self {
            GroupLog::WriteDiffusion(copies) => copies.stored_messages(),
            GroupLog::ReadDiffusion(shared) => shared.log.messages.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct GroupEntry {
    members: BTreeSet<UserId>,
    log: GroupLog,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct DurableTier {
    users: BTreeMap<UserId, MessageLog>,
    groups: BTreeMap<GroupId, GroupEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    users: HashSet<UserId>,
    user_deletes: HashSet<UserId>,
    groups: HashSet<GroupId>,
    member_listing: HashSet<GroupId>,
    populations: HashSet<Population>,
}

/// Point-in-time copy of both tiers, for comparing store state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    durable: DurableTier,
    cache: Vec<(CacheKey, Seq)>,
}

impl StoreSnapshot {
    /// Cached value for `key` at snapshot time.
    pub fn cached(&self, key: &CacheKey) -> Option<Seq> {
        self.cache
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.cache[i].1)
    }
}

/// Two-tier store held in process memory.
pub struct MemoryStore {
    durable: RwLock<DurableTier>,
    cache: Mutex<LruCache<CacheKey, Seq>>,
    faults: RwLock<Faults>,
    mutations: AtomicU64,
    deleted: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// A store whose cache tier evicts beyond `capacity` keys.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self::from_durable(DurableTier::default(), capacity)
    }

    fn from_durable(durable: DurableTier, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            durable: RwLock::new(durable),
            cache: Mutex::new(LruCache::new(capacity)),
            faults: RwLock::new(Faults::default()),
            mutations: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
        }
    }

    // --- Ingestion simulation ---

    /// Register a user with no history.
    pub fn add_user(&self, user: &UserId) {
        self.durable.write().users.entry(user.clone()).or_default();
    }

    /// Append a message for a user, advancing both tiers' max-seq.
    pub fn append_user_message(&self, user: &UserId, sent_at: Timestamp) -> Seq {
        let seq = self
            .durable
            .write()
            .users
            .entry(user.clone())
            .or_default()
            .append(sent_at);
        self.cache.lock().put(CacheKey::UserMaxSeq(user.clone()), seq);
        seq
    }

    pub fn add_group(&self, group: &GroupId, kind: DiffusionKind) {
        self.durable
            .write()
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupEntry {
                members: BTreeSet::new(),
                log: GroupLog::new(kind),
            });
    }

    pub fn add_member(&self, group: &GroupId, user: &UserId) -> StoreResult<()> {
        let mut durable = self.durable.write();
        let entry = durable
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::not_found(format!("group:{group}")))?;
        entry.members.insert(user.clone());
        if let GroupLog::WriteDiffusion(copies) = &mut entry.log {
            copies.add_member(user.clone());
        }
        Ok(())
    }

    /// Append a message to a group, advancing both tiers' max-seq.
    pub fn append_group_message(&self, group: &GroupId, sent_at: Timestamp) -> StoreResult<Seq> {
        let seq = {
            let mut durable = self.durable.write();
            let entry = durable
                .groups
                .get_mut(group)
                .ok_or_else(|| StoreError::not_found(format!("group:{group}")))?;
            match &mut entry.log {
                GroupLog::WriteDiffusion(copies) => copies.append(sent_at),
                GroupLog::ReadDiffusion(shared) => shared.append(sent_at),
            }
        };
        self.cache.lock().put(CacheKey::GroupMaxSeq(group.clone()), seq);
        Ok(seq)
    }

    /// Overwrite a cache-tier value directly, bypassing the durable tier.
    pub fn put_cache(&self, key: CacheKey, seq: Seq) {
        self.cache.lock().put(key, seq);
    }

    /// Drop a cache-tier value, as a lossy cache would.
    pub fn evict_cache(&self, key: &CacheKey) {
        self.cache.lock().pop(key);
    }

    /// Reload max-seq keys from the durable tier, e.g. after a restart.
    pub fn warm_cache(&self) {
        let durable = self.durable.read();
        let mut cache = self.cache.lock();
        for (user, log) in &durable.users {
            cache.put(CacheKey::UserMaxSeq(user.clone()), log.max);
        }
        for (group, entry) in &durable.groups {
            cache.put(CacheKey::GroupMaxSeq(group.clone()), entry.log.max());
        }
    }

    // --- Fault injection ---

    /// Make every call touching `user` fail.
    pub fn fail_user(&self, user: &UserId) {
        self.faults.write().users.insert(user.clone());
    }

    /// Make only retention deletes for `user` fail.
    pub fn fail_user_deletes(&self, user: &UserId) {
        self.faults.write().user_deletes.insert(user.clone());
    }

    /// Make every sequence call touching `group` fail.
    pub fn fail_group(&self, group: &GroupId) {
        self.faults.write().groups.insert(group.clone());
    }

    /// Make member listing fail for one group.
    pub fn fail_member_listing(&self, group: &GroupId) {
        self.faults.write().member_listing.insert(group.clone());
    }

    /// Make listing a whole population fail.
    pub fn fail_population(&self, population: Population) {
        self.faults.write().populations.insert(population);
    }

    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }

    // --- Introspection ---

    /// Number of write calls (deletes and min-seq sets) received.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Total messages removed by retention so far.
    pub fn deleted_message_count(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Seqs still stored for a user.
    pub fn user_message_seqs(&self, user: &UserId) -> Vec<Seq> {
        self.durable
            .read()
            .users
            .get(user)
            .map(MessageLog::seqs)
            .unwrap_or_default()
    }

    /// Messages still stored for a group, counting every physical copy.
    pub fn group_stored_messages(&self, group: &GroupId) -> usize {
        self.durable
            .read()
            .groups
            .get(group)
            .map(|g| g.log.stored_messages())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let durable = self.durable.read().clone();
        let mut cache: Vec<(CacheKey, Seq)> = self
            .cache
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        cache.sort_by(|a, b| a.0.cmp(&b.0));
        StoreSnapshot { durable, cache }
    }

    // --- Durable snapshot persistence ---

    /// Write the durable tier to `path`.
    pub fn persist_durable(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        file.write_all(DURABLE_SNAPSHOT_MAGIC)?;
        file.write_all(&[DURABLE_SNAPSHOT_VERSION])?;

        let encoded = rmp_serde::to_vec(&*self.durable.read())?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;

        file.sync_all()?;
        Ok(())
    }

    /// Rebuild a store from a durable snapshot. The cache tier starts empty.
    pub fn restore_durable(path: impl AsRef<Path>, cache_capacity: usize) -> StoreResult<Self> {
        let mut file = File::open(path.as_ref())?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != DURABLE_SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat(
                "Invalid durable snapshot magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != DURABLE_SNAPSHOT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported durable snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let body_len = file
            .metadata()?
            .len()
            .saturating_sub(DURABLE_SNAPSHOT_HEADER_LEN);
        if len > body_len {
            return Err(StoreError::InvalidFormat(format!(
                "Durable snapshot body length {len} exceeds the {body_len} bytes in the file"
            )));
        }

        let mut encoded = Vec::new();
        file.take(len).read_to_end(&mut encoded)?;
        let durable: DurableTier = rmp_serde::from_slice(&encoded)?;

        Ok(Self::from_durable(durable, cache_capacity))
    }

    // --- Internal helpers ---

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_user(&self, user: &UserId) -> StoreResult<()> {
        if self.faults.read().users.contains(user) {
            return Err(StoreError::unavailable(
                Tier::Durable,
                format!("user {user} unreachable"),
            ));
        }
        Ok(())
    }

    fn check_group(&self, group: &GroupId) -> StoreResult<()> {
        if self.faults.read().groups.contains(group) {
            return Err(StoreError::unavailable(
                Tier::Durable,
                format!("group {group} unreachable"),
            ));
        }
        Ok(())
    }

    fn check_population(&self, population: Population) -> StoreResult<()> {
        if self.faults.read().populations.contains(&population) {
            return Err(StoreError::unavailable(
                Tier::Durable,
                format!("listing {population} failed"),
            ));
        }
        Ok(())
    }

    fn cached(&self, key: &CacheKey) -> Option<Seq> {
        self.cache.lock().get(key).copied()
    }

    fn cached_or_not_found(&self, key: CacheKey) -> StoreResult<Seq> {
        self.cached(&key)
            .ok_or_else(|| StoreError::not_found(format!("{key:?}")))
    }

    /// Move a min-seq key forward to `low_water`; never moves it back.
    fn advance(cache: &mut LruCache<CacheKey, Seq>, key: CacheKey, low_water: Seq) {
        let current = cache.get(&key).copied().unwrap_or_default();
        if low_water > current {
            cache.put(key, low_water);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceStore for MemoryStore {
    fn delete_expired_and_advance_min_seq(
        &self,
        ctx: &RunContext,
        user: &UserId,
        window: Duration,
    ) -> StoreResult<()> {
        self.check_user(user)?;
        if self.faults.read().user_deletes.contains(user) {
            return Err(StoreError::unavailable(
                Tier::Durable,
                format!("deleting messages of {user} failed"),
            ));
        }
        self.record_mutation();

        let cutoff = Timestamp::retention_cutoff(window);
        let mut durable = self.durable.write();
        let Some(expiry) = durable
            .users
            .get_mut(user)
            .and_then(|log| log.delete_expired(cutoff))
        else {
            return Ok(());
        };

        Self::advance(
            &mut self.cache.lock(),
            CacheKey::UserMinSeq(user.clone()),
            expiry.low_water,
        );
        self.deleted
            .fetch_add(expiry.removed as u64, Ordering::SeqCst);

        tracing::debug!(
            target: "seqwarden::tiers::memory",
            correlation_id = ctx.run_id(),
            user_id = %user,
            removed = expiry.removed,
            low_water = expiry.low_water.0,
            "expired user messages deleted"
        );
        Ok(())
    }

    fn delete_expired_group_msgs_and_advance_min_seq(
        &self,
        ctx: &RunContext,
        group: &GroupId,
        members: &[UserId],
        window: Duration,
    ) -> StoreResult<()> {
        self.check_group(group)?;
        self.record_mutation();

        let cutoff = Timestamp::retention_cutoff(window);
        let mut durable = self.durable.write();
        let Some(entry) = durable.groups.get_mut(group) else {
            return Ok(());
        };

        let mut cache = self.cache.lock();
        let removed = match &mut entry.log {
            GroupLog::WriteDiffusion(copies) => {
                let mut removed = 0;
                for (user, expiry) in copies.delete_expired_copies(members, cutoff) {
                    removed += expiry.removed;
                    Self::advance(
                        &mut cache,
                        CacheKey::MemberMinSeq(group.clone(), user),
                        expiry.low_water,
                    );
                }
                removed
            }
            GroupLog::ReadDiffusion(shared) => match shared.delete_expired_shared(cutoff) {
                Some(expiry) => {
                    for user in members {
                        Self::advance(
                            &mut cache,
                            CacheKey::MemberMinSeq(group.clone(), user.clone()),
                            expiry.low_water,
                        );
                    }
                    expiry.removed
                }
                None => 0,
            },
        };
        self.deleted.fetch_add(removed as u64, Ordering::SeqCst);

        if removed > 0 {
            tracing::debug!(
                target: "seqwarden::tiers::memory",
                correlation_id = ctx.run_id(),
                group_id = %group,
                members = members.len(),
                removed,
                "expired group messages deleted"
            );
        }
        Ok(())
    }

    fn get_user_seq_range(&self, _ctx: &RunContext, user: &UserId) -> StoreResult<UserSeqRange> {
        self.check_user(user)?;
        let durable_max = self.durable.read().users.get(user).map(|log| log.max);
        let cache_min = self.cached(&CacheKey::UserMinSeq(user.clone()));
        let cache_max = self.cached(&CacheKey::UserMaxSeq(user.clone()));

        if durable_max.is_none() && cache_min.is_none() && cache_max.is_none() {
            return Err(StoreError::not_found(format!("user:{user}")));
        }

        Ok(UserSeqRange {
            durable_max: durable_max.unwrap_or_default(),
            cache_min: cache_min.unwrap_or_default(),
            cache_max,
        })
    }

    fn get_group_seq_range(
        &self,
        _ctx: &RunContext,
        group: &GroupId,
    ) -> StoreResult<GroupSeqRange> {
        self.check_group(group)?;
        let (durable_min, durable_max) = {
            let durable = self.durable.read();
            let entry = durable
                .groups
                .get(group)
                .ok_or_else(|| StoreError::not_found(format!("group:{group}")))?;
            (entry.log.first_seq().unwrap_or_default(), entry.log.max())
        };
        let cache_max = self.cached(&CacheKey::GroupMaxSeq(group.clone()));

        Ok(GroupSeqRange {
            durable_min,
            durable_max,
            cache_max,
        })
    }

    fn get_group_max_seq(&self, _ctx: &RunContext, group: &GroupId) -> StoreResult<Seq> {
        self.check_group(group)?;
        self.cached_or_not_found(CacheKey::GroupMaxSeq(group.clone()))
    }

    fn get_group_member_min_seq(
        &self,
        _ctx: &RunContext,
        group: &GroupId,
        user: &UserId,
    ) -> StoreResult<Seq> {
        self.check_group(group)?;
        self.check_user(user)?;
        self.cached_or_not_found(CacheKey::MemberMinSeq(group.clone(), user.clone()))
    }

    fn set_group_member_min_seq(
        &self,
        _ctx: &RunContext,
        group: &GroupId,
        user: &UserId,
        seq: Seq,
    ) -> StoreResult<()> {
        self.check_group(group)?;
        self.check_user(user)?;
        self.record_mutation();
        self.put_cache(CacheKey::MemberMinSeq(group.clone(), user.clone()), seq);
        Ok(())
    }

    fn get_user_min_seq(&self, _ctx: &RunContext, user: &UserId) -> StoreResult<Seq> {
        self.check_user(user)?;
        self.cached_or_not_found(CacheKey::UserMinSeq(user.clone()))
    }

    fn get_user_max_seq(&self, _ctx: &RunContext, user: &UserId) -> StoreResult<Seq> {
        self.check_user(user)?;
        self.cached_or_not_found(CacheKey::UserMaxSeq(user.clone()))
    }

    fn set_user_min_seq(&self, _ctx: &RunContext, user: &UserId, seq: Seq) -> StoreResult<()> {
        self.check_user(user)?;
        self.record_mutation();
        self.put_cache(CacheKey::UserMinSeq(user.clone()), seq);
        Ok(())
    }
}

impl PopulationEnumerator for MemoryStore {
    fn list_all_user_ids(&self, _ctx: &RunContext) -> StoreResult<Vec<UserId>> {
        self.check_population(Population::Users)?;
        Ok(self.durable.read().users.keys().cloned().collect())
    }

    fn list_group_ids_by_kind(
        &self,
        _ctx: &RunContext,
        kind: DiffusionKind,
    ) -> StoreResult<Vec<GroupId>> {
        self.check_population(Population::Groups)?;
        Ok(self
            .durable
            .read()
            .groups
            .iter()
            .filter(|(_, entry)| entry.log.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn list_group_member_ids(&self, _ctx: &RunContext, group: &GroupId) -> StoreResult<Vec<UserId>> {
        self.check_population(Population::GroupMembers)?;
        if self.faults.read().member_listing.contains(group) {
            return Err(StoreError::unavailable(
                Tier::Durable,
                format!("listing members of {group} failed"),
            ));
        }
        self.durable
            .read()
            .groups
            .get(group)
            .map(|entry| entry.members.iter().cloned().collect())
            .ok_or_else(|| StoreError::not_found(format!("group:{group}")))
    }

    fn group_diffusion_kind(
        &self,
        _ctx: &RunContext,
        group: &GroupId,
    ) -> StoreResult<DiffusionKind> {
        self.durable
            .read()
            .groups
            .get(group)
            .map(|entry| entry.log.kind())
            .ok_or_else(|| StoreError::not_found(format!("group:{group}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CancelToken, RunMode};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn ctx() -> RunContext {
        RunContext::new(RunMode::ScheduledRetention, 1, CancelToken::new())
    }

    fn days_ago(days: u64) -> Timestamp {
        Timestamp::now().saturating_sub(DAY * days as u32)
    }

    #[test]
    fn test_user_delete_advances_min_to_first_survivor() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        for _ in 0..5 {
            store.append_user_message(&user, days_ago(40));
        }
        for _ in 0..3 {
            store.append_user_message(&user, days_ago(1));
        }

        store
            .delete_expired_and_advance_min_seq(&ctx(), &user, DAY * 30)
            .unwrap();

        assert_eq!(store.get_user_min_seq(&ctx(), &user).unwrap(), Seq(6));
        assert_eq!(store.user_message_seqs(&user), vec![Seq(6), Seq(7), Seq(8)]);
        assert_eq!(store.deleted_message_count(), 5);
    }

    #[test]
    fn test_user_delete_is_noop_when_nothing_expired() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        store.append_user_message(&user, days_ago(1));
        let before = store.snapshot();

        store
            .delete_expired_and_advance_min_seq(&ctx(), &user, DAY * 30)
            .unwrap();

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_fully_expired_history_over_advances_min() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        store.append_user_message(&user, days_ago(90));
        store.append_user_message(&user, days_ago(90));

        store
            .delete_expired_and_advance_min_seq(&ctx(), &user, DAY * 30)
            .unwrap();

        let range = store.get_user_seq_range(&ctx(), &user).unwrap();
        assert_eq!(range.cache_min, Seq(3));
        assert_eq!(range.cache_max, Some(Seq(2)));
        assert_eq!(range.durable_max, Seq(2));
    }

    #[test]
    fn test_read_diffusion_advances_member_cursors() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        let members = vec![UserId::new("a"), UserId::new("b")];
        store.add_group(&group, DiffusionKind::ReadDiffusion);
        for m in &members {
            store.add_member(&group, m).unwrap();
        }
        store.append_group_message(&group, days_ago(60)).unwrap();
        store.append_group_message(&group, days_ago(60)).unwrap();
        store.append_group_message(&group, days_ago(2)).unwrap();

        store
            .delete_expired_group_msgs_and_advance_min_seq(&ctx(), &group, &members, DAY * 30)
            .unwrap();

        for m in &members {
            assert_eq!(
                store.get_group_member_min_seq(&ctx(), &group, m).unwrap(),
                Seq(3)
            );
        }
        assert_eq!(store.group_stored_messages(&group), 1);
        let range = store.get_group_seq_range(&ctx(), &group).unwrap();
        assert_eq!(range.durable_min, Seq(3));
        assert_eq!(range.durable_max, Seq(3));
    }

    #[test]
    fn test_write_diffusion_expires_each_copy() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        let members = vec![UserId::new("a"), UserId::new("b")];
        store.add_group(&group, DiffusionKind::WriteDiffusion);
        for m in &members {
            store.add_member(&group, m).unwrap();
        }
        store.append_group_message(&group, days_ago(60)).unwrap();
        store.append_group_message(&group, days_ago(1)).unwrap();
        assert_eq!(store.group_stored_messages(&group), 4);

        store
            .delete_expired_group_msgs_and_advance_min_seq(&ctx(), &group, &members, DAY * 30)
            .unwrap();

        assert_eq!(store.group_stored_messages(&group), 2);
        assert_eq!(store.deleted_message_count(), 2);
        assert_eq!(
            store
                .get_group_member_min_seq(&ctx(), &group, &members[1])
                .unwrap(),
            Seq(2)
        );
    }

    #[test]
    fn test_missing_cursor_is_not_found() {
        let store = MemoryStore::new();
        let user = UserId::new("ghost");
        let err = store.get_user_min_seq(&ctx(), &user).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_user_seq_range(&ctx(), &user).unwrap_err().is_not_found());
    }

    #[test]
    fn test_lossy_cache_evicts_oldest_keys() {
        let store = MemoryStore::with_cache_capacity(2);
        let a = UserId::new("a");
        let b = UserId::new("b");
        let c = UserId::new("c");
        store.append_user_message(&a, days_ago(1));
        store.append_user_message(&b, days_ago(1));
        store.append_user_message(&c, days_ago(1));

        assert!(store.get_user_max_seq(&ctx(), &a).unwrap_err().is_not_found());
        assert_eq!(store.get_user_max_seq(&ctx(), &c).unwrap(), Seq(1));

        // durable max survives the eviction
        let range = store.get_user_seq_range(&ctx(), &a).unwrap();
        assert_eq!(range.durable_max, Seq(1));
        assert_eq!(range.cache_max, None);
    }

    #[test]
    fn test_group_range_reports_evicted_cache_max() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        store.add_group(&group, DiffusionKind::ReadDiffusion);
        store.append_group_message(&group, days_ago(1)).unwrap();
        assert_eq!(
            store.get_group_seq_range(&ctx(), &group).unwrap().cache_max,
            Some(Seq(1))
        );

        store.evict_cache(&CacheKey::GroupMaxSeq(group.clone()));

        let range = store.get_group_seq_range(&ctx(), &group).unwrap();
        assert_eq!(range.cache_max, None);
        assert_eq!(range.durable_max, Seq(1));
    }

    #[test]
    fn test_injected_faults() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        store.add_user(&user);
        store.fail_user(&user);
        store.fail_population(Population::Groups);

        assert!(store.get_user_seq_range(&ctx(), &user).is_err());
        assert!(store
            .list_group_ids_by_kind(&ctx(), DiffusionKind::ReadDiffusion)
            .is_err());

        store.clear_faults();
        assert!(store.get_user_seq_range(&ctx(), &user).is_ok());
    }

    #[test]
    fn test_durable_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable.bin");

        let store = MemoryStore::new();
        let user = UserId::new("u1");
        let group = GroupId::new("g1");
        store.append_user_message(&user, days_ago(1));
        store.add_group(&group, DiffusionKind::WriteDiffusion);
        store.add_member(&group, &user).unwrap();
        store.append_group_message(&group, days_ago(1)).unwrap();
        store.persist_durable(&path).unwrap();

        let restored = MemoryStore::restore_durable(&path, 16).unwrap();
        assert_eq!(restored.user_message_seqs(&user), vec![Seq(1)]);
        assert_eq!(
            restored.group_diffusion_kind(&ctx(), &group).unwrap(),
            DiffusionKind::WriteDiffusion
        );
        // cache tier does not survive a restart
        assert!(restored.get_user_max_seq(&ctx(), &user).unwrap_err().is_not_found());

        restored.warm_cache();
        assert_eq!(restored.get_user_max_seq(&ctx(), &user).unwrap(), Seq(1));
    }

    #[test]
    fn test_restore_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable.bin");
        std::fs::write(&path, b"NOPE\x01").unwrap();

        let result = MemoryStore::restore_durable(&path, 16);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_restore_rejects_oversized_body_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable.bin");
        let mut bytes = DURABLE_SNAPSHOT_MAGIC.to_vec();
        bytes.push(DURABLE_SNAPSHOT_VERSION);
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0x90]);
        std::fs::write(&path, bytes).unwrap();

        let result = MemoryStore::restore_durable(&path, 16);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_restore_rejects_truncated_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durable.bin");
        let store = MemoryStore::new();
        store.append_user_message(&UserId::new("u1"), days_ago(1));
        store.persist_durable(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let result = MemoryStore::restore_durable(&path, 16);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_delete_fault_leaves_reads_working() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        store.append_user_message(&user, days_ago(40));
        store.fail_user_deletes(&user);

        assert!(store
            .delete_expired_and_advance_min_seq(&ctx(), &user, DAY * 30)
            .is_err());
        assert_eq!(store.user_message_seqs(&user), vec![Seq(1)]);
        assert_eq!(store.get_user_max_seq(&ctx(), &user).unwrap(), Seq(1));
    }
}
