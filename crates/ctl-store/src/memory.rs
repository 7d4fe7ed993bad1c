use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ctl_types::{BranchId, Clock, SystemClock, Timestamp, VersionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::records::{HeadGuard, HistoryCursor, HistoryPage, NewVersion, Version, VersionKey};
use crate::traits::VersionStore;
use crate::validation::validate_history;

/// In-memory, HashMap-based version store.
///
/// Intended for tests and embedding. Each key's versions are held in a
/// `Vec` ordered by version number behind a single `RwLock`, so an append
/// (close + insert) is one critical section and readers see either the
/// state before it or after it.
pub struct InMemoryVersionStore {
    clock: Arc<dyn Clock>,
    inner: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    streams: HashMap<VersionKey, Vec<Version>>,
    id_index: HashMap<VersionId, (VersionKey, usize)>,
    /// Branches removed by `remove_branch`. IDs are never reused.
    removed_branches: BTreeSet<BranchId>,
}

impl StoreState {
    fn head_number(&self, key: &VersionKey) -> Option<u64> {
        self.streams
            .get(key)
            .and_then(|s| s.last())
            .map(|v| v.version_number)
    }
}

/// Serializable dump of every version in a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub versions: Vec<Version>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_branches: Vec<BranchId>,
}

impl InMemoryVersionStore {
    /// Create an empty store reading time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(StoreState::default()),
        }
    }

    /// Rebuild a store from a snapshot, rejecting any history that violates
    /// the bitemporal invariants.
    pub fn from_snapshot(snapshot: StoreSnapshot, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let mut grouped: BTreeMap<VersionKey, Vec<Version>> = BTreeMap::new();
        let mut state = StoreState {
            removed_branches: snapshot.removed_branches.into_iter().collect(),
            ..StoreState::default()
        };
        for version in snapshot.versions {
            if state.removed_branches.contains(&version.branch_id) {
                return Err(StoreError::CorruptHistory {
                    key: version.key(),
                    reason: format!("version {} is on removed branch {}", version.id, version.branch_id),
                });
            }
            grouped.entry(version.key()).or_default().push(version);
        }

        for (key, mut versions) in grouped {
            let report = validate_history(&versions);
            if let Some(violation) = report.violations.first() {
                return Err(StoreError::CorruptHistory {
                    key,
                    reason: violation.description.clone(),
                });
            }
            versions.sort_by_key(|v| v.version_number);
            for (index, version) in versions.iter().enumerate() {
                state.id_index.insert(version.id, (key.clone(), index));
            }
            state.streams.insert(key, versions);
        }

        Ok(Self {
            clock,
            inner: RwLock::new(state),
        })
    }

    /// Dump every version, ordered by key then version number.
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let state = self.read()?;
        let mut keys: Vec<&VersionKey> = state.streams.keys().collect();
        keys.sort();
        let versions = keys
            .into_iter()
            .flat_map(|k| state.streams[k].iter().cloned())
            .collect();
        Ok(StoreSnapshot {
            versions,
            removed_branches: state.removed_branches.iter().copied().collect(),
        })
    }

    /// Total number of versions across all keys.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.id_index.len())
    }

    /// Returns `true` if the store holds no versions.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn compare_and_append(
        &self,
        request: &NewVersion,
        expected_head: Option<u64>,
        guards: &[HeadGuard],
    ) -> StoreResult<Version> {
        let mut state = self.write()?;

        if state.removed_branches.contains(&request.key.branch) {
            return Err(StoreError::BranchNotFound(request.key.branch));
        }
        let actual = state.head_number(&request.key);
        if actual != expected_head {
            return Err(StoreError::ConcurrentModification {
                key: request.key.clone(),
                expected: expected_head,
                actual,
            });
        }
        for guard in guards {
            let actual = state.head_number(&guard.key);
            if actual != guard.expected {
                return Err(StoreError::ConcurrentModification {
                    key: guard.key.clone(),
                    expected: guard.expected,
                    actual,
                });
            }
        }

        // Read the clock under the lock so default times follow commit order.
        let now = self.clock.now();
        let effective_from = request.effective_from.unwrap_or(now);

        let stream = state.streams.entry(request.key.clone()).or_default();
        let version_number = match stream.last_mut() {
            Some(open) => {
                if effective_from <= open.valid_from {
                    return Err(StoreError::InvalidTimeOrder {
                        key: request.key.clone(),
                        effective_from,
                        current_from: open.valid_from,
                    });
                }
                open.valid_to = Some(effective_from);
                open.version_number + 1
            }
            None => 1,
        };

        let version = Version {
            id: VersionId::new(),
            entity: request.key.entity.clone(),
            branch_id: request.key.branch,
            valid_from: effective_from,
            valid_to: None,
            payload: request.payload.clone(),
            version_number,
            comment: request.comment.clone(),
            created_by: request.created_by.clone(),
            created_at: now,
        };
        stream.push(version.clone());
        let index = stream.len() - 1;
        state.id_index.insert(version.id, (request.key.clone(), index));

        debug!(
            key = %request.key,
            version = version_number,
            valid_from = %effective_from,
            "appended version"
        );
        Ok(version)
    }

    fn head(&self, key: &VersionKey) -> StoreResult<Option<Version>> {
        let state = self.read()?;
        Ok(state.streams.get(key).and_then(|s| s.last()).cloned())
    }

    fn get(&self, id: &VersionId) -> StoreResult<Option<Version>> {
        let state = self.read()?;
        let Some((key, index)) = state.id_index.get(id) else {
            return Ok(None);
        };
        Ok(state.streams.get(key).and_then(|s| s.get(*index)).cloned())
    }

    fn history_page(
        &self,
        key: &VersionKey,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> StoreResult<HistoryPage> {
        let state = self.read()?;
        let Some(stream) = state.streams.get(key) else {
            return Ok(HistoryPage::default());
        };

        // Version numbers are 1-based and dense, so number n lives at n - 1.
        let end = match cursor {
            Some(c) => (c.before.saturating_sub(1)).min(stream.len() as u64) as usize,
            None => stream.len(),
        };
        let start = end.saturating_sub(limit.max(1));
        let versions: Vec<Version> = stream[start..end].iter().rev().cloned().collect();
        let next = (start > 0).then(|| HistoryCursor {
            before: stream[start].version_number,
        });
        Ok(HistoryPage { versions, next })
    }

    fn version_at(&self, key: &VersionKey, time: Timestamp) -> StoreResult<Option<Version>> {
        let state = self.read()?;
        let Some(stream) = state.streams.get(key) else {
            return Ok(None);
        };
        let after = stream.partition_point(|v| v.valid_from <= time);
        if after == 0 {
            return Ok(None);
        }
        let candidate = &stream[after - 1];
        Ok(candidate.covers(time).then(|| candidate.clone()))
    }

    fn keys_on_branch(&self, branch: &BranchId) -> StoreResult<Vec<VersionKey>> {
        let state = self.read()?;
        let mut keys: Vec<VersionKey> = state
            .streams
            .keys()
            .filter(|k| &k.branch == branch)
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn remove_branch(&self, branch: &BranchId) -> StoreResult<usize> {
        let mut state = self.write()?;
        state.removed_branches.insert(*branch);
        let keys: Vec<VersionKey> = state
            .streams
            .keys()
            .filter(|k| &k.branch == branch)
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some(stream) = state.streams.remove(&key) {
                removed += stream.len();
                for version in stream {
                    state.id_index.remove(&version.id);
                }
            }
        }
        debug!(branch = %branch, removed, "removed branch versions");
        Ok(removed)
    }
}

impl std::fmt::Debug for InMemoryVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVersionStore")
            .field("version_count", &self.len().ok())
            .finish()
    }
}
