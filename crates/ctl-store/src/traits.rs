use ctl_types::{BranchId, Timestamp, VersionId};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::history::HistoryIter;
use crate::records::{HeadGuard, HistoryCursor, HistoryPage, NewVersion, Version, VersionKey};

/// Number of compare-and-swap attempts [`VersionStore::append`] makes before
/// surfacing [`StoreError::ConcurrentModification`].
pub const DEFAULT_APPEND_ATTEMPTS: u32 = 3;

/// Persistence port for entity versions.
///
/// All implementations must satisfy these invariants:
/// - Versions are never edited or deleted individually; appending closes the
///   open version (sets `valid_to`) and inserts its successor in one atomic
///   step.
/// - For every key, version numbers start at 1 and increase by one, and the
///   validity intervals partition time with exactly one open interval.
/// - `compare_and_append` is the only write path and is linearizable per key.
/// - Reads never block writers for longer than a single insert and never
///   observe a half-applied append.
pub trait VersionStore: Send + Sync {
    /// Append `request` if the head of `request.key` still has number
    /// `expected_head` and every guard still holds.
    ///
    /// Fails with [`StoreError::ConcurrentModification`] when a precondition
    /// no longer holds, with [`StoreError::InvalidTimeOrder`] when the
    /// effective time does not fall strictly after the open version's start,
    /// and with [`StoreError::BranchNotFound`] once the key's branch has been
    /// removed.
    fn compare_and_append(
        &self,
        request: &NewVersion,
        expected_head: Option<u64>,
        guards: &[HeadGuard],
    ) -> StoreResult<Version>;

    /// The open (current) version of `key`, if any.
    fn head(&self, key: &VersionKey) -> StoreResult<Option<Version>>;

    /// Look up a version by ID on any key.
    fn get(&self, id: &VersionId) -> StoreResult<Option<Version>>;

    /// One page of history, newest first, starting below `cursor`.
    fn history_page(
        &self,
        key: &VersionKey,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> StoreResult<HistoryPage>;

    /// The version of `key` whose `[valid_from, valid_to)` contains `time`.
    ///
    /// Returns `Ok(None)` when this branch has no version covering `time`;
    /// the caller decides whether to consult an ancestor branch.
    fn version_at(&self, key: &VersionKey, time: Timestamp) -> StoreResult<Option<Version>>;

    /// Every key with at least one version on `branch`.
    fn keys_on_branch(&self, branch: &BranchId) -> StoreResult<Vec<VersionKey>>;

    /// Drop every version recorded on `branch` and refuse any later append
    /// to it. Returns how many versions were removed.
    ///
    /// Only used when the branch itself is deleted; other branches are never
    /// touched.
    fn remove_branch(&self, branch: &BranchId) -> StoreResult<usize>;

    /// Append with bounded optimistic retries.
    fn append(&self, request: &NewVersion) -> StoreResult<Version> {
        self.append_with_attempts(request, DEFAULT_APPEND_ATTEMPTS)
    }

    /// Read the head number, then compare-and-append; retry on a lost race
    /// up to `attempts` times in total.
    fn append_with_attempts(&self, request: &NewVersion, attempts: u32) -> StoreResult<Version> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let expected = self.head_number(&request.key)?;
            match self.compare_and_append(request, expected, &[]) {
                Err(StoreError::ConcurrentModification { .. }) if attempt < attempts => {
                    warn!(key = %request.key, attempt, "append lost compare-and-swap race; retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Version number of the open version, `None` if the key is empty.
    fn head_number(&self, key: &VersionKey) -> StoreResult<Option<u64>> {
        Ok(self.head(key)?.map(|v| v.version_number))
    }

    /// Returns `true` if `key` has at least one version.
    fn exists(&self, key: &VersionKey) -> StoreResult<bool> {
        Ok(self.head(key)?.is_some())
    }

    /// Lazily iterate the full history of `key`, newest first.
    ///
    /// Through a trait object, use [`HistoryIter::new`] directly.
    fn history(&self, key: &VersionKey, page_size: usize) -> HistoryIter<'_, Self>
    where
        Self: Sized,
    {
        HistoryIter::new(self, key.clone(), page_size)
    }
}
