//! Lazy, restartable iteration over a key's history.

use crate::error::StoreResult;
use crate::records::{HistoryCursor, Version, VersionKey};
use crate::traits::VersionStore;

/// Iterator over a key's versions, newest first, fetched a page at a time.
///
/// The iterator can be abandoned at any point and resumed later from
/// [`HistoryIter::cursor`]; versions appended in between are newer than the
/// cursor and therefore not repeated.
pub struct HistoryIter<'a, S: VersionStore + ?Sized> {
    store: &'a S,
    key: VersionKey,
    page_size: usize,
    buffer: std::vec::IntoIter<Version>,
    next: Option<HistoryCursor>,
    started: bool,
    failed: bool,
}

impl<'a, S: VersionStore + ?Sized> HistoryIter<'a, S> {
    /// Start from the newest version.
    pub fn new(store: &'a S, key: VersionKey, page_size: usize) -> Self {
        Self {
            store,
            key,
            page_size: page_size.max(1),
            buffer: Vec::new().into_iter(),
            next: None,
            started: false,
            failed: false,
        }
    }

    /// Continue below a cursor obtained from an earlier iteration or page.
    pub fn resume(store: &'a S, key: VersionKey, cursor: HistoryCursor, page_size: usize) -> Self {
        Self {
            next: Some(cursor),
            started: true,
            ..Self::new(store, key, page_size)
        }
    }

    /// Where to resume so that the next item yielded is the first one not
    /// yet returned. `None` once the history is exhausted.
    pub fn cursor(&self) -> Option<HistoryCursor> {
        match self.buffer.as_slice().first() {
            Some(pending) => Some(HistoryCursor {
                before: pending.version_number + 1,
            }),
            None if !self.started => Some(HistoryCursor { before: u64::MAX }),
            None => self.next,
        }
    }

    fn fetch(&mut self) -> StoreResult<bool> {
        if self.started && self.next.is_none() {
            return Ok(false);
        }
        let page = self
            .store
            .history_page(&self.key, self.next, self.page_size)?;
        self.started = true;
        self.next = page.next;
        let fetched = !page.versions.is_empty();
        self.buffer = page.versions.into_iter();
        Ok(fetched)
    }
}

impl<S: VersionStore + ?Sized> Iterator for HistoryIter<'_, S> {
    type Item = StoreResult<Version>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(version) = self.buffer.next() {
            return Some(Ok(version));
        }
        match self.fetch() {
            Ok(true) => self.buffer.next().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
