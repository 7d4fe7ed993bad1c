//! JSON-file persistence of the in-memory backends.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use ctl_branch::{BranchSnapshot, InMemoryBranchStore};
use ctl_store::{InMemoryVersionStore, StoreSnapshot};
use ctl_types::{Clock, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::ctl::Ctl;
use crate::error::{CtlError, CtlResult};

/// Current on-disk layout.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// On-disk layout of a state file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub format_version: u32,
    pub branches: BranchSnapshot,
    pub versions: StoreSnapshot,
}

impl StateFile {
    /// Latest instant the recording clock produced: the newest `created_at`
    /// across versions and branches. Effective times are left out since
    /// callers may set them anywhere in world time.
    pub fn last_recorded_at(&self) -> Option<Timestamp> {
        let versions = self.versions.versions.iter().map(|v| v.created_at);
        let branches = self.branches.branches.iter().map(|b| b.created_at);
        versions.chain(branches).max()
    }
}

/// In-memory stores that can be loaded from and saved to a state file.
pub struct LocalState {
    versions: Arc<InMemoryVersionStore>,
    branches: Arc<InMemoryBranchStore>,
    clock: Arc<dyn Clock>,
}

impl LocalState {
    pub fn empty(clock: Arc<dyn Clock>) -> Self {
        Self {
            versions: Arc::new(InMemoryVersionStore::with_clock(clock.clone())),
            branches: Arc::new(InMemoryBranchStore::new()),
            clock,
        }
    }

    /// Load `path`, or start empty if it does not exist yet.
    ///
    /// Histories and the branch tree are validated on the way in.
    pub fn load(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> CtlResult<Self> {
        match Self::read_file(path.as_ref())? {
            Some(file) => Self::from_file(path.as_ref(), file, clock),
            None => Ok(Self::empty(clock)),
        }
    }

    /// Load `path` with a [`SystemClock`] that resumes after the last
    /// recorded instant, so a new process never reuses a millisecond an
    /// earlier one already stamped.
    pub fn open(path: impl AsRef<Path>) -> CtlResult<Self> {
        let path = path.as_ref();
        match Self::read_file(path)? {
            Some(file) => {
                let clock = match file.last_recorded_at() {
                    Some(floor) => SystemClock::after(floor),
                    None => SystemClock::new(),
                };
                Self::from_file(path, file, Arc::new(clock))
            }
            None => Ok(Self::empty(Arc::new(SystemClock::new()))),
        }
    }

    fn read_file(path: &Path) -> CtlResult<Option<StateFile>> {
        if !path.exists() {
            debug!(path = %path.display(), "no state file; starting empty");
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let file: StateFile = serde_json::from_str(&text)?;
        if file.format_version != STATE_FORMAT_VERSION {
            return Err(CtlError::Serialization(format!(
                "unsupported state format version {} (expected {STATE_FORMAT_VERSION})",
                file.format_version
            )));
        }
        Ok(Some(file))
    }

    fn from_file(path: &Path, file: StateFile, clock: Arc<dyn Clock>) -> CtlResult<Self> {
        let versions = InMemoryVersionStore::from_snapshot(file.versions, clock.clone())?;
        let branches = InMemoryBranchStore::from_snapshot(file.branches)?;
        let count = versions.len()?;
        debug!(
            path = %path.display(),
            versions = count,
            "loaded state file"
        );
        Ok(Self {
            versions: Arc::new(versions),
            branches: Arc::new(branches),
            clock,
        })
    }

    pub fn to_file(&self) -> CtlResult<StateFile> {
        Ok(StateFile {
            format_version: STATE_FORMAT_VERSION,
            branches: self.branches.snapshot()?,
            versions: self.versions.snapshot()?,
        })
    }

    /// Write atomically: a temporary file in the same directory is renamed
    /// over `path`, so a crash never leaves a half-written state file.
    pub fn save(&self, path: impl AsRef<Path>) -> CtlResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_file()?)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CtlError::Io(e.error))?;
        debug!(path = %path.display(), bytes = json.len(), "saved state file");
        Ok(())
    }

    /// A facade over these stores.
    pub fn ctl(&self, config: EngineConfig) -> Ctl {
        Ctl::new(
            config,
            self.versions.clone(),
            self.branches.clone(),
            self.clock.clone(),
        )
    }
}
