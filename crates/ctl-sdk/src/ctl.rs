use std::collections::BTreeMap;
use std::sync::Arc;

use ctl_branch::{Branch, BranchError, BranchStore, BranchTree, InMemoryBranchStore};
use ctl_diff::{apply_patch, diff, Diff, PatchOperation};
use ctl_merge::{MergeEngine, MergePreview, MergeRequest, MergeResult};
use ctl_resolve::{ResolveError, ResolvedState, VersionResolver};
use ctl_store::{
    validate_history, HistoryCursor, HistoryIter, HistoryPage, InMemoryVersionStore, NewVersion,
    StoreError, ValidationReport, Version, VersionKey, VersionStore,
};
use ctl_types::{BranchId, Clock, EntityKey, Payload, SystemClock, Timestamp, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CtlError, CtlResult};
use crate::restore::{RestoreRequest, RestoreService};

/// Paging parameters for [`Ctl::get_history`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page size; the configured default when `None`.
    pub limit: Option<usize>,
    /// Continue below this cursor; newest first when `None`.
    pub cursor: Option<HistoryCursor>,
}

impl Pagination {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: Option<HistoryCursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// A rules-engine patch to apply on top of an entity's resolved state.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchRequest {
    pub key: VersionKey,
    pub operations: Vec<PatchOperation>,
    pub comment: Option<String>,
    pub created_by: String,
    pub effective_from: Option<Timestamp>,
}

impl PatchRequest {
    pub fn new(key: VersionKey, operations: Vec<PatchOperation>, created_by: impl Into<String>) -> Self {
        Self {
            key,
            operations,
            comment: None,
            created_by: created_by.into(),
            effective_from: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn effective_from(mut self, at: Timestamp) -> Self {
        self.effective_from = Some(at);
        self
    }
}

/// High-level Campaign Timeline Ledger API.
pub struct Ctl {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    versions: Arc<dyn VersionStore>,
    tree: BranchTree,
    resolver: VersionResolver,
    merger: MergeEngine,
    restorer: RestoreService,
}

impl Ctl {
    pub fn new(
        config: EngineConfig,
        versions: Arc<dyn VersionStore>,
        branches: Arc<dyn BranchStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tree = BranchTree::new(branches, versions.clone(), clock.clone());
        let resolver = VersionResolver::new(tree.clone(), versions.clone(), clock.clone());
        let merger = MergeEngine::new(resolver.clone(), versions.clone(), clock.clone())
            .with_policy(config.merge_base)
            .with_attempts(config.merge_attempts);
        let restorer =
            RestoreService::new(resolver.clone(), versions.clone()).with_attempts(config.append_attempts);
        Self {
            config,
            clock,
            versions,
            tree,
            resolver,
            merger,
            restorer,
        }
    }

    /// Fresh in-memory backends with the system clock. The tree has no
    /// root until [`init`](Self::init).
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::in_memory_with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn in_memory_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let versions = Arc::new(InMemoryVersionStore::with_clock(clock.clone()));
        Self::new(config, versions, Arc::new(InMemoryBranchStore::new()), clock)
    }

    /// Create the root branch named by the configuration.
    pub fn init(&self) -> CtlResult<Branch> {
        Ok(self.tree.init_root(&self.config.root_branch_name)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &BranchTree {
        &self.tree
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    pub fn merger(&self) -> &MergeEngine {
        &self.merger
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn root_branch(&self) -> CtlResult<Branch> {
        Ok(self.tree.root()?)
    }

    // ---- Versions ----

    /// Append a new entity state on an existing branch.
    pub fn append_version(&self, request: &NewVersion) -> CtlResult<Version> {
        self.tree.get(&request.key.branch)?;
        Ok(self
            .versions
            .append_with_attempts(request, self.config.append_attempts)?)
    }

    /// One page of a key's own history on its branch, newest first.
    pub fn get_history(&self, key: &VersionKey, pagination: Pagination) -> CtlResult<HistoryPage> {
        self.tree.get(&key.branch)?;
        let limit = self.config.page_size(pagination.limit);
        Ok(self.versions.history_page(key, pagination.cursor, limit)?)
    }

    /// Lazily walk a key's whole history, newest first.
    pub fn history_iter(&self, key: &VersionKey) -> HistoryIter<'_, dyn VersionStore> {
        HistoryIter::new(self.versions.as_ref(), key.clone(), self.config.history_page_size)
    }

    pub fn get_version(&self, id: &VersionId) -> CtlResult<Version> {
        self.versions
            .get(id)?
            .ok_or(CtlError::VersionNotFound(*id))
    }

    /// Structural diff from version `a` to version `b`.
    pub fn get_diff(&self, a: &VersionId, b: &VersionId) -> CtlResult<Diff> {
        let old = self.get_version(a)?;
        let new = self.get_version(b)?;
        Ok(diff(&old.payload, &new.payload))
    }

    pub fn restore_version(&self, request: &RestoreRequest) -> CtlResult<Version> {
        self.restorer.restore_to(request)
    }

    pub fn resolve(
        &self,
        entity: &EntityKey,
        branch: &BranchId,
        as_of: Option<Timestamp>,
    ) -> CtlResult<ResolvedState> {
        Ok(self.resolver.resolve(entity, branch, as_of)?)
    }

    /// Apply a patch to the entity's effective state and append the result.
    ///
    /// The state may be inherited from an ancestor; an entity that does not
    /// exist yet starts from an empty object. The append is conditioned on
    /// the branch's head not moving since the state was read.
    pub fn apply_patch(&self, request: &PatchRequest) -> CtlResult<Version> {
        self.tree.get(&request.key.branch)?;
        let attempts = self.config.append_attempts;
        let mut attempt = 1;
        loop {
            let expected = self.versions.head_number(&request.key)?;
            let at = request.effective_from.unwrap_or_else(|| self.clock.now());
            let current = match self
                .resolver
                .resolve_version(&request.key.entity, &request.key.branch, at)
            {
                Ok(version) => version.payload,
                Err(ResolveError::EntityNeverExisted { .. }) => Payload::new(),
                Err(e) => return Err(e.into()),
            };
            let patched = apply_patch(&current, &request.operations)?;

            let new_version = NewVersion::new(request.key.clone(), patched, request.created_by.clone())
                .with_optional_comment(request.comment.clone())
                .with_effective_from(Some(at));
            match self.versions.compare_and_append(&new_version, expected, &[]) {
                Ok(version) => {
                    debug!(
                        key = %request.key,
                        operations = request.operations.len(),
                        version = version.version_number,
                        "applied patch"
                    );
                    return Ok(version);
                }
                Err(StoreError::ConcurrentModification { .. }) if attempt < attempts => {
                    warn!(key = %request.key, attempt, "patch lost compare-and-swap race; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ---- Branches ----

    pub fn fork_branch(
        &self,
        parent: &BranchId,
        name: &str,
        description: Option<String>,
    ) -> CtlResult<Branch> {
        Ok(self.tree.fork(parent, name, description)?)
    }

    pub fn fork_branch_at(
        &self,
        parent: &BranchId,
        name: &str,
        description: Option<String>,
        diverged_at: Timestamp,
    ) -> CtlResult<Branch> {
        Ok(self.tree.fork_at(parent, name, description, diverged_at)?)
    }

    /// `branch` and its ancestors up to the root, for breadcrumbs.
    pub fn resolve_branch_ancestry(&self, branch: &BranchId) -> CtlResult<Vec<Branch>> {
        Ok(self.tree.ancestor_chain(branch)?)
    }

    pub fn delete_branch(&self, branch: &BranchId) -> CtlResult<Branch> {
        Ok(self.tree.delete(branch)?)
    }

    /// Look a branch up by ID or, failing that, by unique name.
    pub fn find_branch(&self, id_or_name: &str) -> CtlResult<Option<Branch>> {
        if let Ok(id) = id_or_name.parse::<BranchId>() {
            match self.tree.get(&id) {
                Ok(branch) => return Ok(Some(branch)),
                Err(BranchError::BranchNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let mut matches = self.tree.find_by_name(id_or_name)?;
        Ok(match matches.len() {
            1 => matches.pop(),
            _ => None,
        })
    }

    // ---- Merge ----

    pub fn merge_branches(&self, request: &MergeRequest) -> CtlResult<MergeResult> {
        Ok(self.merger.merge(request)?)
    }

    pub fn merge_branches_with_resolutions(
        &self,
        request: &MergeRequest,
        resolutions: &BTreeMap<String, Value>,
    ) -> CtlResult<Version> {
        Ok(self.merger.merge_with_resolutions(request, resolutions)?)
    }

    pub fn preview_merge(&self, request: &MergeRequest) -> CtlResult<MergePreview> {
        Ok(self.merger.preview(request)?)
    }

    // ---- Verification ----

    /// Check the bitemporal invariants of every key written on `branch`.
    pub fn verify(&self, branch: &BranchId) -> CtlResult<Vec<ValidationReport>> {
        self.tree.get(branch)?;
        let mut reports = Vec::new();
        for key in self.versions.keys_on_branch(branch)? {
            let versions = self.history_iter(&key).collect::<Result<Vec<_>, _>>()?;
            let report = validate_history(&versions);
            if !report.is_valid() {
                warn!(key = %key, violations = report.violations.len(), "history violates invariants");
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// [`verify`](Self::verify) over every branch.
    pub fn verify_all(&self) -> CtlResult<Vec<ValidationReport>> {
        let mut reports = Vec::new();
        for branch in self.tree.list()? {
            reports.extend(self.verify(&branch.id)?);
        }
        info!(keys = reports.len(), "verified all branches");
        Ok(reports)
    }
}

impl std::fmt::Debug for Ctl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctl")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_types::ManualClock;
    use serde_json::json;

    fn setup() -> (Arc<ManualClock>, Ctl, Branch) {
        let clock = Arc::new(ManualClock::at_millis(1_000));
        let ctl = Ctl::in_memory_with_clock(EngineConfig::default(), clock.clone());
        let root = ctl.init().unwrap();
        (clock, ctl, root)
    }

    fn key(branch: BranchId) -> VersionKey {
        VersionKey::new(EntityKey::new("encounter", "bridge-ambush"), branch)
    }

    fn payload(value: Value) -> Payload {
        Payload::try_from(value).unwrap()
    }

    #[test]
    fn init_uses_configured_root_name() {
        let (_, ctl, root) = setup();
        assert_eq!(root.name, "main");
        assert_eq!(ctl.root_branch().unwrap(), root);
    }

    #[test]
    fn append_requires_known_branch() {
        let (_, ctl, _) = setup();
        let err = ctl
            .append_version(&NewVersion::new(key(BranchId::new()), Payload::new(), "gm"))
            .unwrap_err();
        assert!(matches!(err, CtlError::Branch(_)));
    }

    #[test]
    fn history_pages_with_default_and_explicit_limits() {
        let (clock, ctl, root) = setup();
        for i in 0..5 {
            clock.advance(10);
            ctl.append_version(&NewVersion::new(key(root.id), payload(json!({"round": i})), "gm"))
                .unwrap();
        }
        let all = ctl.get_history(&key(root.id), Pagination::default()).unwrap();
        assert_eq!(all.versions.len(), 5);
        assert!(all.next.is_none());

        let first = ctl.get_history(&key(root.id), Pagination::first(2)).unwrap();
        assert_eq!(first.versions[0].version_number, 5);
        let second = ctl
            .get_history(&key(root.id), Pagination::first(2).after(first.next))
            .unwrap();
        assert_eq!(second.versions[0].version_number, 3);
    }

    #[test]
    fn diff_between_versions() {
        let (clock, ctl, root) = setup();
        let a = ctl
            .append_version(&NewVersion::new(key(root.id), payload(json!({"level": 2})), "gm"))
            .unwrap();
        clock.advance(10);
        let b = ctl
            .append_version(&NewVersion::new(
                key(root.id),
                payload(json!({"level": 3, "population": 1500})),
                "gm",
            ))
            .unwrap();

        let d = ctl.get_diff(&a.id, &b.id).unwrap();
        assert_eq!(d.added.get("population"), Some(&json!(1500)));
        assert_eq!(d.modified["level"].old, json!(2));
        assert_eq!(d.modified["level"].new, json!(3));
        assert!(d.removed.is_empty());
        assert!(ctl.get_diff(&a.id, &a.id).unwrap().is_empty());
        assert!(matches!(
            ctl.get_diff(&a.id, &VersionId::new()),
            Err(CtlError::VersionNotFound(_))
        ));
    }

    #[test]
    fn patch_applies_to_inherited_state() {
        let (clock, ctl, root) = setup();
        ctl.append_version(&NewVersion::new(key(root.id), payload(json!({"enemies": ["orc"]})), "gm"))
            .unwrap();
        clock.advance(10);
        let alt = ctl.fork_branch(&root.id, "alt", None).unwrap();
        clock.advance(10);

        let ops = vec![
            PatchOperation::Add {
                path: "/enemies/-".into(),
                value: json!("troll"),
            },
            PatchOperation::Add {
                path: "/resolved".into(),
                value: json!(false),
            },
        ];
        let version = ctl
            .apply_patch(&PatchRequest::new(key(alt.id), ops, "rules").with_comment("wave 2"))
            .unwrap();
        assert_eq!(version.branch_id, alt.id);
        assert_eq!(version.version_number, 1);
        assert_eq!(
            version.payload,
            payload(json!({"enemies": ["orc", "troll"], "resolved": false}))
        );
        // The parent is untouched.
        let parent = ctl.resolve(&key(root.id).entity, &root.id, None).unwrap();
        assert_eq!(parent.payload, payload(json!({"enemies": ["orc"]})));
    }

    #[test]
    fn patch_on_new_entity_starts_empty() {
        let (_, ctl, root) = setup();
        let ops = vec![PatchOperation::Add {
            path: "/status".into(),
            value: json!("pending"),
        }];
        let version = ctl
            .apply_patch(&PatchRequest::new(key(root.id), ops, "rules"))
            .unwrap();
        assert_eq!(version.payload, payload(json!({"status": "pending"})));
    }

    #[test]
    fn failed_patch_writes_nothing() {
        let (_, ctl, root) = setup();
        let ops = vec![PatchOperation::Remove {
            path: "/missing".into(),
        }];
        let err = ctl
            .apply_patch(&PatchRequest::new(key(root.id), ops, "rules"))
            .unwrap_err();
        assert!(matches!(err, CtlError::Patch(_)));
        assert!(ctl.get_history(&key(root.id), Pagination::default()).unwrap().versions.is_empty());
    }

    #[test]
    fn find_branch_by_id_or_unique_name() {
        let (_, ctl, root) = setup();
        let alt = ctl.fork_branch(&root.id, "alt", None).unwrap();
        assert_eq!(ctl.find_branch("alt").unwrap(), Some(alt.clone()));
        assert_eq!(ctl.find_branch(&alt.id.to_string()).unwrap(), Some(alt.clone()));
        ctl.fork_branch(&alt.id, "alt", None).unwrap();
        assert_eq!(ctl.find_branch("alt").unwrap(), None);
        assert_eq!(ctl.find_branch("nope").unwrap(), None);
    }

    #[test]
    fn verify_reports_each_key() {
        let (clock, ctl, root) = setup();
        for entity in ["a", "b"] {
            let k = VersionKey::new(EntityKey::new("event", entity), root.id);
            ctl.append_version(&NewVersion::new(k.clone(), Payload::new(), "gm")).unwrap();
            clock.advance(5);
            ctl.append_version(&NewVersion::new(k, Payload::new(), "gm")).unwrap();
        }
        let reports = ctl.verify(&root.id).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.is_valid() && r.version_count == 2));
        assert_eq!(ctl.verify_all().unwrap().len(), 2);
    }

    /// Deletes a branch the way `BranchTree::delete` does, just before the
    /// next append reaches the inner store.
    struct DeletingStore {
        inner: InMemoryVersionStore,
        branches: Arc<InMemoryBranchStore>,
        doomed: std::sync::Mutex<Option<BranchId>>,
    }

    impl VersionStore for DeletingStore {
        fn compare_and_append(
            &self,
            request: &NewVersion,
            expected_head: Option<u64>,
            guards: &[ctl_store::HeadGuard],
        ) -> ctl_store::StoreResult<Version> {
            if let Some(branch) = self.doomed.lock().unwrap().take() {
                self.branches.remove(&branch).unwrap();
                self.inner.remove_branch(&branch)?;
            }
            self.inner.compare_and_append(request, expected_head, guards)
        }
        fn head(&self, key: &VersionKey) -> ctl_store::StoreResult<Option<Version>> {
            self.inner.head(key)
        }
        fn get(&self, id: &VersionId) -> ctl_store::StoreResult<Option<Version>> {
            self.inner.get(id)
        }
        fn history_page(
            &self,
            key: &VersionKey,
            cursor: Option<HistoryCursor>,
            limit: usize,
        ) -> ctl_store::StoreResult<HistoryPage> {
            self.inner.history_page(key, cursor, limit)
        }
        fn version_at(&self, key: &VersionKey, time: Timestamp) -> ctl_store::StoreResult<Option<Version>> {
            self.inner.version_at(key, time)
        }
        fn keys_on_branch(&self, branch: &BranchId) -> ctl_store::StoreResult<Vec<VersionKey>> {
            self.inner.keys_on_branch(branch)
        }
        fn remove_branch(&self, branch: &BranchId) -> ctl_store::StoreResult<usize> {
            self.inner.remove_branch(branch)
        }
    }

    #[test]
    fn append_racing_branch_delete_leaves_no_versions() {
        let clock = Arc::new(ManualClock::at_millis(1_000));
        let branches = Arc::new(InMemoryBranchStore::new());
        let versions = Arc::new(DeletingStore {
            inner: InMemoryVersionStore::with_clock(clock.clone()),
            branches: branches.clone(),
            doomed: std::sync::Mutex::new(None),
        });
        let ctl = Ctl::new(EngineConfig::default(), versions.clone(), branches, clock.clone());
        let root = ctl.init().unwrap();
        let alt = ctl.fork_branch(&root.id, "alt", None).unwrap();
        clock.advance(10);

        *versions.doomed.lock().unwrap() = Some(alt.id);
        let err = ctl
            .append_version(&NewVersion::new(key(alt.id), payload(json!({"level": 1})), "gm"))
            .unwrap_err();
        assert!(matches!(err, CtlError::Store(StoreError::BranchNotFound(id)) if id == alt.id));
        assert!(ctl.tree().get(&alt.id).is_err());
        assert!(versions.keys_on_branch(&alt.id).unwrap().is_empty());

        let patch = PatchRequest::new(key(alt.id), vec![], "gm");
        assert!(ctl.apply_patch(&patch).is_err());
        assert!(versions.inner.snapshot().unwrap().versions.is_empty());
    }
}
