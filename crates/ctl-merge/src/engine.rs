use std::collections::BTreeMap;
use std::sync::Arc;

use ctl_branch::Branch;
use ctl_resolve::VersionResolver;
use ctl_store::{HeadGuard, NewVersion, StoreError, Version, VersionKey, VersionStore};
use ctl_types::{BranchId, Clock, EntityKey, Payload, Timestamp};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::MergeError;
use crate::three_way::three_way;
use crate::types::{MergeBasePolicy, MergePreview, MergeRequest, MergeResult, MergeSide};

/// Number of read-compute-write rounds a merge makes before giving up with
/// [`MergeError::ConcurrentModification`].
pub const DEFAULT_MERGE_ATTEMPTS: u32 = 3;

/// A computed merge plus the head numbers it was computed against.
struct MergePlan {
    preview: MergePreview,
    /// The auto-merged payload, conflicting fields still at their base value.
    partial: Payload,
    source_key: VersionKey,
    source_head: Option<u64>,
    target_key: VersionKey,
    target_head: Option<u64>,
    source_name: String,
}

/// Three-way merge of one entity between two branches.
#[derive(Clone)]
pub struct MergeEngine {
    resolver: VersionResolver,
    versions: Arc<dyn VersionStore>,
    clock: Arc<dyn Clock>,
    policy: MergeBasePolicy,
    attempts: u32,
}

impl MergeEngine {
    pub fn new(resolver: VersionResolver, versions: Arc<dyn VersionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            versions,
            clock,
            policy: MergeBasePolicy::default(),
            attempts: DEFAULT_MERGE_ATTEMPTS,
        }
    }

    pub fn with_policy(mut self, policy: MergeBasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn policy(&self) -> MergeBasePolicy {
        self.policy
    }

    /// Compute what [`merge`](Self::merge) would do, without writing.
    pub fn preview(&self, request: &MergeRequest) -> Result<MergePreview, MergeError> {
        Ok(self.plan(request)?.preview)
    }

    /// Merge `request.entity` from source into target.
    ///
    /// On success the merged payload is appended to the target branch, even
    /// when it equals the target's current state, so the merge is recorded
    /// in history. On conflict nothing is written.
    pub fn merge(&self, request: &MergeRequest) -> Result<MergeResult, MergeError> {
        self.commit_with_retry(request, |plan| {
            if plan.preview.is_clean() {
                Ok(Some(plan.partial.clone()))
            } else {
                Ok(None)
            }
        })
        .map(|outcome| match outcome {
            Commit::Written(version) => MergeResult::Merged(version),
            Commit::Conflicted(conflicts) => MergeResult::Conflicted(conflicts),
        })
    }

    /// Merge, settling every conflicting path with the caller's choice.
    ///
    /// Each conflicting path must have an entry in `resolutions`; missing
    /// ones are reported together as [`MergeError::UnresolvedConflicts`].
    /// A resolution of JSON `null` stores `null`. Entries for paths that do
    /// not conflict are ignored.
    pub fn merge_with_resolutions(
        &self,
        request: &MergeRequest,
        resolutions: &BTreeMap<String, Value>,
    ) -> Result<Version, MergeError> {
        let outcome = self.commit_with_retry(request, |plan| {
            let missing: Vec<String> = plan
                .preview
                .conflicts
                .iter()
                .filter(|c| !resolutions.contains_key(&c.path))
                .map(|c| c.path.clone())
                .collect();
            if !missing.is_empty() {
                return Err(MergeError::UnresolvedConflicts(missing));
            }

            let mut payload = plan.partial.clone();
            for conflict in &plan.preview.conflicts {
                if let Some(value) = resolutions.get(&conflict.path) {
                    payload.insert(conflict.path.clone(), value.clone());
                }
            }
            let ignored = resolutions
                .keys()
                .filter(|path| !plan.preview.conflicts.iter().any(|c| &&c.path == path))
                .count();
            if ignored > 0 {
                debug!(ignored, "resolutions supplied for non-conflicting paths");
            }
            Ok(Some(payload))
        })?;

        match outcome {
            Commit::Written(version) => Ok(version),
            // Every conflict has a resolution, so the closure always commits.
            Commit::Conflicted(conflicts) => Err(MergeError::UnresolvedConflicts(
                conflicts.into_iter().map(|c| c.path).collect(),
            )),
        }
    }

    /// Plan, let `decide` pick the payload (or decline on conflicts), then
    /// append with a compare-and-swap on both branches' heads. A lost race
    /// replans from scratch.
    fn commit_with_retry<F>(&self, request: &MergeRequest, decide: F) -> Result<Commit, MergeError>
    where
        F: Fn(&MergePlan) -> Result<Option<Payload>, MergeError>,
    {
        let mut attempt = 1;
        loop {
            let plan = self.plan(request)?;
            let Some(payload) = decide(&plan)? else {
                info!(
                    entity = %request.entity,
                    source = %request.source,
                    target = %request.target,
                    conflicts = plan.preview.conflicts.len(),
                    "merge has conflicts; nothing written"
                );
                return Ok(Commit::Conflicted(plan.preview.conflicts));
            };

            let comment = request
                .comment
                .clone()
                .unwrap_or_else(|| format!("Merged from branch {}", plan.source_name));
            let new_version = NewVersion::new(plan.target_key.clone(), payload, request.created_by.clone())
                .with_comment(comment)
                .with_effective_from(request.effective_from);
            let guards = [HeadGuard {
                key: plan.source_key.clone(),
                expected: plan.source_head,
            }];

            match self
                .versions
                .compare_and_append(&new_version, plan.target_head, &guards)
            {
                Ok(version) => {
                    info!(
                        entity = %request.entity,
                        source = %request.source,
                        target = %request.target,
                        version = version.version_number,
                        "merged entity"
                    );
                    return Ok(Commit::Written(version));
                }
                Err(StoreError::ConcurrentModification { .. }) if attempt < self.attempts => {
                    warn!(
                        entity = %request.entity,
                        target = %request.target,
                        attempt,
                        "merge lost compare-and-swap race; replanning"
                    );
                    attempt += 1;
                }
                Err(StoreError::ConcurrentModification { .. }) => {
                    return Err(MergeError::ConcurrentModification {
                        target: request.target,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn plan(&self, request: &MergeRequest) -> Result<MergePlan, MergeError> {
        if request.source == request.target {
            return Err(MergeError::SameBranch(request.source));
        }
        let tree = self.resolver.tree();
        let source_chain = tree.ancestor_chain(&request.source)?;
        let target_chain = tree.ancestor_chain(&request.target)?;
        let ancestor = tree.common_ancestor(&request.source, &request.target)?;
        let as_of = request.as_of.unwrap_or_else(|| self.clock.now());

        let fork_points = [
            fork_point(&source_chain, &ancestor.id),
            fork_point(&target_chain, &ancestor.id),
        ];
        let base_at = match fork_points {
            [Some(a), Some(b)] => self.policy.pick(a, b),
            [Some(one), None] | [None, Some(one)] => one,
            [None, None] => as_of,
        }
        .min(as_of);

        // Read heads before payloads so a write slipping in between is
        // caught by the compare-and-swap rather than silently merged over.
        let source_key = VersionKey::new(request.entity.clone(), request.source);
        let target_key = VersionKey::new(request.entity.clone(), request.target);
        let source_head = self.versions.head_number(&source_key)?;
        let target_head = self.versions.head_number(&target_key)?;

        let base = self.side(&request.entity, ancestor.id, base_at)?;
        let source = self.side(&request.entity, request.source, as_of)?;
        let target = self.side(&request.entity, request.target, as_of)?;
        if !base.exists() && !source.exists() && !target.exists() {
            return Err(MergeError::EntityNeverExisted {
                entity: request.entity.clone(),
                source_branch: request.source,
                target_branch: request.target,
            });
        }

        let outcome = three_way(&base.payload, &source.payload, &target.payload);
        debug!(
            entity = %request.entity,
            base_branch = %ancestor.id,
            base_at = %base_at,
            conflicts = outcome.conflicts.len(),
            "planned merge"
        );

        let source_name = source_chain
            .first()
            .map(|b| b.name.clone())
            .unwrap_or_default();
        let merged = outcome.conflicts.is_empty().then(|| outcome.merged.clone());
        Ok(MergePlan {
            preview: MergePreview {
                entity: request.entity.clone(),
                base,
                source,
                target,
                source_changes: outcome.source_changes,
                target_changes: outcome.target_changes,
                merged,
                conflicts: outcome.conflicts,
            },
            partial: outcome.merged,
            source_key,
            source_head,
            target_key,
            target_head,
            source_name,
        })
    }

    fn side(&self, entity: &EntityKey, branch: BranchId, at: Timestamp) -> Result<MergeSide, MergeError> {
        let version = self.resolver.find_version(entity, &branch, at)?;
        Ok(match version {
            Some(v) => MergeSide {
                branch_id: branch,
                as_of: at,
                version_id: Some(v.id),
                version_number: Some(v.version_number),
                payload: v.payload,
            },
            None => MergeSide {
                branch_id: branch,
                as_of: at,
                version_id: None,
                version_number: None,
                payload: Payload::new(),
            },
        })
    }
}

enum Commit {
    Written(Version),
    Conflicted(Vec<crate::types::ConflictField>),
}

/// When the branch on `chain` just below `ancestor` forked from it; `None`
/// if the chain starts at `ancestor` itself.
fn fork_point(chain: &[Branch], ancestor: &BranchId) -> Option<Timestamp> {
    let position = chain.iter().position(|b| &b.id == ancestor)?;
    position
        .checked_sub(1)
        .and_then(|below| chain[below].diverged_at)
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("policy", &self.policy)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use ctl_branch::BranchTree;
    use ctl_store::{HistoryCursor, HistoryPage, InMemoryVersionStore, StoreResult};
    use ctl_types::{ManualClock, VersionId};
    use serde_json::json;

    use crate::types::ConflictField;

    /// Lets a competing writer win the race before each of the first
    /// `races` merge commits, on the source branch when `on_source` is set
    /// and on the target otherwise.
    struct RacingStore {
        inner: InMemoryVersionStore,
        races: AtomicU32,
        on_source: bool,
    }

    impl RacingStore {
        fn new(clock: Arc<ManualClock>, on_source: bool) -> Self {
            Self {
                inner: InMemoryVersionStore::with_clock(clock),
                races: AtomicU32::new(0),
                on_source,
            }
        }
    }

    impl VersionStore for RacingStore {
        fn compare_and_append(
            &self,
            request: &NewVersion,
            expected_head: Option<u64>,
            guards: &[HeadGuard],
        ) -> StoreResult<Version> {
            if !guards.is_empty() && self.races.load(Ordering::SeqCst) > 0 {
                let n = self.races.fetch_sub(1, Ordering::SeqCst);
                let key = if self.on_source { &guards[0].key } else { &request.key };
                let head = self.inner.head(key)?;
                let mut rival = head.as_ref().map(|v| v.payload.clone()).unwrap_or_default();
                rival.insert(format!("rival_{n}"), json!(n));
                let rival = NewVersion::new(key.clone(), rival, "rival")
                    .with_effective_from(head.map(|v| v.valid_from.plus_millis(1)));
                self.inner.append(&rival)?;
            }
            self.inner.compare_and_append(request, expected_head, guards)
        }
        fn head(&self, key: &VersionKey) -> StoreResult<Option<Version>> {
            self.inner.head(key)
        }
        fn get(&self, id: &VersionId) -> StoreResult<Option<Version>> {
            self.inner.get(id)
        }
        fn history_page(
            &self,
            key: &VersionKey,
            cursor: Option<HistoryCursor>,
            limit: usize,
        ) -> StoreResult<HistoryPage> {
            self.inner.history_page(key, cursor, limit)
        }
        fn version_at(&self, key: &VersionKey, time: Timestamp) -> StoreResult<Option<Version>> {
            self.inner.version_at(key, time)
        }
        fn keys_on_branch(&self, branch: &BranchId) -> StoreResult<Vec<VersionKey>> {
            self.inner.keys_on_branch(branch)
        }
        fn remove_branch(&self, branch: &BranchId) -> StoreResult<usize> {
            self.inner.remove_branch(branch)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        versions: Arc<dyn VersionStore>,
        tree: BranchTree,
        engine: MergeEngine,
        main: Branch,
    }

    fn fixture_with(versions: Arc<dyn VersionStore>, clock: Arc<ManualClock>) -> Fixture {
        let tree = BranchTree::in_memory(versions.clone(), clock.clone());
        let main = tree.init_root("main").unwrap();
        let resolver = VersionResolver::new(tree.clone(), versions.clone(), clock.clone());
        let engine = MergeEngine::new(resolver, versions.clone(), clock.clone());
        Fixture {
            clock,
            versions,
            tree,
            engine,
            main,
        }
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_millis(0));
        let versions = Arc::new(InMemoryVersionStore::with_clock(clock.clone()));
        fixture_with(versions, clock)
    }

    fn settlement() -> EntityKey {
        EntityKey::new("settlement", "riverford")
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    impl Fixture {
        fn write(&self, branch: BranchId, at: i64, value: serde_json::Value) -> Version {
            self.versions
                .append(
                    &NewVersion::new(
                        VersionKey::new(settlement(), branch),
                        Payload::try_from(value).unwrap(),
                        "gm",
                    )
                    .effective_from(ts(at)),
                )
                .unwrap()
        }

        fn fork(&self, parent: BranchId, name: &str, at: i64) -> Branch {
            self.tree.fork_at(&parent, name, None, ts(at)).unwrap()
        }

        fn request(&self, source: BranchId, target: BranchId) -> MergeRequest {
            self.clock.set(ts(1_000));
            MergeRequest::new(source, target, settlement(), "gm")
        }

        fn target_head(&self, branch: BranchId) -> Option<u64> {
            self.versions
                .head_number(&VersionKey::new(settlement(), branch))
                .unwrap()
        }
    }

    #[test]
    fn disjoint_changes_merge_into_target() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "Branch-A", 100);
        fx.write(fx.main.id, 200, json!({"level": 3}));
        fx.write(alt.id, 300, json!({"level": 2, "population": 1500}));

        let result = fx.engine.merge(&fx.request(alt.id, fx.main.id)).unwrap();
        let MergeResult::Merged(version) = result else {
            panic!("expected a clean merge");
        };
        assert_eq!(version.branch_id, fx.main.id);
        assert_eq!(version.version_number, 3);
        assert_eq!(version.payload.get("level"), Some(&json!(3)));
        assert_eq!(version.payload.get("population"), Some(&json!(1500)));
        assert_eq!(version.comment.as_deref(), Some("Merged from branch Branch-A"));
        assert_eq!(version.valid_from, ts(1_000));
    }

    #[test]
    fn divergent_changes_conflict_without_side_effects() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(fx.main.id, 200, json!({"level": 3}));
        fx.write(alt.id, 300, json!({"level": 4}));

        let before = fx.target_head(fx.main.id);
        let result = fx.engine.merge(&fx.request(alt.id, fx.main.id)).unwrap();
        assert_eq!(
            result.conflicts(),
            &[ConflictField {
                path: "level".into(),
                base_value: Some(json!(2)),
                source_value: Some(json!(4)),
                target_value: Some(json!(3)),
            }]
        );
        assert!(!result.is_merged());
        assert_eq!(fx.target_head(fx.main.id), before);
    }

    #[test]
    fn resolutions_settle_conflicts() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 2, "ruler": "Aldric"}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(fx.main.id, 200, json!({"level": 3, "ruler": "Bran"}));
        fx.write(alt.id, 300, json!({"level": 4, "ruler": "Ysolde"}));

        let request = fx.request(alt.id, fx.main.id).with_comment("GM ruling");
        let err = fx
            .engine
            .merge_with_resolutions(&request, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::UnresolvedConflicts(vec!["level".into(), "ruler".into()])
        );

        let mut resolutions = BTreeMap::new();
        resolutions.insert("level".to_string(), json!(5));
        resolutions.insert("ruler".to_string(), json!(null));
        resolutions.insert("unrelated".to_string(), json!("ignored"));
        let version = fx.engine.merge_with_resolutions(&request, &resolutions).unwrap();
        assert_eq!(
            version.payload,
            Payload::try_from(json!({"level": 5, "ruler": null})).unwrap()
        );
        assert_eq!(version.comment.as_deref(), Some("GM ruling"));
    }

    #[test]
    fn resolutions_without_conflicts_merge_normally() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 3}));
        let version = fx
            .engine
            .merge_with_resolutions(&fx.request(alt.id, fx.main.id), &BTreeMap::new())
            .unwrap();
        assert_eq!(version.payload.get("level"), Some(&json!(3)));
    }

    #[test]
    fn preview_writes_nothing() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 3}));

        let preview = fx.engine.preview(&fx.request(alt.id, fx.main.id)).unwrap();
        assert!(preview.is_clean());
        assert_eq!(preview.base.branch_id, fx.main.id);
        assert_eq!(preview.base.as_of, ts(100));
        assert_eq!(preview.source.branch_id, alt.id);
        assert_eq!(preview.source_changes.modified.len(), 1);
        assert!(preview.target_changes.is_empty());
        assert_eq!(
            preview.merged.as_ref().and_then(|p| p.get("level")),
            Some(&json!(3))
        );
        assert_eq!(fx.target_head(fx.main.id), Some(1));
    }

    #[test]
    fn entity_created_on_source_lands_on_target() {
        let fx = fixture();
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 1}));

        let result = fx.engine.merge(&fx.request(alt.id, fx.main.id)).unwrap();
        let MergeResult::Merged(version) = result else {
            panic!("expected a clean merge");
        };
        assert_eq!(version.version_number, 1);
        assert_eq!(version.payload.get("level"), Some(&json!(1)));
    }

    #[test]
    fn missing_everywhere_is_an_error() {
        let fx = fixture();
        let alt = fx.fork(fx.main.id, "alt", 100);
        assert!(matches!(
            fx.engine.merge(&fx.request(alt.id, fx.main.id)),
            Err(MergeError::EntityNeverExisted { .. })
        ));
    }

    #[test]
    fn same_branch_is_rejected() {
        let fx = fixture();
        assert_eq!(
            fx.engine.merge(&fx.request(fx.main.id, fx.main.id)).unwrap_err(),
            MergeError::SameBranch(fx.main.id)
        );
    }

    #[test]
    fn base_policy_picks_fork_point() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 1}));
        let a = fx.fork(fx.main.id, "a", 150);
        fx.write(fx.main.id, 200, json!({"level": 2}));
        let b = fx.fork(fx.main.id, "b", 250);

        // Latest fork: base is main at 250 (level 2), so a's view is a change.
        let latest = fx.engine.preview(&fx.request(a.id, b.id)).unwrap();
        assert_eq!(latest.base.as_of, ts(250));
        assert_eq!(latest.merged.unwrap().get("level"), Some(&json!(1)));

        // Earliest fork: base is main at 150 (level 1), so b's view is the change.
        let earliest = fx
            .engine
            .clone()
            .with_policy(MergeBasePolicy::EarliestFork)
            .preview(&fx.request(a.id, b.id))
            .unwrap();
        assert_eq!(earliest.base.as_of, ts(150));
        assert_eq!(earliest.merged.unwrap().get("level"), Some(&json!(2)));
    }

    #[test]
    fn merging_into_a_descendant_uses_its_fork_point() {
        let fx = fixture();
        fx.write(fx.main.id, 100, json!({"level": 1, "walls": "wood"}));
        let alt = fx.fork(fx.main.id, "alt", 150);
        fx.write(fx.main.id, 200, json!({"level": 2, "walls": "wood"}));
        fx.write(alt.id, 300, json!({"level": 1, "walls": "stone"}));

        let result = fx.engine.merge(&fx.request(fx.main.id, alt.id)).unwrap();
        let MergeResult::Merged(version) = result else {
            panic!("expected a clean merge");
        };
        assert_eq!(version.branch_id, alt.id);
        assert_eq!(
            version.payload,
            Payload::try_from(json!({"level": 2, "walls": "stone"})).unwrap()
        );
        assert_eq!(version.comment.as_deref(), Some("Merged from branch main"));
    }

    #[test]
    fn lost_race_is_retried() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let racing = Arc::new(RacingStore::new(clock.clone(), false));
        let fx = fixture_with(racing.clone(), clock);
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 3}));

        let request = fx.request(alt.id, fx.main.id);
        racing.races.store(1, Ordering::SeqCst);
        let result = fx.engine.merge(&request).unwrap();
        let MergeResult::Merged(version) = result else {
            panic!("expected a clean merge");
        };
        assert_eq!(version.version_number, 3);
        assert_eq!(version.payload.get("rival_1"), Some(&json!(1)));
        assert_eq!(version.payload.get("level"), Some(&json!(3)));
    }

    #[test]
    fn source_write_between_plan_and_commit_is_replanned() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let racing = Arc::new(RacingStore::new(clock.clone(), true));
        let fx = fixture_with(racing.clone(), clock);
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 3}));

        let request = fx.request(alt.id, fx.main.id);
        racing.races.store(1, Ordering::SeqCst);
        let MergeResult::Merged(version) = fx.engine.merge(&request).unwrap() else {
            panic!("expected a clean merge");
        };
        // The source moved to v2; the replanned merge carries its change
        // and the target saw no other writer.
        assert_eq!(fx.target_head(alt.id), Some(2));
        assert_eq!(version.version_number, 2);
        assert_eq!(version.payload.get("rival_1"), Some(&json!(1)));
        assert_eq!(version.payload.get("level"), Some(&json!(3)));
        assert_eq!(racing.races.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn persistent_races_surface_concurrent_modification() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let racing = Arc::new(RacingStore::new(clock.clone(), false));
        let fx = fixture_with(racing.clone(), clock);
        fx.write(fx.main.id, 100, json!({"level": 2}));
        let alt = fx.fork(fx.main.id, "alt", 100);
        fx.write(alt.id, 300, json!({"level": 3}));

        let request = fx.request(alt.id, fx.main.id);
        racing.races.store(DEFAULT_MERGE_ATTEMPTS, Ordering::SeqCst);
        let before = fx.target_head(fx.main.id);
        assert_eq!(
            fx.engine.merge(&request).unwrap_err(),
            MergeError::ConcurrentModification {
                target: fx.main.id,
                attempts: DEFAULT_MERGE_ATTEMPTS,
            }
        );
        // Only the rivals' writes landed.
        assert_eq!(
            fx.target_head(fx.main.id),
            before.map(|n| n + u64::from(DEFAULT_MERGE_ATTEMPTS))
        );
    }
}
