//! Restoring an entity to a historical version, additively.

use std::sync::Arc;

use ctl_resolve::VersionResolver;
use ctl_store::{NewVersion, Version, VersionKey, VersionStore, DEFAULT_APPEND_ATTEMPTS};
use ctl_types::{BranchId, EntityKey, Timestamp, VersionId};
use tracing::info;

use crate::error::{CtlError, CtlResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreRequest {
    pub entity: EntityKey,
    pub branch: BranchId,
    pub version_id: VersionId,
    /// Defaults to `"Restored from version N"`.
    pub comment: Option<String>,
    pub created_by: String,
    pub effective_from: Option<Timestamp>,
}

impl RestoreRequest {
    pub fn new(
        entity: EntityKey,
        branch: BranchId,
        version_id: VersionId,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            branch,
            version_id,
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

/// Appends a copy of a historical version's payload. The target version is
/// never touched; the restore itself becomes part of history.
#[derive(Clone)]
pub struct RestoreService {
    resolver: VersionResolver,
    versions: Arc<dyn VersionStore>,
    attempts: u32,
}

impl RestoreService {
    pub fn new(resolver: VersionResolver, versions: Arc<dyn VersionStore>) -> Self {
        Self {
            resolver,
            versions,
            attempts: DEFAULT_APPEND_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn restore_to(&self, request: &RestoreRequest) -> CtlResult<Version> {
        let target = self
            .versions
            .get(&request.version_id)?
            .ok_or(CtlError::VersionNotFound(request.version_id))?;

        if target.entity != request.entity {
            return Err(CtlError::EntityMismatch {
                version: target.id,
                expected: request.entity.clone(),
                found: target.entity,
            });
        }
        let in_ancestry = self
            .resolver
            .tree()
            .ancestor_chain(&request.branch)?
            .iter()
            .any(|b| b.id == target.branch_id);
        if !in_ancestry {
            return Err(CtlError::VersionNotInAncestry {
                version: target.id,
                branch: request.branch,
            });
        }

        let comment = request
            .comment
            .clone()
            .unwrap_or_else(|| format!("Restored from version {}", target.version_number));
        let new_version = NewVersion::new(
            VersionKey::new(request.entity.clone(), request.branch),
            target.payload.clone(),
            request.created_by.clone(),
        )
        .with_comment(comment)
        .with_effective_from(request.effective_from);

        let version = self.versions.append_with_attempts(&new_version, self.attempts)?;
        info!(
            entity = %request.entity,
            branch = %request.branch,
            restored = target.version_number,
            version = version.version_number,
            "restored version"
        );
        Ok(version)
    }
}

impl std::fmt::Debug for RestoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreService")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_branch::BranchTree;
    use ctl_store::InMemoryVersionStore;
    use ctl_types::{ManualClock, Payload};
    use serde_json::json;

    struct Fixture {
        versions: Arc<InMemoryVersionStore>,
        tree: BranchTree,
        service: RestoreService,
        main: BranchId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_millis(0));
        let versions = Arc::new(InMemoryVersionStore::with_clock(clock.clone()));
        let tree = BranchTree::in_memory(versions.clone(), clock.clone());
        let main = tree.init_root("main").unwrap().id;
        let resolver = VersionResolver::new(tree.clone(), versions.clone(), clock);
        let service = RestoreService::new(resolver, versions.clone());
        Fixture {
            versions,
            tree,
            service,
            main,
        }
    }

    fn entity() -> EntityKey {
        EntityKey::new("structure", "watchtower")
    }

    fn write(fx: &Fixture, branch: BranchId, at: i64, value: serde_json::Value) -> Version {
        fx.versions
            .append(
                &NewVersion::new(
                    VersionKey::new(entity(), branch),
                    Payload::try_from(value).unwrap(),
                    "gm",
                )
                .effective_from(Timestamp::from_millis(at)),
            )
            .unwrap()
    }

    #[test]
    fn restore_appends_copy_with_default_comment() {
        let fx = fixture();
        let v1 = write(&fx, fx.main, 10, json!({"hp": 100}));
        write(&fx, fx.main, 20, json!({"hp": 40}));

        let request = RestoreRequest::new(entity(), fx.main, v1.id, "gm")
            .effective_from(Timestamp::from_millis(30));
        let restored = fx.service.restore_to(&request).unwrap();

        assert_eq!(restored.version_number, 3);
        assert_eq!(restored.payload, v1.payload);
        assert_eq!(restored.comment.as_deref(), Some("Restored from version 1"));
        // The target version is untouched apart from its original close.
        let original = fx.versions.get(&v1.id).unwrap().unwrap();
        assert_eq!(original.payload, v1.payload);
        assert_eq!(original.valid_to, Some(Timestamp::from_millis(20)));
    }

    #[test]
    fn restore_from_ancestor_onto_child() {
        let fx = fixture();
        let v1 = write(&fx, fx.main, 10, json!({"hp": 100}));
        let child = fx.tree.fork(&fx.main, "alt", None).unwrap();
        let restored = fx
            .service
            .restore_to(&RestoreRequest::new(entity(), child.id, v1.id, "gm").with_comment("rebuilt"))
            .unwrap();
        assert_eq!(restored.branch_id, child.id);
        assert_eq!(restored.version_number, 1);
        assert_eq!(restored.comment.as_deref(), Some("rebuilt"));
    }

    #[test]
    fn sibling_versions_are_out_of_reach() {
        let fx = fixture();
        let a = fx.tree.fork(&fx.main, "a", None).unwrap();
        let b = fx.tree.fork(&fx.main, "b", None).unwrap();
        let on_a = write(&fx, a.id, 10, json!({"hp": 1}));

        let err = fx
            .service
            .restore_to(&RestoreRequest::new(entity(), b.id, on_a.id, "gm"))
            .unwrap_err();
        assert!(matches!(err, CtlError::VersionNotInAncestry { .. }));

        // Nor can a parent reach into a child.
        let err = fx
            .service
            .restore_to(&RestoreRequest::new(entity(), fx.main, on_a.id, "gm"))
            .unwrap_err();
        assert!(matches!(err, CtlError::VersionNotInAncestry { .. }));
    }

    #[test]
    fn wrong_entity_and_unknown_version() {
        let fx = fixture();
        let v1 = write(&fx, fx.main, 10, json!({"hp": 100}));
        let other = EntityKey::new("structure", "gatehouse");
        assert!(matches!(
            fx.service
                .restore_to(&RestoreRequest::new(other, fx.main, v1.id, "gm")),
            Err(CtlError::EntityMismatch { .. })
        ));
        assert!(matches!(
            fx.service
                .restore_to(&RestoreRequest::new(entity(), fx.main, VersionId::new(), "gm")),
            Err(CtlError::VersionNotFound(_))
        ));
    }
}
