//! Repairing a chain forked by a version-control merge.
//!
//! When two branches each append a migration, the merged `head.yaml`
//! conflicts. The fix keeps one branch's history as the trunk and splices
//! the other branch's post-fork migrations onto its end:
//!
//! ```text
//! A -> B -> C          (ours)
//!        \-> D         (theirs)
//!
//! A -> B -> C -> D     (D now starts from C; head points at D)
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::chain::{ChainHead, MigrationChain};
use crate::declarative::{DeclarativeStatusResolver, PRE_UNBRANCH};
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{
    FOLLOWS, HEAD_FILE, LATEST_CHANGE, MigrationDocument, MigrationRecord, yaml_path,
};
use crate::vcs::{BranchUse, ConflictStage, FileStatus, VersionControl};

/// Revision recorded under `pre-unbranch` when a migration was never committed.
const NONEXISTENT: &str = "nonexistent";

/// The rewritten predecessor link of the first post-fork migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationTweak {
    /// Filename of the migration to rewrite.
    pub file_name: String,
    /// Its document with `starting from` pointing at the trunk head.
    pub document: MigrationDocument,
}

/// What [`BranchConflict::fix`] wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictFix {
    /// Merged head pointer.
    pub head: ChainHead,
    /// Path of the rewritten migration.
    pub rewritten: PathBuf,
    /// Implementing migrations marked `pre-unbranch`.
    pub decohered: Vec<PathBuf>,
}

/// Two competing chain heads left by a merge.
#[derive(Debug, Clone)]
pub struct BranchConflict {
    dir: PathBuf,
    branch_point: String,
    ours: ChainHead,
    theirs: ChainHead,
    branch_use: BranchUse,
    warnings: Vec<String>,
}

impl BranchConflict {
    /// Create a conflict in structure directory `dir`. `ours` is kept as the
    /// trunk; `theirs` is spliced onto it.
    pub fn new(dir: impl Into<PathBuf>, branch_point: &str, ours: ChainHead, theirs: ChainHead) -> Self {
        Self {
            dir: dir.into(),
            branch_point: yaml_path(branch_point),
            ours,
            theirs,
            branch_use: BranchUse::Undefined,
            warnings: Vec::new(),
        }
    }

    /// Read a head conflict from the merge stages of `head.yaml`.
    ///
    /// Returns `None` unless base, ours and theirs are all present. When the
    /// merge pulls from upstream, the upstream side becomes the trunk.
    pub fn detect(dir: impl AsRef<Path>, vcs: &dyn VersionControl) -> MigrateResult<Option<Self>> {
        let dir = dir.as_ref();
        let head_file = dir.join(HEAD_FILE);

        let stage = |s: ConflictStage| -> MigrateResult<Option<ChainHead>> {
            match vcs.conflict_content(&head_file, s)? {
                Some(text) => Ok(Some(ChainHead::from_document(MigrationDocument::parse(
                    &format!("{}:{}", s.number(), head_file.display()),
                    &text,
                )?))),
                None => Ok(None),
            }
        };

        let (Some(base), Some(mut ours), Some(mut theirs)) = (
            stage(ConflictStage::Base)?,
            stage(ConflictStage::Ours)?,
            stage(ConflictStage::Theirs)?,
        ) else {
            debug!("{} is not in a three-way conflict", head_file.display());
            return Ok(None);
        };

        if vcs.merging_from_upstream()? {
            debug!("Merging from upstream; upstream history becomes the trunk");
            std::mem::swap(&mut ours, &mut theirs);
        }

        let branch_point = base.latest_change().ok_or_else(|| {
            MigrationError::version_control(format!(
                "base version of {} names no {}",
                head_file.display(),
                LATEST_CHANGE
            ))
        })?;

        let mut conflict = Self::new(dir, &branch_point, ours, theirs);
        conflict.set_branch_use(vcs.branch_use()?);
        Ok(Some(conflict))
    }

    /// The structure directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Last migration both branches share.
    pub fn branch_point(&self) -> &str {
        &self.branch_point
    }

    /// The trunk head.
    pub fn ours(&self) -> &ChainHead {
        &self.ours
    }

    /// The spliced head.
    pub fn theirs(&self) -> &ChainHead {
        &self.theirs
    }

    /// How the current branch is used.
    pub fn branch_use(&self) -> BranchUse {
        self.branch_use
    }

    /// Record how the branch is used. An undetermined use adds an advisory
    /// warning.
    pub fn set_branch_use(&mut self, branch_use: BranchUse) {
        self.branch_use = branch_use;
        if branch_use == BranchUse::Undefined {
            self.warnings.push(
                "Unable to determine whether this branch is used for development or production"
                    .to_string(),
            );
        }
    }

    /// Advisory warnings.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether the heads agree on every shared key but `latest change`.
    pub fn resolvable(&self) -> bool {
        let ours = self.ours.document();
        self.theirs.document().data().iter().all(|(key, value)| {
            if key.as_str() == Some(LATEST_CHANGE) {
                return true;
            }
            match key.as_str().and_then(|k| ours.get(k)) {
                Some(mine) => mine == value,
                None => true,
            }
        })
    }

    /// Find the first migration after the branch point on `theirs` and
    /// point it at the trunk head.
    pub fn migration_tweak(&self) -> MigrateResult<MigrationTweak> {
        let trunk_head = self
            .ours
            .latest_change()
            .ok_or_else(|| MigrationError::unresolvable("the trunk head names no migration"))?;
        let mut current = self
            .theirs
            .latest_change()
            .ok_or_else(|| MigrationError::unresolvable("the merged head names no migration"))?;

        let mut visited = HashSet::new();
        loop {
            if !visited.insert(current.to_uppercase()) {
                return Err(MigrationError::CyclicChain { file: current });
            }
            let record = MigrationRecord::load(self.dir.join(&current))?;
            match record.follows.as_deref() {
                Some(prev) if prev.eq_ignore_ascii_case(&self.branch_point) => {
                    let mut document = record.document;
                    document.insert(FOLLOWS, trunk_head.trim_end_matches(".yaml"));
                    return Ok(MigrationTweak {
                        file_name: current,
                        document,
                    });
                }
                Some(prev) => current = prev.to_string(),
                None => {
                    return Err(MigrationError::unresolvable(format!(
                        "{} does not descend from {}",
                        record.file_name, self.branch_point
                    )));
                }
            }
        }
    }

    /// Head mapping after the merge: ours overlaid with theirs.
    pub fn merged_head(&self) -> ChainHead {
        let mut document = self.ours.document().clone();
        document.merge(self.theirs.document());
        ChainHead::from_document(document)
    }

    /// Write the merged head and the rewritten migration, stage both, then
    /// mark implementing migrations de-cohered by the splice.
    pub fn fix(&self, vcs: &dyn VersionControl, declarative_dir: &Path) -> MigrateResult<ConflictFix> {
        if !self.resolvable() {
            return Err(MigrationError::unresolvable(format!(
                "heads in {} differ in more than {}",
                self.dir.join(HEAD_FILE).display(),
                LATEST_CHANGE
            )));
        }

        let tweak = self.migration_tweak()?;
        let head = self.merged_head();

        head.write(&self.dir)?;
        let rewritten = self.dir.join(&tweak.file_name);
        tweak.document.write(&rewritten)?;
        info!(
            "Spliced {} onto {}",
            tweak.file_name,
            self.ours.latest_change().unwrap_or_default()
        );

        vcs.stage(&self.dir.join(HEAD_FILE))?;
        vcs.stage(&rewritten)?;

        let decohered = self.mark_decohered(vcs, declarative_dir)?;
        Ok(ConflictFix {
            head,
            rewritten,
            decohered,
        })
    }

    fn mark_decohered(&self, vcs: &dyn VersionControl, declarative_dir: &Path) -> MigrateResult<Vec<PathBuf>> {
        let chain = MigrationChain::load(&self.dir)?;
        let resolver = DeclarativeStatusResolver::new(&chain, declarative_dir, vcs);

        let mut marked = Vec::new();
        for (decl_file, link) in resolver.latest_implementations()? {
            let Some(migration) = link.migration() else {
                continue;
            };
            if !decl_file.exists() || vcs.status(&decl_file)? != FileStatus::Modified {
                continue;
            }
            if vcs.status(&migration.file_path)? == FileStatus::Modified {
                continue;
            }

            let revision = vcs
                .latest_revision(&migration.file_path)?
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| NONEXISTENT.to_string());
            let mut document = migration.document.clone();
            document.insert(PRE_UNBRANCH, revision);
            document.write(&migration.file_path)?;
            warn!("Marked {} as de-cohered by the merge", migration.file_name);
            marked.push(migration.file_path.clone());
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::ScriptedVcs;
    use std::fs;
    use tempfile::TempDir;

    fn head(text: &str) -> ChainHead {
        ChainHead::from_document(MigrationDocument::parse("head", text).unwrap())
    }

    fn forked_chain() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("2024-01-01 a.yaml"), "starting from: empty database\nsql: SELECT 1;\n").unwrap();
        fs::write(dir.join("2024-01-02 b.yaml"), "starting from: 2024-01-01 a\nsql: SELECT 2;\n").unwrap();
        fs::write(dir.join("2024-01-03 c.yaml"), "starting from: 2024-01-02 b\nsql: SELECT 3;\n").unwrap();
        fs::write(dir.join("2024-01-03 d.yaml"), "starting from: 2024-01-02 b\nsql: SELECT 4;\n").unwrap();
        temp
    }

    #[test]
    fn test_resolvable_ignores_latest_change() {
        let conflict = BranchConflict::new(
            "/s",
            "2024-01-02 b",
            head("latest change: 2024-01-03 c\nowner: x\n"),
            head("latest change: 2024-01-03 d\nowner: x\nextra: y\n"),
        );
        assert!(conflict.resolvable());

        let conflict = BranchConflict::new(
            "/s",
            "2024-01-02 b",
            head("latest change: 2024-01-03 c\nowner: x\n"),
            head("latest change: 2024-01-03 d\nowner: z\n"),
        );
        assert!(!conflict.resolvable());
    }

    #[test]
    fn test_tweak_splices_theirs_onto_ours() {
        let temp = forked_chain();
        let conflict = BranchConflict::new(
            temp.path(),
            "2024-01-02 b",
            head("latest change: 2024-01-03 c\n"),
            head("latest change: 2024-01-03 d\n"),
        );
        let tweak = conflict.migration_tweak().unwrap();
        assert_eq!(tweak.file_name, "2024-01-03 d.yaml");
        assert_eq!(tweak.document.get_str(FOLLOWS), Some("2024-01-03 c"));
    }

    #[test]
    fn test_fix_writes_head_and_migration() {
        let temp = forked_chain();
        let vcs = ScriptedVcs::default();
        let conflict = BranchConflict::new(
            temp.path(),
            "2024-01-02 b",
            head("latest change: 2024-01-03 c\n"),
            head("latest change: 2024-01-03 d\n"),
        );
        let fix = conflict.fix(&vcs, &temp.path().join("declarative")).unwrap();
        assert_eq!(fix.head.latest_change().as_deref(), Some("2024-01-03 d.yaml"));
        assert!(fix.decohered.is_empty());
        assert_eq!(
            vcs.staged(),
            vec![temp.path().join(HEAD_FILE), temp.path().join("2024-01-03 d.yaml")]
        );

        let chain = MigrationChain::load(temp.path()).unwrap();
        let names: Vec<_> = chain.migrations().iter().map(|m| m.basename()).collect();
        assert_eq!(names, vec!["2024-01-01 a", "2024-01-02 b", "2024-01-03 c", "2024-01-03 d"]);
        assert!(chain.ensure_valid().is_ok());
    }

    #[test]
    fn test_fix_refuses_unresolvable() {
        let temp = forked_chain();
        let conflict = BranchConflict::new(
            temp.path(),
            "2024-01-02 b",
            head("latest change: 2024-01-03 c\nowner: x\n"),
            head("latest change: 2024-01-03 d\nowner: y\n"),
        );
        let err = conflict.fix(&ScriptedVcs::default(), temp.path()).unwrap_err();
        assert!(matches!(err, MigrationError::UnresolvableConflict(_)));
    }

    #[test]
    fn test_detect_from_merge_stages() {
        let temp = forked_chain();
        let vcs = ScriptedVcs::default();
        let head_file = temp.path().join(HEAD_FILE);
        vcs.set_conflict(&head_file, ConflictStage::Base, "latest change: 2024-01-02 b\n");
        vcs.set_conflict(&head_file, ConflictStage::Ours, "latest change: 2024-01-03 c\n");
        vcs.set_conflict(&head_file, ConflictStage::Theirs, "latest change: 2024-01-03 d\n");

        let conflict = BranchConflict::detect(temp.path(), &vcs).unwrap().unwrap();
        assert_eq!(conflict.branch_point(), "2024-01-02 b.yaml");
        assert_eq!(conflict.ours().latest_change().as_deref(), Some("2024-01-03 c.yaml"));
        assert_eq!(conflict.branch_use(), BranchUse::Undefined);
        assert_eq!(conflict.warnings().len(), 1);

        vcs.set_merging_from_upstream(true);
        let conflict = BranchConflict::detect(temp.path(), &vcs).unwrap().unwrap();
        assert_eq!(conflict.ours().latest_change().as_deref(), Some("2024-01-03 d.yaml"));
    }

    #[test]
    fn test_detect_without_conflict() {
        let temp = forked_chain();
        assert!(BranchConflict::detect(temp.path(), &ScriptedVcs::default()).unwrap().is_none());
    }
}
