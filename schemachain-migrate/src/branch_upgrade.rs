//! The optional branch-upgrade file.
//!
//! `structure/branch-upgrade.yaml` carries SQL that moves a database from
//! this chain's tip onto another branch's chain:
//!
//! ```yaml
//! starting from: 2024-01-02 b
//! resulting branch: release-2
//! completes migration to: 2024-01-05 e
//! sql: ...
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::chain::MigrationChain;
use crate::error::MigrateResult;
use crate::migration::{MigrationId, content_digest, yaml_path};

/// Filename of the branch-upgrade file.
pub const BRANCH_UPGRADE_FILE: &str = "branch-upgrade.yaml";
/// Name an obsoleted branch-upgrade file is moved to.
pub const OBSOLETE_UPGRADE_FILE: &str = "version-upgrade-obsolete.yaml";

#[derive(Debug, Default, Deserialize)]
struct BranchUpgradeFile {
    #[serde(rename = "starting from")]
    starting_from: Option<String>,
    #[serde(rename = "resulting branch")]
    resulting_branch: Option<String>,
    #[serde(rename = "completes migration to")]
    completes_migration_to: Option<String>,
    sql: Option<String>,
}

impl BranchUpgradeFile {
    fn read(path: &Path) -> MigrateResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<Option<Self>>(&text)?.unwrap_or_default())
    }
}

/// A loaded branch-upgrade file. Loading never fails; problems become
/// warnings.
#[derive(Debug, Clone, Default)]
pub struct BranchUpgrade {
    file_path: PathBuf,
    found: bool,
    base_migration: Option<String>,
    target_branch: Option<String>,
    migration_completed: Option<String>,
    sql: Option<String>,
    warnings: Vec<String>,
}

impl BranchUpgrade {
    /// Load the branch-upgrade file of a structure directory.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let file_path = dir.as_ref().join(BRANCH_UPGRADE_FILE);
        let mut upgrade = Self {
            file_path: file_path.clone(),
            ..Self::default()
        };
        if !file_path.is_file() {
            return upgrade;
        }
        upgrade.found = true;

        let file = match BranchUpgradeFile::read(&file_path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to load {}: {}", file_path.display(), e);
                upgrade
                    .warnings
                    .push(format!("Failed to load branch upgrade migration.\n  {}", e));
                return upgrade;
            }
        };

        upgrade.base_migration = file.starting_from;
        upgrade.target_branch = file.resulting_branch.as_deref().map(content_digest);
        upgrade.migration_completed = file.completes_migration_to;
        upgrade.sql = file.sql;
        upgrade
    }

    /// Path of the file, whether or not it exists.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Whether the file exists.
    pub fn found(&self) -> bool {
        self.found
    }

    /// Migration the upgrade starts from.
    pub fn base_migration(&self) -> Option<&str> {
        self.base_migration.as_deref()
    }

    /// Digest of the target branch name.
    pub fn target_branch(&self) -> Option<&str> {
        self.target_branch.as_deref()
    }

    /// Target-chain migration the upgrade completes.
    pub fn migration_completed(&self) -> Option<&str> {
        self.migration_completed.as_deref()
    }

    /// Id of [`Self::migration_completed`].
    pub fn migration_completed_id(&self) -> Option<MigrationId> {
        self.migration_completed.as_deref().map(MigrationId::from_filename)
    }

    /// The upgrade SQL.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Load warnings.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether the upgrade starts from the chain's tip.
    pub fn applicable(&self, chain: &MigrationChain) -> bool {
        let (Some(base), Some(_)) = (&self.base_migration, &self.target_branch) else {
            return false;
        };
        chain
            .latest()
            .is_some_and(|tip| tip.file_name == yaml_path(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn chain_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("head.yaml"), "latest change: 2024-01-01 a\n").unwrap();
        fs::write(temp.path().join("2024-01-01 a.yaml"), "starting from: empty database\n").unwrap();
        temp
    }

    #[test]
    fn test_absent_file() {
        let temp = chain_dir();
        let upgrade = BranchUpgrade::load(temp.path());
        assert!(!upgrade.found());
        assert!(upgrade.warnings().is_empty());
    }

    #[test]
    fn test_applicable_at_tip() {
        let temp = chain_dir();
        fs::write(
            temp.path().join(BRANCH_UPGRADE_FILE),
            "starting from: 2024-01-01 a\nresulting branch: release\ncompletes migration to: 2024-02-01 z\nsql: SELECT 1;\n",
        )
        .unwrap();
        let upgrade = BranchUpgrade::load(temp.path());
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert!(upgrade.found());
        assert!(upgrade.applicable(&chain));
        assert_eq!(upgrade.target_branch(), Some(content_digest("release").as_str()));
        assert_eq!(
            upgrade.migration_completed_id(),
            Some(MigrationId::from_filename("2024-02-01 z"))
        );
    }

    #[test]
    fn test_stale_upgrade_not_applicable() {
        let temp = chain_dir();
        fs::write(
            temp.path().join(BRANCH_UPGRADE_FILE),
            "starting from: 2023-12-31 old\nresulting branch: release\n",
        )
        .unwrap();
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert!(!BranchUpgrade::load(temp.path()).applicable(&chain));
    }

    #[test]
    fn test_malformed_file_becomes_warning() {
        let temp = chain_dir();
        fs::write(temp.path().join(BRANCH_UPGRADE_FILE), "- not\n- a mapping\n").unwrap();
        let upgrade = BranchUpgrade::load(temp.path());
        assert!(upgrade.found());
        assert_eq!(upgrade.warnings().len(), 1);
    }
}
