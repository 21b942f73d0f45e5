//! Whether the working state may produce a production script.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::chain::MigrationChain;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::HEAD_FILE;
use crate::vcs::{FileStatus, VersionControl};

/// Approves production script generation.
pub struct ProductionEligibilityChecker<'a> {
    vcs: &'a dyn VersionControl,
}

impl<'a> ProductionEligibilityChecker<'a> {
    /// Create a checker over a version-control collaborator.
    pub fn new(vcs: &'a dyn VersionControl) -> Self {
        Self { vcs }
    }

    /// Fail unless every chain file is committed unchanged, no migration
    /// was modified after its introduction, and the current revision is on
    /// the production lineage.
    pub fn check(&self, chain: &MigrationChain) -> MigrateResult<()> {
        let mut files: Vec<PathBuf> = chain.migrations().iter().map(|m| m.file_path.clone()).collect();
        let head_file = chain.directory().join(HEAD_FILE);
        if head_file.is_file() {
            files.push(head_file);
        }

        for file in &files {
            let status = self.vcs.status(file)?;
            if status != FileStatus::Clean {
                debug!("{} is {}", file.display(), status);
                return Err(MigrationError::version_control(
                    "Some source files differ from their committed versions",
                ));
            }
        }

        for migration in chain.migrations() {
            if self.vcs.file_history(&migration.file_path)?.len() > 1 {
                return Err(MigrationError::version_control(format!(
                    "'{}' has been modified in the current branch of the repository since its introduction",
                    migration.file_path.display()
                )));
            }
        }

        let current = self.vcs.current_revision()?;
        if !self.vcs.is_on_production_lineage(&current)? {
            return Err(MigrationError::version_control(
                "The working tree is not a commit in the production history",
            ));
        }

        info!("Working tree at {} is eligible for a production script", current);
        Ok(())
    }
}
