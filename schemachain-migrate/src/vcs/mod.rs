//! Version control collaborator interface.
//!
//! Status resolution, conflict repair and production checks only ever talk
//! to a [`VersionControl`] implementation; the backend is chosen once when
//! the caller builds its components.

mod git;
#[cfg(any(test, feature = "testing"))]
mod scripted;

use std::fmt;
use std::path::Path;

use crate::error::MigrateResult;

pub use git::GitVcs;
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedVcs;

/// Working-copy status of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    /// Matches the latest committed content.
    Clean,
    /// Scheduled for addition but never committed.
    Added,
    /// Committed, with local modifications.
    Modified,
    /// Committed, but removed from the working copy.
    Deleted,
    /// Not known to version control.
    Unversioned,
}

impl FileStatus {
    /// Whether the file has never been committed.
    pub fn is_uncommitted(&self) -> bool {
        matches!(self, Self::Added | Self::Unversioned)
    }

    /// Whether the file is committed without local changes.
    pub fn is_clean(&self) -> bool {
        *self == Self::Clean
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Unversioned => "unversioned",
        })
    }
}

/// Stage of a file during an unresolved merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictStage {
    /// Common ancestor.
    Base,
    /// The branch being merged into.
    Ours,
    /// The branch being merged.
    Theirs,
}

impl ConflictStage {
    /// Git index stage number.
    pub fn number(&self) -> u8 {
        match self {
            Self::Base => 1,
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }
}

/// How the checked-out branch is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchUse {
    /// A development branch.
    Development,
    /// The production lineage.
    Production,
    /// Could not be determined.
    Undefined,
}

/// Operations needed from a version control system.
pub trait VersionControl {
    /// Whether `path` is inside a working copy of this system.
    fn manages(&self, path: &Path) -> bool;

    /// Working-copy status of a file.
    fn status(&self, file: &Path) -> MigrateResult<FileStatus>;

    /// Whether commits touching `path` exist after `from`, up to and
    /// including `to`.
    fn commits_exist_between(&self, from: &str, to: &str, path: &Path) -> MigrateResult<bool>;

    /// Most recent revision touching a file, if it was ever committed.
    fn latest_revision(&self, file: &Path) -> MigrateResult<Option<String>>;

    /// Content of a file at a revision, if it existed there.
    fn content_at(&self, file: &Path, revision: &str) -> MigrateResult<Option<Vec<u8>>>;

    /// Human-readable identifier of the checked-out branch.
    fn branch_identifier(&self) -> MigrateResult<String>;

    /// Whether a revision belongs to the production lineage.
    fn is_on_production_lineage(&self, revision: &str) -> MigrateResult<bool>;

    /// The checked-out revision.
    fn current_revision(&self) -> MigrateResult<String>;

    /// Textual difference of a file against a revision; empty when equal.
    fn diff_from(&self, file: &Path, revision: &str) -> MigrateResult<String>;

    /// Revisions touching a file, newest first.
    fn file_history(&self, file: &Path) -> MigrateResult<Vec<String>>;

    /// Mark a file as resolved / ready to commit.
    fn stage(&self, file: &Path) -> MigrateResult<()>;

    /// Move a file, keeping it tracked under its new name.
    fn move_file(&self, from: &Path, to: &Path) -> MigrateResult<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    /// Delete a file and record the deletion.
    fn remove_file(&self, path: &Path) -> MigrateResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Content of a conflicted file at a merge stage; `None` when the file is
    /// not conflicted.
    fn conflict_content(&self, _file: &Path, _stage: ConflictStage) -> MigrateResult<Option<String>> {
        Ok(None)
    }

    /// Whether the merge in progress brings in upstream history, in which
    /// case upstream becomes the trunk of a repaired chain.
    fn merging_from_upstream(&self) -> MigrateResult<bool> {
        Ok(false)
    }

    /// How the checked-out branch is used.
    fn branch_use(&self) -> MigrateResult<BranchUse> {
        let current = self.current_revision()?;
        Ok(if self.is_on_production_lineage(&current)? {
            BranchUse::Production
        } else {
            BranchUse::Development
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_statuses() {
        assert!(FileStatus::Added.is_uncommitted());
        assert!(FileStatus::Unversioned.is_uncommitted());
        assert!(!FileStatus::Modified.is_uncommitted());
        assert!(!FileStatus::Clean.is_uncommitted());
    }

    #[test]
    fn test_stage_numbers() {
        assert_eq!(ConflictStage::Base.number(), 1);
        assert_eq!(ConflictStage::Ours.number(), 2);
        assert_eq!(ConflictStage::Theirs.number(), 3);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(FileStatus::Deleted.to_string(), "deleted");
    }
}
