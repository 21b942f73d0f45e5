//! Git backend over the `git` executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use super::{ConflictStage, FileStatus, VersionControl};
use crate::error::{MigrateResult, MigrationError};

/// [`VersionControl`] implementation that shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitVcs {
    root: PathBuf,
    production_lineage: String,
}

impl GitVcs {
    /// Create a backend running git inside `root`. `production_lineage` is the
    /// ref whose history counts as production (e.g. `master`).
    pub fn new(root: impl Into<PathBuf>, production_lineage: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            production_lineage: production_lineage.into(),
        }
    }

    /// The ref treated as the production lineage.
    pub fn production_lineage(&self) -> &str {
        &self.production_lineage
    }

    fn run(&self, args: &[&str]) -> MigrateResult<Output> {
        self.run_in(&self.root, args)
    }

    fn run_in(&self, dir: &Path, args: &[&str]) -> MigrateResult<Output> {
        debug!("git -C {} {}", dir.display(), args.join(" "));
        Ok(Command::new("git").arg("-C").arg(dir).args(args).output()?)
    }

    /// Run git and return stdout, failing on a non-zero exit.
    fn git(&self, args: &[&str]) -> MigrateResult<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(MigrationError::version_control(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git and return stdout only when it succeeds.
    fn git_on_success(&self, args: &[&str]) -> MigrateResult<Option<Vec<u8>>> {
        let output = self.run(args)?;
        Ok(output.status.success().then_some(output.stdout))
    }

    fn commits_in(&self, range: &str, path: Option<&Path>) -> MigrateResult<bool> {
        let pathspec = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.root.display().to_string());
        let out = self.git(&["log", "--pretty=format:%H", "-1", range, "--", &pathspec])?;
        Ok(!out.trim().is_empty())
    }

    /// Path of `file` relative to the top of the working tree, for
    /// `<rev>:<path>` object names.
    fn repo_relative(&self, file: &Path) -> MigrateResult<String> {
        let toplevel = PathBuf::from(self.git(&["rev-parse", "--show-toplevel"])?.trim());
        let toplevel = toplevel.canonicalize()?;

        let absolute = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root.join(file)
        };
        let parent = absolute
            .parent()
            .ok_or_else(|| MigrationError::version_control(format!("{} has no parent", file.display())))?
            .canonicalize()?;
        let name = absolute
            .file_name()
            .ok_or_else(|| MigrationError::version_control(format!("{} has no file name", file.display())))?;

        let relative = parent.join(name);
        let relative = relative.strip_prefix(&toplevel).map_err(|_| {
            MigrationError::version_control(format!(
                "{} is outside the working tree {}",
                file.display(),
                toplevel.display()
            ))
        })?;
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}

impl VersionControl for GitVcs {
    fn manages(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let dir = absolute
            .ancestors()
            .find(|p| p.is_dir())
            .unwrap_or(self.root.as_path());
        matches!(
            self.run_in(dir, &["rev-parse", "--is-inside-work-tree"]),
            Ok(output) if output.status.success()
        )
    }

    fn status(&self, file: &Path) -> MigrateResult<FileStatus> {
        let pathspec = file.display().to_string();
        let out = self.git(&["status", "--porcelain", "--untracked-files=all", "--", &pathspec])?;
        let code: String = out.lines().next().unwrap_or_default().chars().take(2).collect();

        let status = if code == "??" {
            FileStatus::Unversioned
        } else if code.contains('A') {
            FileStatus::Added
        } else if code.contains('D') {
            FileStatus::Deleted
        } else if !code.trim().is_empty() {
            FileStatus::Modified
        } else if self.latest_revision(file)?.is_some() {
            if file.exists() {
                FileStatus::Clean
            } else {
                FileStatus::Deleted
            }
        } else {
            FileStatus::Unversioned
        };
        Ok(status)
    }

    fn commits_exist_between(&self, from: &str, to: &str, path: &Path) -> MigrateResult<bool> {
        self.commits_in(&format!("{}..{}", from.trim(), to.trim()), Some(path))
    }

    fn latest_revision(&self, file: &Path) -> MigrateResult<Option<String>> {
        let pathspec = file.display().to_string();
        let out = self.git(&["log", "-1", "--format=%H", "--", &pathspec])?;
        let rev = out.trim();
        Ok((!rev.is_empty()).then(|| rev.to_string()))
    }

    fn content_at(&self, file: &Path, revision: &str) -> MigrateResult<Option<Vec<u8>>> {
        let object = format!("{}:{}", revision, self.repo_relative(file)?);
        self.git_on_success(&["show", &object])
    }

    fn branch_identifier(&self) -> MigrateResult<String> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let commit = self.current_revision()?;
        Ok(format!("{} (commit {})", branch.trim(), commit))
    }

    fn is_on_production_lineage(&self, revision: &str) -> MigrateResult<bool> {
        let output = self.run(&[
            "merge-base",
            "--is-ancestor",
            revision,
            &self.production_lineage,
        ])?;
        Ok(output.status.success())
    }

    fn current_revision(&self) -> MigrateResult<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn diff_from(&self, file: &Path, revision: &str) -> MigrateResult<String> {
        let pathspec = file.display().to_string();
        self.git(&["diff", revision, "--", &pathspec])
    }

    fn file_history(&self, file: &Path) -> MigrateResult<Vec<String>> {
        let pathspec = file.display().to_string();
        let out = self.git(&["log", "--format=%H", "--", &pathspec])?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    fn stage(&self, file: &Path) -> MigrateResult<()> {
        let pathspec = file.display().to_string();
        self.git(&["add", "--", &pathspec])?;
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> MigrateResult<()> {
        if self.status(from)? == FileStatus::Unversioned {
            std::fs::rename(from, to)?;
            return Ok(());
        }
        let (from, to) = (from.display().to_string(), to.display().to_string());
        self.git(&["mv", "--", &from, &to])?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> MigrateResult<()> {
        if self.status(path)? == FileStatus::Unversioned {
            std::fs::remove_file(path)?;
            return Ok(());
        }
        let pathspec = path.display().to_string();
        self.git(&["rm", "-q", "--", &pathspec])?;
        Ok(())
    }

    fn conflict_content(&self, file: &Path, stage: ConflictStage) -> MigrateResult<Option<String>> {
        let pathspec = file.display().to_string();
        let unmerged = self.git(&["ls-files", "-u", "--", &pathspec])?;
        if unmerged.trim().is_empty() {
            return Ok(None);
        }
        let object = format!(":{}:{}", stage.number(), self.repo_relative(file)?);
        Ok(self
            .git_on_success(&["show", &object])?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn merging_from_upstream(&self) -> MigrateResult<bool> {
        let Some(upstream) = self.git_on_success(&["rev-parse", "@{u}"])? else {
            return Ok(false);
        };
        let upstream = String::from_utf8_lossy(&upstream).trim().to_string();
        match self.commits_in(&format!("{}..MERGE_HEAD", upstream), None) {
            Ok(found) => Ok(!found),
            Err(MigrationError::VersionControl(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lineage_configured() {
        let vcs = GitVcs::new("/tmp", "origin/master");
        assert_eq!(vcs.production_lineage(), "origin/master");
    }

    #[test]
    fn test_outside_working_tree_not_managed() {
        let temp = tempfile::TempDir::new().unwrap();
        let vcs = GitVcs::new(temp.path(), "master");
        // Either git is missing or the directory is not a repository.
        assert!(!vcs.manages(temp.path()));
    }

    #[test]
    fn test_manages_checks_the_given_path() {
        let repo = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        let initialized = Command::new("git")
            .args(["init", "-q"])
            .current_dir(repo.path())
            .status()
            .is_ok_and(|s| s.success());
        if !initialized {
            // git unavailable
            return;
        }

        let vcs = GitVcs::new(repo.path(), "master");
        assert!(vcs.manages(repo.path()));
        assert!(vcs.manages(&repo.path().join("structure").join("head.yaml")));
        assert!(!vcs.manages(outside.path()));
    }
}
