//! In-memory version control over a plain directory.
//!
//! Commits snapshot file contents from disk; statuses are derived by
//! comparing the working copy to the last snapshot. Built for tests and
//! behind the `testing` feature.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{BranchUse, ConflictStage, FileStatus, VersionControl};
use crate::error::{MigrateResult, MigrationError};

#[derive(Debug)]
struct Commit {
    id: String,
    /// Content of each touched file; `None` records a deletion.
    files: HashMap<PathBuf, Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct State {
    commits: Vec<Commit>,
    added: HashSet<PathBuf>,
    staged: Vec<PathBuf>,
    production: HashSet<String>,
    conflicts: HashMap<(PathBuf, ConflictStage), String>,
    merging_from_upstream: bool,
    branch_use: Option<BranchUse>,
    unmanaged: bool,
    moves: Vec<(PathBuf, PathBuf)>,
    removals: Vec<PathBuf>,
}

/// Scripted [`VersionControl`] implementation.
#[derive(Debug)]
pub struct ScriptedVcs {
    branch: String,
    state: RefCell<State>,
}

impl Default for ScriptedVcs {
    fn default() -> Self {
        Self::new("scripted")
    }
}

impl ScriptedVcs {
    /// Create an empty history on the named branch.
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            state: RefCell::new(State::default()),
        }
    }

    /// Commit the current on-disk content of `files`, returning the new
    /// revision.
    pub fn commit<P: AsRef<Path>>(&self, files: &[P]) -> String {
        let mut state = self.state.borrow_mut();
        let id = format!("r{}", state.commits.len() + 1);
        let files = files
            .iter()
            .map(|f| {
                let path = f.as_ref().to_path_buf();
                state.added.remove(&path);
                let content = std::fs::read(&path).ok();
                (path, content)
            })
            .collect();
        state.commits.push(Commit {
            id: id.clone(),
            files,
        });
        id
    }

    /// Schedule a file for addition.
    pub fn add(&self, file: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .added
            .insert(file.as_ref().to_path_buf());
    }

    /// Mark a revision as part of the production lineage.
    pub fn mark_production(&self, revision: &str) {
        self.state
            .borrow_mut()
            .production
            .insert(revision.to_string());
    }

    /// Record a conflicted file's content at a merge stage.
    pub fn set_conflict(&self, file: impl AsRef<Path>, stage: ConflictStage, content: impl Into<String>) {
        self.state
            .borrow_mut()
            .conflicts
            .insert((file.as_ref().to_path_buf(), stage), content.into());
    }

    /// Declare whether the merge in progress comes from upstream.
    pub fn set_merging_from_upstream(&self, upstream: bool) {
        self.state.borrow_mut().merging_from_upstream = upstream;
    }

    /// Force the reported branch use.
    pub fn set_branch_use(&self, branch_use: BranchUse) {
        self.state.borrow_mut().branch_use = Some(branch_use);
    }

    /// Pretend the working copy is not under version control.
    pub fn set_managed(&self, managed: bool) {
        self.state.borrow_mut().unmanaged = !managed;
    }

    /// Files moved through this system, in order.
    pub fn moved(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.borrow().moves.clone()
    }

    /// Files removed through this system, in order.
    pub fn removed(&self) -> Vec<PathBuf> {
        self.state.borrow().removals.clone()
    }

    /// Files staged so far, in order.
    pub fn staged(&self) -> Vec<PathBuf> {
        self.state.borrow().staged.clone()
    }

    fn position(state: &State, revision: &str) -> MigrateResult<usize> {
        state
            .commits
            .iter()
            .position(|c| c.id == revision)
            .ok_or_else(|| MigrationError::version_control(format!("unknown revision {}", revision)))
    }

    fn committed_content(state: &State, file: &Path, through: usize) -> Option<Option<Vec<u8>>> {
        state.commits[..through]
            .iter()
            .rev()
            .find_map(|c| c.files.get(file).cloned())
    }
}

impl VersionControl for ScriptedVcs {
    fn manages(&self, _path: &Path) -> bool {
        !self.state.borrow().unmanaged
    }

    fn status(&self, file: &Path) -> MigrateResult<FileStatus> {
        let state = self.state.borrow();
        if state.added.contains(file) {
            return Ok(FileStatus::Added);
        }
        let on_disk = std::fs::read(file).ok();
        let committed = Self::committed_content(&state, file, state.commits.len());
        Ok(match (committed, on_disk) {
            (None, _) | (Some(None), Some(_)) => FileStatus::Unversioned,
            (Some(None), None) => FileStatus::Unversioned,
            (Some(Some(_)), None) => FileStatus::Deleted,
            (Some(Some(old)), Some(new)) if old == new => FileStatus::Clean,
            (Some(Some(_)), Some(_)) => FileStatus::Modified,
        })
    }

    fn commits_exist_between(&self, from: &str, to: &str, path: &Path) -> MigrateResult<bool> {
        let state = self.state.borrow();
        let start = Self::position(&state, from)? + 1;
        let end = Self::position(&state, to)? + 1;
        Ok(start < end && state.commits[start..end].iter().any(|c| c.files.contains_key(path)))
    }

    fn latest_revision(&self, file: &Path) -> MigrateResult<Option<String>> {
        let state = self.state.borrow();
        Ok(state
            .commits
            .iter()
            .rev()
            .find(|c| c.files.contains_key(file))
            .map(|c| c.id.clone()))
    }

    fn content_at(&self, file: &Path, revision: &str) -> MigrateResult<Option<Vec<u8>>> {
        let state = self.state.borrow();
        let through = Self::position(&state, revision)? + 1;
        Ok(Self::committed_content(&state, file, through).flatten())
    }

    fn branch_identifier(&self) -> MigrateResult<String> {
        Ok(self.branch.clone())
    }

    fn is_on_production_lineage(&self, revision: &str) -> MigrateResult<bool> {
        Ok(self.state.borrow().production.contains(revision))
    }

    fn current_revision(&self) -> MigrateResult<String> {
        self.state
            .borrow()
            .commits
            .last()
            .map(|c| c.id.clone())
            .ok_or_else(|| MigrationError::version_control("nothing committed"))
    }

    fn diff_from(&self, file: &Path, revision: &str) -> MigrateResult<String> {
        let then = self.content_at(file, revision)?;
        let now = std::fs::read(file).ok();
        Ok(if then == now {
            String::new()
        } else {
            format!("{} differs from {}", file.display(), revision)
        })
    }

    fn file_history(&self, file: &Path) -> MigrateResult<Vec<String>> {
        let state = self.state.borrow();
        Ok(state
            .commits
            .iter()
            .rev()
            .filter(|c| c.files.contains_key(file))
            .map(|c| c.id.clone())
            .collect())
    }

    fn stage(&self, file: &Path) -> MigrateResult<()> {
        self.state.borrow_mut().staged.push(file.to_path_buf());
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> MigrateResult<()> {
        std::fs::rename(from, to)?;
        let mut state = self.state.borrow_mut();
        state.added.remove(from);
        state.added.insert(to.to_path_buf());
        state.moves.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> MigrateResult<()> {
        std::fs::remove_file(path)?;
        let mut state = self.state.borrow_mut();
        state.added.remove(path);
        state.removals.push(path.to_path_buf());
        Ok(())
    }

    fn conflict_content(&self, file: &Path, stage: ConflictStage) -> MigrateResult<Option<String>> {
        Ok(self
            .state
            .borrow()
            .conflicts
            .get(&(file.to_path_buf(), stage))
            .cloned())
    }

    fn merging_from_upstream(&self) -> MigrateResult<bool> {
        Ok(self.state.borrow().merging_from_upstream)
    }

    fn branch_use(&self) -> MigrateResult<BranchUse> {
        if let Some(forced) = self.state.borrow().branch_use {
            return Ok(forced);
        }
        let current = match self.current_revision() {
            Ok(rev) => rev,
            Err(_) => return Ok(BranchUse::Undefined),
        };
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
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_status_progression() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("foo.yaml");
        let vcs = ScriptedVcs::default();

        fs::write(&file, "one").unwrap();
        assert_eq!(vcs.status(&file).unwrap(), FileStatus::Unversioned);
        vcs.add(&file);
        assert_eq!(vcs.status(&file).unwrap(), FileStatus::Added);

        vcs.commit(&[&file]);
        assert_eq!(vcs.status(&file).unwrap(), FileStatus::Clean);

        fs::write(&file, "two").unwrap();
        assert_eq!(vcs.status(&file).unwrap(), FileStatus::Modified);

        fs::remove_file(&file).unwrap();
        assert_eq!(vcs.status(&file).unwrap(), FileStatus::Deleted);
    }

    #[test]
    fn test_history_queries() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let vcs = ScriptedVcs::default();

        fs::write(&a, "a1").unwrap();
        let r1 = vcs.commit(&[&a]);
        fs::write(&b, "b1").unwrap();
        let r2 = vcs.commit(&[&b]);
        fs::write(&a, "a2").unwrap();
        let r3 = vcs.commit(&[&a]);

        assert!(vcs.commits_exist_between(&r1, &r3, &a).unwrap());
        assert!(!vcs.commits_exist_between(&r1, &r2, &a).unwrap());
        assert!(!vcs.commits_exist_between(&r2, &r3, &b).unwrap());
        assert_eq!(vcs.latest_revision(&a).unwrap(), Some(r3.clone()));
        assert_eq!(vcs.content_at(&a, &r2).unwrap(), Some(b"a1".to_vec()));
        assert_eq!(vcs.file_history(&a).unwrap(), vec![r3.clone(), r1]);
        assert_eq!(vcs.current_revision().unwrap(), r3);
        assert!(vcs.diff_from(&a, &r2).unwrap().contains("differs"));
    }

    #[test]
    fn test_branch_use_follows_production_marks() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        fs::write(&a, "a").unwrap();
        let vcs = ScriptedVcs::default();
        assert_eq!(vcs.branch_use().unwrap(), BranchUse::Undefined);
        let rev = vcs.commit(&[&a]);
        assert_eq!(vcs.branch_use().unwrap(), BranchUse::Development);
        vcs.mark_production(&rev);
        assert_eq!(vcs.branch_use().unwrap(), BranchUse::Production);
    }
}
