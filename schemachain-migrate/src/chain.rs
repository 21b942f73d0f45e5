//! Loading and validating the linked chain of migrations.
//!
//! A chain lives in one structure directory:
//!
//! ```text
//! structure/
//! ├── head.yaml                       # latest change: 2024-01-02 add bar
//! ├── 2024-01-01 create foo.yaml      # starting from: empty database
//! └── 2024-01-02 add bar.yaml         # starting from: 2024-01-01 create foo
//! ```
//!
//! The chain is rebuilt on demand by walking backward from the head pointer.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::migration::{
    HEAD_FILE, LATEST_CHANGE, MigrationDocument, MigrationId, MigrationRecord,
    is_migration_filename, yaml_path,
};

/// The head pointer file of a chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainHead {
    document: MigrationDocument,
}

impl ChainHead {
    /// Read `head.yaml` from a structure directory. A missing file is an
    /// empty head.
    pub fn read(dir: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = dir.as_ref().join(HEAD_FILE);
        if !path.is_file() {
            debug!("No head file at {}", path.display());
            return Ok(Self::default());
        }
        Ok(Self {
            document: MigrationDocument::read(&path)?,
        })
    }

    /// Wrap an existing head mapping.
    pub fn from_document(document: MigrationDocument) -> Self {
        Self { document }
    }

    /// A head pointing at `file_name`.
    pub fn pointing_at(file_name: &str) -> Self {
        let mut head = Self::default();
        head.set_latest_change(file_name);
        head
    }

    /// Filename of the newest migration, canonicalized with `.yaml`.
    pub fn latest_change(&self) -> Option<String> {
        self.document.get_str(LATEST_CHANGE).map(yaml_path)
    }

    /// Point the head at another migration. Stored without `.yaml`.
    pub fn set_latest_change(&mut self, file_name: &str) {
        let name = file_name.strip_suffix(".yaml").unwrap_or(file_name);
        self.document.insert(LATEST_CHANGE, name);
    }

    /// The head mapping.
    pub fn document(&self) -> &MigrationDocument {
        &self.document
    }

    /// Mutable access to the head mapping.
    pub fn document_mut(&mut self) -> &mut MigrationDocument {
        &mut self.document
    }

    /// Write `head.yaml` into a structure directory.
    pub fn write(&self, dir: impl AsRef<Path>) -> MigrateResult<()> {
        self.document.write(dir.as_ref().join(HEAD_FILE))
    }
}

/// An ordered chain of migrations, oldest first.
#[derive(Debug, Clone)]
pub struct MigrationChain {
    dir: PathBuf,
    head: ChainHead,
    migrations: Vec<MigrationRecord>,
    orphans: Vec<String>,
}

impl MigrationChain {
    /// Load the chain of a structure directory.
    pub fn load(dir: impl AsRef<Path>) -> MigrateResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let head = ChainHead::read(&dir)?;

        let mut migrations = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut referenced_from = HEAD_FILE.to_string();
        let mut next = head.latest_change();

        while let Some(file_name) = next {
            if !is_migration_filename(&file_name) {
                return Err(MigrationError::invalid_reference(file_name, referenced_from));
            }
            if !visited.insert(file_name.to_uppercase()) {
                return Err(MigrationError::CyclicChain { file: file_name });
            }

            let path = dir.join(&file_name);
            if !path.is_file() {
                debug!("Chain link {} from {} does not exist", file_name, referenced_from);
                break;
            }

            let record = MigrationRecord::load(&path)?;
            next = record.follows.clone();
            referenced_from = file_name;
            migrations.push_front(record);
        }

        let orphans = find_orphans(&dir, &visited)?;
        if !orphans.is_empty() {
            warn!("{} migration file(s) are not in the chain", orphans.len());
        }

        info!("Loaded {} migrations from {}", migrations.len(), dir.display());
        Ok(Self {
            dir,
            head,
            migrations: migrations.into(),
            orphans,
        })
    }

    /// The structure directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// The head pointer the chain was loaded from.
    pub fn head(&self) -> &ChainHead {
        &self.head
    }

    /// Migrations, oldest first.
    pub fn migrations(&self) -> &[MigrationRecord] {
        &self.migrations
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the chain has no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Newest migration.
    pub fn latest(&self) -> Option<&MigrationRecord> {
        self.migrations.last()
    }

    /// Find a migration by filename (with or without `.yaml`).
    pub fn find_by_file(&self, file_name: &str) -> Option<&MigrationRecord> {
        let file_name = yaml_path(file_name);
        self.migrations.iter().find(|m| m.file_name == file_name)
    }

    /// Find a migration by id.
    pub fn find_by_id(&self, id: &MigrationId) -> Option<&MigrationRecord> {
        self.migrations.iter().find(|m| &m.id == id)
    }

    /// Ids in chain order.
    pub fn ids(&self) -> Vec<MigrationId> {
        self.migrations.iter().map(|m| m.id.clone()).collect()
    }

    /// Whether the chain reaches back to the empty database. An empty chain
    /// is trivially complete.
    pub fn complete(&self) -> bool {
        self.migrations
            .first()
            .is_none_or(MigrationRecord::starts_from_empty)
    }

    /// Whether every migration file of the directory is in the chain.
    pub fn includes_all(&self) -> bool {
        self.orphans.is_empty()
    }

    /// Migration files of the directory the walk did not reach.
    pub fn orphans(&self) -> &[String] {
        &self.orphans
    }

    /// Re-derive the head pointer value from the loaded sequence.
    pub fn head_pointer(&self) -> Option<String> {
        self.latest().map(|m| m.basename().to_string())
    }

    /// Fail unless the chain is complete and includes every migration file.
    pub fn ensure_valid(&self) -> MigrateResult<()> {
        if !self.complete() {
            return Err(MigrationError::IncompleteChain);
        }
        if !self.includes_all() {
            return Err(MigrationError::OrphanMigrations(self.orphans.clone()));
        }
        Ok(())
    }
}

fn find_orphans(dir: &Path, visited: &HashSet<String>) -> MigrateResult<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut orphans = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_migration_filename(&name) && !visited.contains(&name.to_uppercase()) {
            orphans.push(name);
        }
    }
    orphans.sort();
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn sample_chain() -> TempDir {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "head.yaml", "latest change: 2024-01-02 b\n");
        write(
            temp.path(),
            "2024-01-01 a.yaml",
            "starting from: empty database\nsql: CREATE TABLE a (id int);\nchanges: [a]\n",
        );
        write(
            temp.path(),
            "2024-01-02 b.yaml",
            "starting from: 2024-01-01 a\nsql: CREATE TABLE b (id int);\nchanges: [b]\n",
        );
        temp
    }

    #[test]
    fn test_load_orders_oldest_first() {
        let temp = sample_chain();
        let chain = MigrationChain::load(temp.path()).unwrap();
        let files: Vec<_> = chain.migrations().iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(files, vec!["2024-01-01 a.yaml", "2024-01-02 b.yaml"]);
        assert!(chain.complete());
        assert!(chain.includes_all());
        assert!(chain.ensure_valid().is_ok());
    }

    #[test]
    fn test_head_pointer_round_trip() {
        let temp = sample_chain();
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert_eq!(
            chain.head_pointer().as_deref(),
            chain.head().document().get_str(LATEST_CHANGE)
        );
    }

    #[test]
    fn test_dangling_predecessor_is_incomplete() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "head.yaml", "latest change: 2024-01-02 b\n");
        write(temp.path(), "2024-01-02 b.yaml", "starting from: 2024-01-01 a\n");
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(!chain.complete());
        assert!(matches!(chain.ensure_valid(), Err(MigrationError::IncompleteChain)));
    }

    #[test]
    fn test_orphans_detected() {
        let temp = sample_chain();
        write(temp.path(), "2024-01-03 stray.yaml", "starting from: 2024-01-01 a\n");
        write(temp.path(), "notes.yaml", "not a migration\n");
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert!(!chain.includes_all());
        assert_eq!(chain.orphans(), ["2024-01-03 stray.yaml".to_string()]);
        assert!(matches!(
            chain.ensure_valid(),
            Err(MigrationError::OrphanMigrations(_))
        ));
    }

    #[test]
    fn test_invalid_reference() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "head.yaml", "latest change: 2024-01-02 b\n");
        write(temp.path(), "2024-01-02 b.yaml", "starting from: bogus\n");
        match MigrationChain::load(temp.path()) {
            Err(MigrationError::InvalidChainReference {
                reference,
                referenced_from,
            }) => {
                assert_eq!(reference, "bogus.yaml");
                assert_eq!(referenced_from, "2024-01-02 b.yaml");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "head.yaml", "latest change: 2024-01-02 b\n");
        write(temp.path(), "2024-01-01 a.yaml", "starting from: 2024-01-02 b\n");
        write(temp.path(), "2024-01-02 b.yaml", "starting from: 2024-01-01 a\n");
        assert!(matches!(
            MigrationChain::load(temp.path()),
            Err(MigrationError::CyclicChain { .. })
        ));
    }

    #[test]
    fn test_empty_directory() {
        let temp = TempDir::new().unwrap();
        let chain = MigrationChain::load(temp.path()).unwrap();
        assert!(chain.is_empty());
        assert!(chain.complete());
        assert!(chain.head_pointer().is_none());
    }

    #[test]
    fn test_head_write_strips_extension() {
        let temp = TempDir::new().unwrap();
        ChainHead::pointing_at("2024-01-05 e.yaml")
            .write(temp.path())
            .unwrap();
        let head = ChainHead::read(temp.path()).unwrap();
        assert_eq!(head.document().get_str(LATEST_CHANGE), Some("2024-01-05 e"));
        assert_eq!(head.latest_change().as_deref(), Some("2024-01-05 e.yaml"));
    }
}
