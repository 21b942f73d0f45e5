//! Declarative objects and the migrations implementing them.
//!
//! A declarative file under `structure/declarative/` states the desired end
//! state of one object. A migration whose file ends in `.decl.yaml` records
//! that it implements a version of such a file:
//!
//! ```yaml
//! starting from: 2024-01-01 a
//! does: creation
//! of object: foo
//! to realize: 5f1c...            # digest of foo.yaml when authored
//! delta: |
//!   +columns: ...
//! sql: CREATE TABLE foo (...);
//! implementation qualification: suggested SQL
//! description: Declarative creation of foo
//! ```
//!
//! The resolver decides, per declarative file, whether its latest
//! implementing migration is current.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::chain::MigrationChain;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationRecord, content_digest, yaml_path};
use crate::vcs::{FileStatus, VersionControl};

/// Suffix of declarative implementing migration files.
pub const DECLARATIVE_SUFFIX: &str = ".decl.yaml";
/// Key holding the goal.
pub const GOAL: &str = "does";
/// Key naming the declarative object.
pub const DECLARATIVE_OBJECT: &str = "of object";
/// Key holding the content version marker.
pub const TO_REALIZE: &str = "to realize";
/// Key marking SQL that still needs human confirmation.
pub const QUALIFICATION: &str = "implementation qualification";
/// Key holding the change to the declarative file.
pub const DELTA: &str = "delta";
/// Key recording the revision a migration was split from by a chain repair.
pub const PRE_UNBRANCH: &str = "pre-unbranch";
/// Version marker of removed objects.
pub const DELETED: &str = "DELETED";

/// What an implementing migration does to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Goal {
    /// Creates the object.
    Creation,
    /// Starts managing an object that already exists.
    Adoption,
    /// Changes the object.
    Revision,
    /// Stops managing the object without removing it.
    Renunciation,
    /// Removes the object.
    Destruction,
}

impl Goal {
    /// The value stored under `does`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Adoption => "adoption",
            Self::Revision => "revision",
            Self::Renunciation => "renunciation",
            Self::Destruction => "destruction",
        }
    }

    /// Whether the goal only changes management, never the database.
    pub fn is_management(&self) -> bool {
        matches!(self, Self::Adoption | Self::Renunciation)
    }

    /// Whether the goal ends the object's life cycle.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Renunciation | Self::Destruction)
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Goal {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creation" => Ok(Self::Creation),
            "adoption" => Ok(Self::Adoption),
            "revision" => Ok(Self::Revision),
            "renunciation" => Ok(Self::Renunciation),
            "destruction" => Ok(Self::Destruction),
            other => Err(MigrationError::migration_file(format!(
                "'{}' must be one of: creation, adoption, revision, renunciation, destruction (got '{}')",
                GOAL, other
            ))),
        }
    }
}

/// Why an implementing migration's SQL is not yet trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualification {
    /// SQL was generated and must be reviewed.
    SuggestedSql,
    /// No SQL could be generated.
    Unimplemented,
}

impl Qualification {
    /// The value stored under `implementation qualification`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuggestedSql => "suggested SQL",
            Self::Unimplemented => "unimplemented",
        }
    }
}

/// Relationship of a declarative file to its latest implementing migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarativeStatus {
    /// The declarative file does not exist.
    Missing,
    /// No migration implements the file.
    Unimplemented,
    /// The migration implements the current content.
    Equal,
    /// The migration postdates the file's last change.
    Older,
    /// The file changed after the migration.
    Newer,
}

impl DeclarativeStatus {
    /// Whether the latest implementation covers the file's content.
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Equal | Self::Older)
    }
}

impl fmt::Display for DeclarativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::Unimplemented => "unimplemented",
            Self::Equal => "equal",
            Self::Older => "older",
            Self::Newer => "newer",
        })
    }
}

impl MigrationRecord {
    /// Whether this migration implements a declarative file.
    pub fn is_declarative(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(DECLARATIVE_SUFFIX)
            && self.document.contains_key(DECLARATIVE_OBJECT)
    }

    /// Goal of a declarative migration.
    pub fn goal(&self) -> MigrateResult<Goal> {
        self.document
            .get_str(GOAL)
            .ok_or_else(|| {
                MigrationError::migration_file(format!("{} does not say what it {}", self.file_name, GOAL))
            })?
            .parse()
    }

    /// Object implemented by a declarative migration.
    pub fn declarative_object(&self) -> Option<&str> {
        self.document.get_str(DECLARATIVE_OBJECT)
    }

    /// Content version marker recorded when the migration was authored.
    pub fn realized_version(&self) -> Option<&str> {
        self.document.get_str(TO_REALIZE)
    }

    /// Whether the SQL still carries a qualification.
    pub fn is_questionable(&self) -> bool {
        self.document.contains_key(QUALIFICATION)
    }

    /// Whether the migration only changes management of its object.
    pub fn is_management(&self) -> bool {
        self.goal().map(|g| g.is_management()).unwrap_or(false)
    }
}

/// The latest implementation of one declarative file.
#[derive(Debug, Clone, PartialEq)]
pub enum ImplementationLink {
    /// No migration implements the file.
    Missing,
    /// The most recent implementing migration.
    Implemented(Box<MigrationRecord>),
}

impl ImplementationLink {
    /// The implementing migration, if any.
    pub fn migration(&self) -> Option<&MigrationRecord> {
        match self {
            Self::Missing => None,
            Self::Implemented(m) => Some(m),
        }
    }
}

/// Flags of an implementation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImplementationRequest {
    /// Adopt an existing object instead of creating it.
    pub adopt: bool,
    /// Renounce a removed object instead of destroying it.
    pub renounce: bool,
}

impl ImplementationRequest {
    /// Request with the adopt flag.
    pub fn adopt() -> Self {
        Self {
            adopt: true,
            renounce: false,
        }
    }

    /// Request with the renounce flag.
    pub fn renounce() -> Self {
        Self {
            adopt: false,
            renounce: true,
        }
    }
}

/// Goal of a new implementing migration for a file in `status`.
pub fn implementation_goal(
    file: &Path,
    status: DeclarativeStatus,
    request: ImplementationRequest,
) -> MigrateResult<Goal> {
    let (goal, forbidden): (Goal, &[(&str, bool)]) = match status {
        DeclarativeStatus::Unimplemented => (
            if request.adopt { Goal::Adoption } else { Goal::Creation },
            &[("renounce", request.renounce)],
        ),
        DeclarativeStatus::Newer => (
            Goal::Revision,
            &[("adopt", request.adopt), ("renounce", request.renounce)],
        ),
        DeclarativeStatus::Missing => (
            if request.renounce { Goal::Renunciation } else { Goal::Destruction },
            &[("adopt", request.adopt)],
        ),
        DeclarativeStatus::Equal | DeclarativeStatus::Older => {
            return Err(MigrationError::NoChanges {
                file: file.display().to_string(),
                status: status.to_string(),
            });
        }
    };

    if let Some((flag, _)) = forbidden.iter().find(|(_, set)| *set) {
        return Err(MigrationError::argument(format!(
            "--{} flag is invalid when declarative file is {}",
            flag, status
        )));
    }
    Ok(goal)
}

/// Resolves declarative statuses for one chain.
pub struct DeclarativeStatusResolver<'a> {
    chain: &'a MigrationChain,
    declarative_dir: PathBuf,
    vcs: &'a dyn VersionControl,
}

impl<'a> DeclarativeStatusResolver<'a> {
    /// Create a resolver over `chain`, reading declarative files from
    /// `declarative_dir`.
    pub fn new(
        chain: &'a MigrationChain,
        declarative_dir: impl Into<PathBuf>,
        vcs: &'a dyn VersionControl,
    ) -> Self {
        Self {
            chain,
            declarative_dir: declarative_dir.into(),
            vcs,
        }
    }

    /// The declarative directory.
    pub fn declarative_dir(&self) -> &Path {
        &self.declarative_dir
    }

    /// Path of the declarative file of an object.
    pub fn declarative_path(&self, object: &str) -> PathBuf {
        self.declarative_dir.join(yaml_path(object))
    }

    /// Declarative files currently on disk, sorted.
    pub fn declarative_files(&self) -> MigrateResult<Vec<PathBuf>> {
        if !self.declarative_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.declarative_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "yaml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Latest implementation of every live declarative file.
    ///
    /// Files whose latest migration removed them, and which are indeed
    /// missing, are dropped. Files no migration implements map to
    /// [`ImplementationLink::Missing`].
    pub fn latest_implementations(&self) -> MigrateResult<BTreeMap<PathBuf, ImplementationLink>> {
        let mut links = BTreeMap::new();

        for (path, migration) in self.latest_migrations() {
            if migration.goal()?.is_removal()
                && self.relative_version(migration, &path)? == DeclarativeStatus::Missing
            {
                continue;
            }
            links.insert(path, ImplementationLink::Implemented(Box::new(migration.clone())));
        }

        for file in self.declarative_files()? {
            links.entry(file).or_insert(ImplementationLink::Missing);
        }

        Ok(links)
    }

    /// Latest implementing migration of every object any migration ever
    /// implemented, removed objects included.
    pub fn latest_migrations(&self) -> BTreeMap<PathBuf, &'a MigrationRecord> {
        let chain: &'a MigrationChain = self.chain;
        chain
            .migrations()
            .iter()
            .filter(|m| m.is_declarative())
            .filter_map(|m| Some((self.declarative_path(m.declarative_object()?), m)))
            .collect()
    }

    /// Status of a declarative file given its latest implementation.
    pub fn status(&self, file: &Path, link: &ImplementationLink) -> MigrateResult<DeclarativeStatus> {
        match link {
            ImplementationLink::Missing => Ok(DeclarativeStatus::Unimplemented),
            ImplementationLink::Implemented(migration) => self.relative_version(migration, file),
        }
    }

    /// Status of one declarative file.
    ///
    /// Fails for a path that is neither on disk nor implemented by a live
    /// migration: either nothing ever declared it, or its object was already
    /// removed.
    pub fn status_of(&self, file: &Path) -> MigrateResult<(ImplementationLink, DeclarativeStatus)> {
        let link = match self.latest_implementations()?.remove(file) {
            Some(link) => link,
            None if file.exists() => ImplementationLink::Missing,
            None if self.latest_migrations().contains_key(file) => {
                return Err(MigrationError::NoChanges {
                    file: file.display().to_string(),
                    status: "already removed".to_string(),
                });
            }
            None => {
                return Err(MigrationError::argument(format!(
                    "{} is not a declarative file and no migration implements it",
                    file.display()
                )));
            }
        };
        let status = self.status(file, &link)?;
        Ok((link, status))
    }

    /// Declarative files whose latest implementation is not current.
    pub fn unimplemented_declaratives(&self) -> MigrateResult<Vec<PathBuf>> {
        let mut unresolved = Vec::new();
        for (file, link) in self.latest_implementations()? {
            let status = self.status(&file, &link)?;
            if !status.is_current() {
                debug!("{} is {}", file.display(), status);
                unresolved.push(file);
            }
        }
        Ok(unresolved)
    }

    /// Fail unless every declarative file has a current, confirmed
    /// implementing migration.
    pub fn check_declaratives_current(&self) -> MigrateResult<()> {
        let unresolved = self.unimplemented_declaratives()?;
        if !unresolved.is_empty() {
            warn!("{} declarative file(s) lack a current implementation", unresolved.len());
            return Err(MigrationError::MissingImplementation(unresolved));
        }

        // Removed objects drop out of the live links, but their removing
        // migration still runs.
        let migrations: Vec<&MigrationRecord> = self.latest_migrations().into_values().collect();

        let questionable: Vec<String> = migrations
            .iter()
            .filter(|m| m.is_questionable())
            .map(|m| m.file_path.display().to_string())
            .collect();
        if !questionable.is_empty() {
            return Err(MigrationError::questionable(format!(
                "Implementing migrations with questionable SQL: {}",
                questionable.join(", ")
            )));
        }

        for migration in migrations {
            let goal = migration.goal()?;
            if goal.is_management() && !migration.sql.trim().is_empty() {
                return Err(MigrationError::questionable(format!(
                    "{} cannot execute SQL for a declarative {}",
                    migration.file_path.display(),
                    goal
                )));
            }
        }
        Ok(())
    }

    /// Compare a declarative file with a migration implementing it.
    pub fn relative_version(
        &self,
        migration: &MigrationRecord,
        declarative: &Path,
    ) -> MigrateResult<DeclarativeStatus> {
        let decl_status = if declarative.exists() {
            self.vcs.status(declarative)?
        } else {
            FileStatus::Deleted
        };
        if decl_status == FileStatus::Deleted {
            return Ok(DeclarativeStatus::Missing);
        }

        let migration_status = self.vcs.status(&migration.file_path)?;

        if migration_status.is_uncommitted() {
            if decl_status.is_uncommitted() || decl_status == FileStatus::Modified {
                let current = content_digest(std::fs::read(declarative)?);
                return Ok(if migration.realized_version() == Some(current.as_str()) {
                    DeclarativeStatus::Equal
                } else {
                    DeclarativeStatus::Newer
                });
            }
            return Ok(DeclarativeStatus::Older);
        }

        if migration_status.is_clean() {
            if !decl_status.is_clean() {
                return Ok(DeclarativeStatus::Newer);
            }

            let current = self.vcs.current_revision()?;
            let migration_rev = self.committed_revision(&migration.file_path)?;
            let decl_rev = self.committed_revision(declarative)?;

            if self
                .vcs
                .commits_exist_between(&migration_rev, &current, declarative)?
            {
                return Ok(DeclarativeStatus::Newer);
            }
            if self
                .vcs
                .commits_exist_between(&decl_rev, &current, &migration.file_path)?
            {
                return Ok(DeclarativeStatus::Older);
            }
            return Ok(DeclarativeStatus::Equal);
        }

        Ok(DeclarativeStatus::Older)
    }

    fn committed_revision(&self, file: &Path) -> MigrateResult<String> {
        self.vcs.latest_revision(file)?.ok_or_else(|| {
            MigrationError::version_control(format!(
                "{} is reported clean but has no committed revision",
                file.display()
            ))
        })
    }
}
