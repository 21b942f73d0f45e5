//! Appending new migrations to a chain.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use schemachain_schema::SchemaRoot;
use tracing::{debug, info, warn};

use crate::branch_upgrade::{BRANCH_UPGRADE_FILE, OBSOLETE_UPGRADE_FILE};
use crate::chain::{ChainHead, MigrationChain};
use crate::declarative::{
    DECLARATIVE_OBJECT, DELETED, DELTA, DeclarativeStatus, DeclarativeStatusResolver, GOAL,
    ImplementationLink, ImplementationRequest, QUALIFICATION, Qualification, TO_REALIZE,
    implementation_goal,
};
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{
    CHANGES, DESCRIPTION, EMPTY_DB, FOLLOWS, FormattingHint, HEAD_FILE, MigrationDocument, SQL,
    content_digest,
};
use crate::registry::{SupportRegistry, SupportedObject, object_name};
use crate::sql::DbBackend;
use crate::vcs::VersionControl;

const SQL_PLACEHOLDER: &str = "<<<<< INSERT SQL HERE >>>>>\n";
const DESCRIPTION_PLACEHOLDER: &str = "<<<<< DESCRIPTION OF MIGRATION >>>>>";
const CHANGES_PLACEHOLDER: &str = "<<<<< WHAT THIS MIGRATION CHANGES >>>>>";

/// Length of the digest in declarative migration summaries.
const SUMMARY_DIGEST_LEN: usize = 12;

/// Content of a migration to author, minus its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMigration {
    document: MigrationDocument,
}

impl Default for NewMigration {
    fn default() -> Self {
        let mut document = MigrationDocument::new();
        document.set_text(SQL, SQL_PLACEHOLDER, FormattingHint::Literal);
        document.set_text(DESCRIPTION, DESCRIPTION_PLACEHOLDER, FormattingHint::Folded);
        document.insert(CHANGES, vec![CHANGES_PLACEHOLDER.to_string()]);
        Self { document }
    }
}

impl NewMigration {
    /// A migration with placeholder SQL, description and changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use exactly the fields of `document`.
    pub fn from_document(document: MigrationDocument) -> Self {
        Self { document }
    }

    /// Set the SQL.
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.document.set_text(SQL, sql, FormattingHint::Literal);
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.document.set_text(DESCRIPTION, description, FormattingHint::Folded);
        self
    }

    /// Set the change tags.
    pub fn changes(mut self, changes: Vec<String>) -> Self {
        self.document.insert(CHANGES, changes);
        self
    }

    /// The fields to write.
    pub fn document(&self) -> &MigrationDocument {
        &self.document
    }
}

/// A migration written by [`MigrationAuthor`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoredMigration {
    /// Path of the new file.
    pub path: PathBuf,
    /// Advisory warnings.
    pub warnings: Vec<String>,
}

/// Writes new migrations at the head of a chain.
pub struct MigrationAuthor<'a> {
    structure_dir: PathBuf,
    declarative_dir: PathBuf,
    vcs: &'a dyn VersionControl,
    registry: &'a SupportRegistry,
    backend: &'a dyn DbBackend,
    today: NaiveDate,
    user: String,
}

impl<'a> MigrationAuthor<'a> {
    /// Create an author for the chain of a schema root.
    pub fn new(
        root: &SchemaRoot,
        vcs: &'a dyn VersionControl,
        registry: &'a SupportRegistry,
        backend: &'a dyn DbBackend,
    ) -> Self {
        Self {
            structure_dir: root.structure_dir(),
            declarative_dir: root.declarative_dir(),
            vcs,
            registry,
            backend,
            today: Local::now().date_naive(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
        }
    }

    /// Date used for new filenames.
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// User name mixed into declarative migration summaries.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// The structure directory.
    pub fn structure_dir(&self) -> &Path {
        &self.structure_dir
    }

    /// Append a migration named `<date> <summary>.yaml`.
    ///
    /// The head pointer is written before the migration; if the migration
    /// cannot be written the head is restored. An existing branch-upgrade
    /// file is obsoleted.
    pub fn add_migration(&self, summary: &str, migration: NewMigration) -> MigrateResult<AuthoredMigration> {
        if summary.contains(['/', '\\']) {
            return Err(MigrationError::argument(format!(
                "Migration summary \"{}\" must not contain path separators",
                summary
            )));
        }
        std::fs::create_dir_all(&self.structure_dir)?;

        let old_head = ChainHead::read(&self.structure_dir)?;
        let basename = format!("{} {}", self.today.format("%Y-%m-%d"), summary);
        let path = self.structure_dir.join(format!("{}.yaml", basename));
        if path.exists() {
            return Err(MigrationError::other(format!(
                "Migration file \"{}.yaml\" already exists",
                basename
            )));
        }

        let mut document = MigrationDocument::new();
        let follows = old_head
            .latest_change()
            .map(|f| f.trim_end_matches(".yaml").to_string())
            .unwrap_or_else(|| EMPTY_DB.to_string());
        document.insert(FOLLOWS, follows);
        document.merge(migration.document());

        self.advance_head(&old_head, &basename, || document.write(&path))?;
        info!("Added migration {}", path.display());

        let mut warnings = Vec::new();
        let upgrade = self.structure_dir.join(BRANCH_UPGRADE_FILE);
        if upgrade.exists() {
            warnings.push(format!("{} is obsolete and will be renamed.", BRANCH_UPGRADE_FILE));
            let obsolete = self.structure_dir.join(OBSOLETE_UPGRADE_FILE);
            if obsolete.exists() {
                self.vcs.remove_file(&obsolete)?;
            }
            self.vcs.move_file(&upgrade, &obsolete)?;
        }

        Ok(AuthoredMigration { path, warnings })
    }

    /// Point the head at `basename`, then run `write`. If `write` fails the
    /// previous head is restored, or removed when there was none.
    fn advance_head<F>(&self, old_head: &ChainHead, basename: &str, write: F) -> MigrateResult<()>
    where
        F: FnOnce() -> MigrateResult<()>,
    {
        let head_path = self.structure_dir.join(HEAD_FILE);
        let had_head = head_path.is_file();

        let mut new_head = old_head.clone();
        new_head.set_latest_change(basename);
        new_head.write(&self.structure_dir)?;

        if let Err(e) = write() {
            warn!("Writing {} failed; restoring the head pointer", basename);
            if had_head {
                old_head.write(&self.structure_dir)?;
            } else {
                std::fs::remove_file(&head_path)?;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Append a migration implementing the current state of a declarative
    /// file.
    pub fn add_migration_implementing_changes(
        &self,
        decl_file: &Path,
        request: ImplementationRequest,
    ) -> MigrateResult<AuthoredMigration> {
        if !self.vcs.manages(&self.structure_dir) {
            return Err(MigrationError::version_control(format!(
                "{} is not under version control (required for declarative migrations)",
                self.structure_dir.display()
            )));
        }

        let chain = MigrationChain::load(&self.structure_dir)?;
        let resolver = DeclarativeStatusResolver::new(&chain, &self.declarative_dir, self.vcs);
        let (link, status) = resolver.status_of(decl_file)?;
        let goal = implementation_goal(decl_file, status, request)?;
        let object = object_name(decl_file);
        debug!("{} is {}; authoring a {}", decl_file.display(), status, goal);

        let mut document = MigrationDocument::new();
        document.insert(GOAL, goal.as_str());
        document.insert(DECLARATIVE_OBJECT, object.as_str());
        let version = if goal.is_removal() {
            DELETED.to_string()
        } else {
            content_digest(std::fs::read(decl_file)?)
        };
        document.insert(TO_REALIZE, version);
        document.set_text(DELTA, self.delta(decl_file, &link)?, FormattingHint::Literal);

        if !goal.is_management() {
            let suggested = self.suggested_sql(decl_file, &object, status, &link);
            let qualification = if suggested.is_some() {
                Qualification::SuggestedSql
            } else {
                Qualification::Unimplemented
            };
            document.set_text(
                SQL,
                suggested.unwrap_or_else(|| SQL_PLACEHOLDER.to_string()),
                FormattingHint::Literal,
            );
            document.insert(QUALIFICATION, qualification.as_str());
        }
        document.set_text(
            DESCRIPTION,
            format!("Declarative {} of {}", goal, object),
            FormattingHint::Folded,
        );

        let summary = format!("{}-{}.decl", object, self.summary_digest(decl_file));
        self.add_migration(&summary, NewMigration::from_document(document))
    }

    fn summary_digest(&self, decl_file: &Path) -> String {
        let base = match (self.vcs.branch_identifier(), self.vcs.latest_revision(decl_file)) {
            (Ok(branch), Ok(revision)) => {
                format!("{}\0{}\0{}", self.user, branch, revision.unwrap_or_default())
            }
            _ => String::new(),
        };
        content_digest(base)[..SUMMARY_DIGEST_LEN].to_string()
    }

    fn delta(&self, decl_file: &Path, link: &ImplementationLink) -> MigrateResult<String> {
        let revision = match link.migration() {
            Some(migration) => self.vcs.latest_revision(&migration.file_path)?,
            None => None,
        };
        match revision {
            Some(revision) => self.vcs.diff_from(decl_file, &revision),
            None if decl_file.exists() => Ok(std::fs::read_to_string(decl_file)?
                .lines()
                .map(|line| format!("+{}\n", line))
                .collect()),
            None => Ok(String::new()),
        }
    }

    fn suggested_sql(
        &self,
        decl_file: &Path,
        object: &str,
        status: DeclarativeStatus,
        link: &ImplementationLink,
    ) -> Option<String> {
        let result = match status {
            DeclarativeStatus::Unimplemented => self
                .registry
                .load_file(decl_file)
                .and_then(|new| new.map(|n| n.creation_sql(self.backend)).transpose()),
            DeclarativeStatus::Newer => self.previous_state(object, decl_file, link).and_then(|old| {
                let (Some(old), Some(new)) = (old, self.registry.load_file(decl_file)?) else {
                    return Ok(None);
                };
                if old.tag() != new.tag() {
                    return Ok(None);
                }
                new.sql_to_effect_from(old.as_ref(), self.backend).map(Some)
            }),
            DeclarativeStatus::Missing => self
                .previous_state(object, decl_file, link)
                .and_then(|old| old.map(|o| o.destruction_sql(self.backend)).transpose()),
            DeclarativeStatus::Equal | DeclarativeStatus::Older => Ok(None),
        };
        match result {
            Ok(sql) => sql,
            Err(e) => {
                debug!("No SQL suggestion for {}: {}", decl_file.display(), e);
                None
            }
        }
    }

    /// The object as declared when its latest implementation was committed.
    fn previous_state(
        &self,
        object: &str,
        decl_file: &Path,
        link: &ImplementationLink,
    ) -> MigrateResult<Option<Box<dyn SupportedObject>>> {
        let Some(migration) = link.migration() else {
            return Ok(None);
        };
        let Some(revision) = self.vcs.latest_revision(&migration.file_path)? else {
            return Ok(None);
        };
        let Some(bytes) = self.vcs.content_at(decl_file, &revision)? else {
            return Ok(None);
        };
        self.registry.parse(object, &String::from_utf8_lossy(&bytes))
    }
}
