//! Upgrade script planning.

use std::path::PathBuf;

use schemachain_schema::SchemaRoot;
use tracing::{debug, info, warn};

use crate::branch_upgrade::BranchUpgrade;
use crate::chain::MigrationChain;
use crate::declarative::DeclarativeStatusResolver;
use crate::eligibility::ProductionEligibilityChecker;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationId, MigrationRecord};
use crate::sql::{DbBackend, backend_for};
use crate::vcs::VersionControl;

const DEVELOPMENT_WARNING: &str = "\
*********************************************************
***                    WARNING                        ***
*********************************************************

THIS SCRIPT IS FOR USE ONLY ON DEVELOPMENT DATABASES.

IF RUN ON AN EMPTY DATABASE IT WILL CREATE A DEVELOPMENT
DATABASE THAT IS NOT GUARANTEED TO FOLLOW ANY COMMITTED
MIGRATION PATH.";

/// Options of a script request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Require a production-eligible working state.
    pub production: bool,
}

impl ScriptRequest {
    /// Create a development request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set production mode.
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// A generated upgrade script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeScript {
    /// Script text.
    pub sql: String,
    /// Advisory warnings.
    pub warnings: Vec<String>,
    /// Ids of the migrations included, in chain order.
    pub migration_ids: Vec<MigrationId>,
}

impl UpgradeScript {
    /// Whether no migration is included.
    pub fn is_empty(&self) -> bool {
        self.migration_ids.is_empty()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} migrations", self.migration_ids.len())];
        if !self.warnings.is_empty() {
            parts.push(format!("{} warnings", self.warnings.len()));
        }
        parts.join(", ")
    }
}

/// Produces upgrade scripts from a chain.
pub struct ScriptPlanner<'a> {
    structure_dir: PathBuf,
    declarative_dir: PathBuf,
    script_comment: Option<String>,
    vcs: &'a dyn VersionControl,
    backend: Box<dyn DbBackend>,
}

impl<'a> ScriptPlanner<'a> {
    /// Create a planner for a schema root, with the backend its
    /// configuration selects.
    pub fn new(root: &SchemaRoot, vcs: &'a dyn VersionControl) -> Self {
        let database = &root.config().database;
        Self {
            structure_dir: root.structure_dir(),
            declarative_dir: root.declarative_dir(),
            script_comment: database.script_comment.clone(),
            vcs,
            backend: backend_for(database.system),
        }
    }

    /// Replace the backend.
    pub fn with_backend(mut self, backend: Box<dyn DbBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// The backend in use.
    pub fn backend(&self) -> &dyn DbBackend {
        self.backend.as_ref()
    }

    /// Validate the chain and its declaratives, then emit the script.
    /// Any failure aborts with no output.
    pub fn plan(&self, request: ScriptRequest) -> MigrateResult<UpgradeScript> {
        let chain = MigrationChain::load(&self.structure_dir)?;
        if !chain.complete() {
            return Err(MigrationError::IncompleteChain);
        }
        if !chain.includes_all() {
            return Err(MigrationError::OrphanMigrations(chain.orphans().to_vec()));
        }

        if request.production {
            ProductionEligibilityChecker::new(self.vcs).check(&chain)?;
        }

        DeclarativeStatusResolver::new(&chain, &self.declarative_dir, self.vcs)
            .check_declaratives_current()?;

        let mut script = UpgradeScript::default();
        let mut sections = vec![self.intro(request)];

        for migration in chain.migrations() {
            sections.push(self.migration_section(migration));
            script.migration_ids.push(migration.id.clone());
        }

        let upgrade = BranchUpgrade::load(&self.structure_dir);
        script.warnings.extend(upgrade.warnings().iter().cloned());
        if upgrade.found() {
            if upgrade.applicable(&chain) {
                if let Some(sql) = upgrade.sql() {
                    sections.push(format!(
                        "{}\n{}",
                        self.backend.comment("Branch upgrade"),
                        sql.trim_end()
                    ));
                }
            } else {
                warn!("Branch upgrade does not start from the chain tip");
                script.warnings.push(
                    "The branch upgrade migration does not start from the latest migration and was not included"
                        .to_string(),
                );
            }
        }

        let separator = match self.backend.batch_separator() {
            "" => "\n\n".to_string(),
            sep => format!("\n{}\n", sep),
        };
        script.sql = sections
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(&separator);
        script.sql.push('\n');

        info!("Planned upgrade script: {}", script.summary());
        Ok(script)
    }

    fn intro(&self, request: ScriptRequest) -> String {
        let mut lines = Vec::new();
        if let Some(comment) = &self.script_comment {
            lines.push(self.backend.comment(comment.trim_end()));
        }
        if !request.production {
            lines.push(self.backend.comment(DEVELOPMENT_WARNING));
        }
        lines.join("\n")
    }

    fn migration_section(&self, migration: &MigrationRecord) -> String {
        let header = self
            .backend
            .comment(&format!("Migration {}", migration.basename()));
        let sql = if migration.is_declarative() && migration.is_management() {
            debug!("{} only changes management", migration.file_name);
            ""
        } else {
            migration.sql.trim_end()
        };
        if sql.is_empty() {
            header
        } else {
            format!("{}\n{}", header, sql)
        }
    }
}
