//! Error types for the migration engine.

use std::path::PathBuf;

use schemachain_schema::SchemaError;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A chain link names a file that is not a migration filename.
    #[error("Invalid migration file \"{reference}\" referenced from \"{referenced_from}\"")]
    InvalidChainReference {
        /// The bad reference.
        reference: String,
        /// File holding the reference.
        referenced_from: String,
    },

    /// Walking `starting from` links revisited a migration.
    #[error("Migration chain revisits \"{file}\"")]
    CyclicChain {
        /// First file seen twice.
        file: String,
    },

    /// The oldest migration does not start from the empty database.
    #[error("Migration chain does not reach back to the empty database")]
    IncompleteChain,

    /// Migration files exist that the chain does not reach.
    #[error("Migration files outside the chain: {}", .0.join(", "))]
    OrphanMigrations(Vec<String>),

    /// Malformed declarative specification.
    #[error("Specification error: {0}")]
    Specification(#[from] SchemaError),

    /// Declarative files without a current implementing migration.
    #[error("Declarative files lack a current implementing migration: {}", display_paths(.0))]
    MissingImplementation(Vec<PathBuf>),

    /// An implementing migration carries SQL not yet confirmed by a human.
    #[error("Questionable implementation: {0}")]
    QuestionableImplementation(String),

    /// The declarative file has nothing to implement.
    #[error("No changes to implement for \"{file}\" (status {status})")]
    NoChanges {
        /// Declarative file.
        file: String,
        /// Its resolved status.
        status: String,
    },

    /// Competing chain heads differ in more than the latest change.
    #[error("Branch conflict cannot be resolved automatically: {0}")]
    UnresolvableConflict(String),

    /// The diff needs an alteration that cannot be expressed portably.
    #[error("Cannot alter column \"{column}\" of \"{table}\": {reason}")]
    UnsupportedAlter {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// What makes the alteration unsupported.
        reason: String,
    },

    /// Version control query failed or reported an inconsistent state.
    #[error("Version control error: {0}")]
    VersionControl(String),

    /// Request incompatible with the declarative file's status.
    #[error("Argument error: {0}")]
    Argument(String),

    /// Invalid migration file or format.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    /// Create an invalid chain reference error.
    pub fn invalid_reference(reference: impl Into<String>, from: impl Into<String>) -> Self {
        Self::InvalidChainReference {
            reference: reference.into(),
            referenced_from: from.into(),
        }
    }

    /// Create a version control error.
    pub fn version_control(msg: impl Into<String>) -> Self {
        Self::VersionControl(msg.into())
    }

    /// Create an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a questionable implementation error.
    pub fn questionable(msg: impl Into<String>) -> Self {
        Self::QuestionableImplementation(msg.into())
    }

    /// Create an unresolvable conflict error.
    pub fn unresolvable(msg: impl Into<String>) -> Self {
        Self::UnresolvableConflict(msg.into())
    }

    /// Create a migration file error.
    pub fn migration_file(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoChanges { .. })
    }
}
