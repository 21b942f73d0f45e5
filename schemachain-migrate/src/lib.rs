//! # schemachain-migrate
//!
//! Migration chains and upgrade scripts for schemachain.
//!
//! This crate provides functionality for:
//! - Loading and validating the linked chain of migration files
//! - Deciding whether each declarative object has a current implementing migration
//! - Diffing two declared states of a table into ordered ALTER statements
//! - Splicing a chain forked by a version-control merge back into one line
//! - Authoring new migrations, plain or implementing a declarative file
//! - Producing upgrade scripts, optionally gated on production eligibility
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────┐     ┌───────────────┐
//! │ head.yaml +  │────▶│ MigrationChain      │────▶│ ScriptPlanner │
//! │ migrations   │     └─────────────────────┘     └───────────────┘
//! └──────────────┘               │                         │
//!                                ▼                         ▼
//! ┌──────────────┐     ┌─────────────────────┐     ┌───────────────┐
//! │ declarative/ │────▶│ DeclarativeStatus-  │     │ Production-   │
//! │ *.yaml       │     │ Resolver            │     │ Eligibility   │
//! └──────────────┘     └─────────────────────┘     └───────────────┘
//!                                │
//!                                ▼
//!                      ┌─────────────────────┐
//!                      │ TableDiffer         │
//!                      └─────────────────────┘
//! ```
//!
//! Version-control queries go through the [`VersionControl`] trait; SQL text
//! comes from a [`DbBackend`] chosen once from configuration.
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemachain_migrate::{GitVcs, ScriptPlanner, ScriptRequest};
//! use schemachain_schema::SchemaRoot;
//!
//! let root = SchemaRoot::open("./db")?;
//! let vcs = GitVcs::new(root.root(), &root.config().vcs.production_lineage);
//!
//! let script = ScriptPlanner::new(&root, &vcs)
//!     .plan(ScriptRequest::new().production(root.config().vcs.production_mode))?;
//! println!("{}", script.sql);
//! ```
//!
//! ## Structure Directory
//!
//! ```text
//! structure/
//! ├── head.yaml                         # latest change: 2024-01-02 foo-1a2b3c4d5e6f.decl
//! ├── 2024-01-01 create bar.yaml
//! ├── 2024-01-02 foo-1a2b3c4d5e6f.decl.yaml
//! ├── branch-upgrade.yaml               # optional
//! └── declarative/
//!     └── foo.yaml                      # --- !table
//! ```

pub mod authoring;
pub mod branch_upgrade;
pub mod chain;
pub mod conflict;
pub mod declarative;
pub mod diff;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod migration;
pub mod registry;
pub mod sql;
pub mod vcs;

// Re-exports
pub use authoring::{AuthoredMigration, MigrationAuthor, NewMigration};
pub use branch_upgrade::BranchUpgrade;
pub use chain::{ChainHead, MigrationChain};
pub use conflict::{BranchConflict, ConflictFix, MigrationTweak};
pub use declarative::{
    DeclarativeStatus, DeclarativeStatusResolver, Goal, ImplementationLink, ImplementationRequest,
    Qualification, implementation_goal,
};
pub use diff::{TableDelta, TableDiffer};
pub use eligibility::ProductionEligibilityChecker;
pub use engine::{ScriptPlanner, ScriptRequest, UpgradeScript};
pub use error::{MigrateResult, MigrationError};
pub use migration::{FormattingHint, MigrationDocument, MigrationId, MigrationRecord};
pub use registry::{DeclaredTable, SupportFactory, SupportRegistry, SupportedObject};
pub use sql::{DbBackend, MssqlBackend, PostgresBackend, Sql92, backend_for};
pub use vcs::{BranchUse, ConflictStage, FileStatus, GitVcs, VersionControl};
#[cfg(any(test, feature = "testing"))]
pub use vcs::ScriptedVcs;
