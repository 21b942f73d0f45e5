//! # schemachain
//!
//! Auditable, linearly ordered migration chains with declarative schema
//! reconciliation.
//!
//! schemachain provides:
//! - A chain of dated YAML migrations linked from a `head.yaml` pointer
//! - Declarative table files checked against their implementing migrations
//! - Ordered ALTER statements between two declared states of a table
//! - Repair of a chain forked by a version-control merge
//! - Upgrade scripts, optionally restricted to the production lineage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use schemachain::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = SchemaRoot::open("./db")?;
//!     let vcs = GitVcs::new(root.root(), &root.config().vcs.production_lineage);
//!
//!     let chain = MigrationChain::load(root.structure_dir())?;
//!     chain.ensure_valid()?;
//!
//!     let script = ScriptPlanner::new(&root, &vcs).plan(ScriptRequest::new())?;
//!     println!("{}", script.sql);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Declarative table model, parsing and configuration.
pub mod schema {
    pub use schemachain_schema::*;
}

/// Migration chains, declarative status, diffing and scripts.
pub mod migrate {
    pub use schemachain_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        BranchConflict, DeclarativeStatus, DeclarativeStatusResolver, GitVcs, ImplementationRequest,
        MigrateResult, MigrationAuthor, MigrationChain, MigrationError, NewMigration, ScriptPlanner,
        ScriptRequest, SupportRegistry, TableDiffer, UpgradeScript, VersionControl, backend_for,
    };
    pub use crate::schema::{SchemaChainConfig, SchemaError, SchemaRoot, Table, parse_table};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationChain, MigrationError};
pub use schema::{SchemaError, SchemaResult};
