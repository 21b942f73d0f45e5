//! # schemachain-schema
//!
//! Declarative object model and parsing for schemachain.
//!
//! This crate provides:
//! - The in-memory model of declared tables (`Table`, `Column`, `Constraint`)
//! - A reader for tagged declarative YAML files (`--- !table`)
//! - Table validation and semantic analysis
//! - Configuration parser for `schemachain.toml` files
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemachain_schema::{parse_table, SchemaRoot};
//!
//! let table = parse_table("foo", r#"--- !table
//! columns:
//! - name: id
//!   type: bigint
//!   primary key: true
//! "#)?;
//! assert_eq!(table.primary_key().unwrap().name(), "PK_foo");
//!
//! let root = SchemaRoot::open("db")?;
//! println!("{}", root.structure_dir().display());
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod parser;
pub mod validator;

pub use ast::*;
pub use config::{DatabaseSystem, SchemaChainConfig, SchemaRoot};
pub use error::{SchemaError, SchemaResult};
pub use parser::{DeclarativeDocument, parse_table, table_from_value};
pub use validator::Validator;
