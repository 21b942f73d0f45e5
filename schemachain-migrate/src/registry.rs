//! Declarative object support, keyed by document tag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use schemachain_schema::{DeclarativeDocument, Table, parser::TABLE_TAG, table_from_value};
use serde_yaml::Value;
use tracing::debug;

use crate::diff::TableDiffer;
use crate::error::{MigrateResult, MigrationError};
use crate::sql::DbBackend;

/// A declarative object the engine can generate SQL for.
pub trait SupportedObject: fmt::Debug {
    /// Document tag this object was read from.
    fn tag(&self) -> &'static str;

    /// Object name.
    fn name(&self) -> &str;

    /// SQL creating the object from nothing.
    fn creation_sql(&self, backend: &dyn DbBackend) -> MigrateResult<String>;

    /// SQL turning `old` into this object.
    fn sql_to_effect_from(&self, old: &dyn SupportedObject, backend: &dyn DbBackend) -> MigrateResult<String>;

    /// SQL removing the object.
    fn destruction_sql(&self, backend: &dyn DbBackend) -> MigrateResult<String>;

    /// Downcasting support for `sql_to_effect_from`.
    fn as_any(&self) -> &dyn Any;
}

/// Builds a supported object from a name and an untagged document body.
pub type SupportFactory = fn(&str, &Value) -> MigrateResult<Box<dyn SupportedObject>>;

/// A declared table as a supported object.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredTable {
    /// The validated table.
    pub table: Table,
}

impl DeclaredTable {
    /// Factory registered for the `table` tag.
    pub fn build(name: &str, body: &Value) -> MigrateResult<Box<dyn SupportedObject>> {
        Ok(Box::new(Self {
            table: table_from_value(name, body)?,
        }))
    }
}

impl SupportedObject for DeclaredTable {
    fn tag(&self) -> &'static str {
        TABLE_TAG
    }

    fn name(&self) -> &str {
        self.table.name()
    }

    fn creation_sql(&self, backend: &dyn DbBackend) -> MigrateResult<String> {
        Ok(TableDiffer::new(backend).creation_sql(&self.table))
    }

    fn sql_to_effect_from(&self, old: &dyn SupportedObject, backend: &dyn DbBackend) -> MigrateResult<String> {
        let old = old.as_any().downcast_ref::<DeclaredTable>().ok_or_else(|| {
            MigrationError::other(format!(
                "cannot turn a {} into table {}",
                old.tag(),
                self.name()
            ))
        })?;
        Ok(TableDiffer::new(backend)
            .delta(&old.table, &self.table)?
            .join("\n"))
    }

    fn destruction_sql(&self, backend: &dyn DbBackend) -> MigrateResult<String> {
        Ok(TableDiffer::new(backend).destruction_sql(&self.table))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Map from document tag to the factory that reads it.
#[derive(Debug, Clone, Default)]
pub struct SupportRegistry {
    factories: HashMap<String, SupportFactory>,
}

impl SupportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `table` support.
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<String, SupportFactory> = HashMap::new();
        factories.insert(TABLE_TAG.to_string(), DeclaredTable::build);
        Self { factories }
    }

    /// Register a factory. Each tag may be registered once.
    pub fn register(&mut self, tag: &str, factory: SupportFactory) -> MigrateResult<()> {
        if self.factories.contains_key(tag) {
            return Err(MigrationError::other(format!(
                "declarative support for !{} is already registered",
                tag
            )));
        }
        self.factories.insert(tag.to_string(), factory);
        Ok(())
    }

    /// Whether a tag is supported.
    pub fn supports(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Build the supported object of a document; `None` for untagged or
    /// unsupported documents.
    pub fn build(&self, name: &str, doc: &DeclarativeDocument) -> MigrateResult<Option<Box<dyn SupportedObject>>> {
        let Some(factory) = doc.tag.as_deref().and_then(|t| self.factories.get(t)) else {
            debug!("No declarative support for {} (tag {:?})", name, doc.tag);
            return Ok(None);
        };
        factory(name, &doc.body).map(Some)
    }

    /// Parse text and build its supported object.
    pub fn parse(&self, name: &str, content: &str) -> MigrateResult<Option<Box<dyn SupportedObject>>> {
        let doc = DeclarativeDocument::parse(name, content)?;
        self.build(name, &doc)
    }

    /// Read a declarative file and build its supported object. The object is
    /// named after the file stem.
    pub fn load_file(&self, path: &Path) -> MigrateResult<Option<Box<dyn SupportedObject>>> {
        let name = object_name(path);
        let content = std::fs::read_to_string(path)?;
        self.parse(&name, &content)
    }
}

/// Object name of a declarative file: its filename without extension.
pub fn object_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
