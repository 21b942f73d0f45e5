//! Reader for declarative specification files.
//!
//! A declarative file is a single tagged YAML document:
//!
//! ```yaml
//! --- !table
//! columns:
//! - name: id
//!   type: bigint
//!   primary key: true
//! - name: weapon
//!   type: varchar(32)
//! constraints:
//!   UQ_foo_weapon:
//!     columns: [weapon]
//! ```
//!
//! Reading is split in two: this module converts the YAML structure into a
//! [`Table`], failing fast on shape errors (missing `columns`, unknown
//! constraint type, ...), and records anything it did not recognize. The
//! [`Validator`](crate::validator::Validator) then checks the semantic
//! invariants and reports every problem at once.

use std::path::Path;

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use smol_str::SmolStr;
use tracing::trace;

use crate::ast::{Column, Constraint, ConstraintBody, ConstraintKind, Table};
use crate::error::{SchemaError, SchemaResult};
use crate::validator::Validator;

/// Keys beginning with this prefix are extensions, not standard keys.
pub const EXTENSION_PREFIX: &str = "X-";

/// Tag marking a declarative table document.
pub const TABLE_TAG: &str = "table";

const TABLE_KEYS: &[&str] = &["columns", "constraints"];
const COLUMN_KEYS: &[&str] = &["name", "type", "primary key", "nullable", "default"];

/// A parsed declarative document: its tag (without the leading `!`) and
/// its untagged body.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarativeDocument {
    /// Document tag, e.g. `table`.
    pub tag: Option<String>,
    /// Document body.
    pub body: Value,
}

impl DeclarativeDocument {
    /// Parse a declarative document from text. `origin` names the source in
    /// error messages.
    pub fn parse(origin: &str, content: &str) -> SchemaResult<Self> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|e| SchemaError::yaml(origin, e))?;

        Ok(match value {
            Value::Tagged(tagged) => Self {
                tag: Some(tagged.tag.to_string().trim_start_matches('!').to_string()),
                body: tagged.value,
            },
            body => Self { tag: None, body },
        })
    }

    /// Read and parse a declarative file.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&path.display().to_string(), &content)
    }

    /// Whether the document carries the given tag.
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }
}

/// Parse the text of a `!table` declarative file into a validated [`Table`].
pub fn parse_table(name: &str, content: &str) -> SchemaResult<Table> {
    let doc = DeclarativeDocument::parse(name, content)?;
    if !doc.is_tagged(TABLE_TAG) {
        return Err(SchemaError::specification(
            name,
            format!("expected a !{} document", TABLE_TAG),
        ));
    }
    table_from_value(name, &doc.body)
}

/// Build a validated [`Table`] from an untagged document body.
pub fn table_from_value(name: &str, body: &Value) -> SchemaResult<Table> {
    let reading = read_table(name, body)?;
    Validator::new().validate(reading)
}

/// The raw result of reading a table document, before validation.
#[derive(Debug)]
pub struct TableReading {
    /// Table with explicit constraints only.
    pub table: Table,
    /// Primary key implied by column flags, if any column is flagged.
    pub implicit_primary_key: Option<Constraint>,
    /// Dotted key paths of unrecognized standard keys.
    pub unrecognized_keys: Vec<String>,
    /// Problems found while reading that do not stop the read.
    pub errors: Vec<SchemaError>,
}

/// Convert a table document body into a [`TableReading`].
pub fn read_table(name: &str, body: &Value) -> SchemaResult<TableReading> {
    let map = body
        .as_mapping()
        .ok_or_else(|| SchemaError::specification(name, "expected a mapping at the top level"))?;

    let mut reading = TableReading {
        table: Table::new(name),
        implicit_primary_key: None,
        unrecognized_keys: Vec::new(),
        errors: Vec::new(),
    };

    scan_keys(map, &[], TABLE_KEYS, &mut reading);

    let columns = map
        .get("columns")
        .ok_or_else(|| SchemaError::specification(name, "No columns specified for table"))?
        .as_sequence()
        .ok_or_else(|| SchemaError::specification(name, "expected \"columns\" to be a sequence"))?;

    for item in columns {
        let column = read_column(name, item, &mut reading)?;
        if reading.table.has_column(column.name()) {
            reading
                .errors
                .push(SchemaError::duplicate(name, "column", column.name()));
            continue;
        }
        reading.table.add_column(column);
    }

    let flagged = reading.table.flagged_primary_key_columns();
    if !flagged.is_empty() {
        reading.implicit_primary_key = Some(Constraint::new(
            reading.table.implicit_primary_key_name(),
            ConstraintBody::PrimaryKey { columns: flagged },
        ));
    }

    if let Some(constraints) = map.get("constraints") {
        let constraints = constraints.as_mapping().ok_or_else(|| {
            SchemaError::specification(name, "expected \"constraints\" to be a mapping")
        })?;
        for (key, spec) in constraints {
            let constraint_name = key.as_str().ok_or_else(|| {
                SchemaError::specification(name, "constraint names must be strings")
            })?;
            let constraint = read_constraint(name, constraint_name, spec, &mut reading)?;
            reading.table.add_constraint(constraint);
        }
    }

    trace!(
        table = name,
        columns = reading.table.columns.len(),
        constraints = reading.table.constraints.len(),
        "read declarative table"
    );
    Ok(reading)
}

fn read_column(table: &str, item: &Value, reading: &mut TableReading) -> SchemaResult<Column> {
    let map = item
        .as_mapping()
        .ok_or_else(|| SchemaError::specification(table, "each column must be a mapping"))?;

    let name = map
        .get("name")
        .and_then(scalar_text)
        .ok_or_else(|| SchemaError::specification(table, "column without a name"))?;
    let sql_type = map.get("type").and_then(scalar_text).ok_or_else(|| {
        SchemaError::specification(table, format!("column {} does not specify a type", name))
    })?;

    let mut column = Column::new(name.as_str(), sql_type);
    if flag(table, map, "primary key")? {
        column = column.primary_key();
    }
    if let Some(nullable) = map.get("nullable") {
        let nullable = nullable.as_bool().ok_or_else(|| {
            SchemaError::specification(table, format!("column {} \"nullable\" must be a boolean", name))
        })?;
        column.nullable = nullable;
    }
    if let Some(default) = map.get("default") {
        column.default = Some(scalar_text(default).ok_or_else(|| {
            SchemaError::specification(table, format!("column {} default must be a scalar", name))
        })?);
    }

    scan_keys(map, &["columns", name.as_str()], COLUMN_KEYS, reading);
    Ok(column)
}

fn read_constraint(
    table: &str,
    name: &str,
    spec: &Value,
    reading: &mut TableReading,
) -> SchemaResult<Constraint> {
    let map = spec.as_mapping().ok_or_else(|| {
        SchemaError::specification(table, format!("constraint {} must be a mapping", name))
    })?;

    let kind = match map.get("type").and_then(Value::as_str) {
        Some(identifier) => ConstraintKind::from_identifier(identifier).ok_or_else(|| {
            SchemaError::specification(
                table,
                format!("Unknown constraint type \"{}\" for constraint {}", identifier, name),
            )
        })?,
        None => ConstraintKind::from_name(name).ok_or_else(|| {
            SchemaError::specification(
                table,
                format!("No type specified (or inferrable) for constraint {}", name),
            )
        })?,
    };

    let body = match kind {
        ConstraintKind::PrimaryKey => ConstraintBody::PrimaryKey {
            columns: column_list(table, name, kind, map)?,
        },
        ConstraintKind::Unique => ConstraintBody::Unique {
            columns: column_list(table, name, kind, map)?,
        },
        ConstraintKind::ForeignKey => read_foreign_key(table, name, map)?,
        ConstraintKind::Check => ConstraintBody::Check {
            expression: required_text(table, name, map, "verify", "an expression to \"verify\"")?,
        },
        ConstraintKind::Default => ConstraintBody::Default {
            value: required_text(table, name, map, "value", "a \"value\"")?,
            column: required_text(table, name, map, "column", "a \"column\"")?.into(),
        },
    };

    scan_keys(map, &["constraints", name], kind.recognized_keys(), reading);
    Ok(Constraint::new(name, body))
}

fn read_foreign_key(table: &str, name: &str, map: &Mapping) -> SchemaResult<ConstraintBody> {
    let raw = map.get("columns").ok_or_else(|| {
        SchemaError::specification(
            table,
            format!("foreign key constraint {} must specify columns", name),
        )
    })?;
    let pairs = raw.as_mapping().ok_or_else(|| {
        SchemaError::specification(
            table,
            format!(
                "Foreign key constraint {} expected \"columns\" to be a mapping referrer -> referent",
                name
            ),
        )
    })?;

    let mut columns = IndexMap::new();
    for (referrer, referent) in pairs {
        let (Some(referrer), Some(referent)) = (scalar_text(referrer), scalar_text(referent)) else {
            return Err(SchemaError::specification(
                table,
                format!("Foreign key constraint {} has a non-scalar column mapping", name),
            ));
        };
        columns.insert(SmolStr::from(referrer), SmolStr::from(referent));
    }

    Ok(ConstraintBody::ForeignKey {
        columns,
        referent: required_text(table, name, map, "link to", "\"link to\" (referent)")?,
        on_update: map
            .get("on update")
            .and_then(scalar_text)
            .map(|r| r.to_uppercase()),
        on_delete: map
            .get("on delete")
            .and_then(scalar_text)
            .map(|r| r.to_uppercase()),
    })
}

fn column_list(
    table: &str,
    name: &str,
    kind: ConstraintKind,
    map: &Mapping,
) -> SchemaResult<Vec<SmolStr>> {
    let raw = map.get("columns").ok_or_else(|| {
        SchemaError::specification(
            table,
            format!("{} constraint {} must specify columns", kind.identifier(), name),
        )
    })?;
    let items = raw.as_sequence().ok_or_else(|| {
        SchemaError::specification(
            table,
            format!(
                "{} constraint {} expected \"columns\" to be a sequence",
                kind.identifier(),
                name
            ),
        )
    })?;

    let mut columns: Vec<SmolStr> = Vec::with_capacity(items.len());
    for item in items {
        let column = scalar_text(item).ok_or_else(|| {
            SchemaError::specification(
                table,
                format!("{} constraint {} lists a non-scalar column", kind.identifier(), name),
            )
        })?;
        if columns.iter().any(|c| c == column.as_str()) {
            return Err(SchemaError::specification(
                table,
                format!(
                    "{} constraint {} has one or more duplicate columns",
                    kind.identifier(),
                    name
                ),
            ));
        }
        columns.push(column.into());
    }
    Ok(columns)
}

fn required_text(
    table: &str,
    name: &str,
    map: &Mapping,
    key: &str,
    what: &str,
) -> SchemaResult<String> {
    map.get(key).and_then(scalar_text).ok_or_else(|| {
        SchemaError::specification(
            table,
            format!("constraint {} does not specify {}", name, what),
        )
    })
}

fn flag(table: &str, map: &Mapping, key: &str) -> SchemaResult<bool> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(SchemaError::specification(
            table,
            format!("\"{}\" must be a boolean", key),
        )),
    }
}

/// Record extension keys and unrecognized standard keys of one mapping.
fn scan_keys(map: &Mapping, keypath: &[&str], recognized: &[&str], reading: &mut TableReading) {
    for (key, value) in map {
        let Some(key) = key.as_str() else {
            reading
                .unrecognized_keys
                .push(dotted(keypath, &format!("{:?}", key)));
            continue;
        };
        if key.starts_with(EXTENSION_PREFIX) {
            reading
                .table
                .extensions
                .insert(dotted(keypath, key), value.clone());
        } else if !recognized.contains(&key) {
            reading.unrecognized_keys.push(dotted(keypath, key));
        }
    }
}

fn dotted(keypath: &[&str], key: &str) -> String {
    let mut parts: Vec<&str> = keypath.to_vec();
    parts.push(key);
    parts.join(".")
}

/// Text of a scalar YAML value; `None` for collections and null.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOO: &str = "--- !table
columns:
- name: id
  type: bigint
  primary key: true
- name: weapon
  type: varchar(32)
";

    #[test]
    fn test_parse_tagged_document() {
        let doc = DeclarativeDocument::parse("foo", FOO).unwrap();
        assert_eq!(doc.tag.as_deref(), Some("table"));
        assert!(doc.body.as_mapping().is_some());
    }

    #[test]
    fn test_parse_untagged_document() {
        let doc = DeclarativeDocument::parse("foo", "columns: []\n").unwrap();
        assert!(doc.tag.is_none());
        assert!(parse_table("foo", "columns: []\n").is_err());
    }

    #[test]
    fn test_parse_simple_table() {
        let table = parse_table("foo", FOO).unwrap();
        assert_eq!(table.name(), "foo");
        assert_eq!(table.columns.len(), 2);
        let pk = table.primary_key().unwrap();
        assert_eq!(pk.name(), "PK_foo");
        assert_eq!(pk.constrained_columns(), vec!["id"]);
        assert!(!table.get_column("id").unwrap().nullable);
        assert!(table.get_column("weapon").unwrap().nullable);
    }

    #[test]
    fn test_constraint_type_inferred_from_prefix() {
        let table = parse_table(
            "foo",
            "--- !table
columns:
- name: id
  type: bigint
- name: owner
  type: bigint
constraints:
  UQ_foo_owner:
    columns: [owner]
  FK_foo_owner:
    columns:
      owner: id
    link to: owners
    on delete: cascade
  CK_foo_id:
    verify: id > 0
  DF_foo_owner:
    value: 0
    column: owner
",
        )
        .unwrap();

        let kinds: Vec<_> = table.constraints.values().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ConstraintKind::Unique,
                ConstraintKind::ForeignKey,
                ConstraintKind::Check,
                ConstraintKind::Default,
            ]
        );
        match &table.get_constraint("FK_foo_owner").unwrap().body {
            ConstraintBody::ForeignKey {
                referent,
                on_delete,
                on_update,
                ..
            } => {
                assert_eq!(referent, "owners");
                assert_eq!(on_delete.as_deref(), Some("CASCADE"));
                assert!(on_update.is_none());
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_missing_columns_is_specification_error() {
        let err = parse_table("foo", "--- !table\nconstraints: {}\n").unwrap_err();
        assert!(err.is_specification());
    }

    #[test]
    fn test_unknown_constraint_type() {
        let err = parse_table(
            "foo",
            "--- !table
columns:
- name: id
  type: int
constraints:
  weird:
    type: index
    columns: [id]
",
        )
        .unwrap_err();
        assert!(err.to_string().contains("foo"));
        assert!(err.is_specification());
    }

    #[test]
    fn test_uninferrable_constraint_type() {
        let err = parse_table(
            "foo",
            "--- !table
columns:
- name: id
  type: int
constraints:
  something:
    columns: [id]
",
        )
        .unwrap_err();
        assert!(err.is_specification());
    }

    #[test]
    fn test_foreign_key_requires_mapping() {
        let err = parse_table(
            "foo",
            "--- !table
columns:
- name: owner
  type: int
constraints:
  FK_foo_owner:
    columns: [owner]
    link to: owners
",
        )
        .unwrap_err();
        assert!(err.is_specification());
    }

    #[test]
    fn test_extension_keys_collected_with_key_path() {
        let table = parse_table(
            "foo",
            "--- !table
X-owner: team-a
columns:
- name: id
  type: int
  X-comment: surrogate
constraints:
  UQ_foo_id:
    columns: [id]
    X-note: redundant
",
        )
        .unwrap();

        let keys: Vec<_> = table.extensions.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "X-owner".to_string(),
                "columns.id.X-comment".to_string(),
                "constraints.UQ_foo_id.X-note".to_string(),
            ]
        );
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&Value::from(3)), Some("3".to_string()));
        assert_eq!(scalar_text(&Value::from("x")), Some("x".to_string()));
        assert_eq!(scalar_text(&Value::Null), None);
    }
}
