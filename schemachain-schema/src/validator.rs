//! Semantic validation of declared tables.
//!
//! This module checks the invariants a declared table must satisfy:
//! - At most one primary key, counting column flags and explicit constraints
//! - Every constrained column exists
//! - Constraint names are unique
//! - No unrecognized standard keys

use indexmap::IndexMap;

use crate::ast::{Constraint, ConstraintKind, Table};
use crate::error::{SchemaError, SchemaResult};
use crate::parser::TableReading;

/// Table validator for semantic analysis.
#[derive(Debug)]
pub struct Validator {
    /// Collected validation errors.
    errors: Vec<SchemaError>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self { errors: vec![] }
    }

    /// Validate a table reading and return the finished table or errors.
    pub fn validate(&mut self, reading: TableReading) -> SchemaResult<Table> {
        self.errors.clear();
        self.errors.extend(reading.errors);

        let TableReading {
            mut table,
            implicit_primary_key,
            unrecognized_keys,
            ..
        } = reading;

        for key in unrecognized_keys {
            self.errors.push(SchemaError::specification(
                table.name(),
                format!("Unrecognized standard key {}", key),
            ));
        }

        self.reconcile_primary_keys(&mut table, implicit_primary_key);
        self.check_constrained_columns(&table);

        if self.errors.is_empty() {
            Ok(table)
        } else {
            Err(SchemaError::ValidationFailed {
                object: table.name().to_string(),
                count: self.errors.len(),
                errors: std::mem::take(&mut self.errors),
            })
        }
    }

    /// Merge the flag-implied primary key with explicit ones, rejecting any
    /// combination that amounts to more than one primary key.
    fn reconcile_primary_keys(&mut self, table: &mut Table, implicit: Option<Constraint>) {
        let explicit: Vec<&Constraint> = table
            .constraints
            .values()
            .filter(|c| c.kind() == ConstraintKind::PrimaryKey)
            .collect();

        if explicit.len() > 1 {
            self.errors.push(SchemaError::MultiplePrimaryKeys {
                object: table.name().to_string(),
            });
            return;
        }

        let Some(implicit) = implicit else {
            return;
        };

        if let Some(explicit) = explicit.first() {
            if explicit.constrained_columns() != implicit.constrained_columns() {
                self.errors.push(SchemaError::MultiplePrimaryKeys {
                    object: table.name().to_string(),
                });
            }
            return;
        }

        if table.constraints.contains_key(&implicit.name) {
            self.errors.push(SchemaError::duplicate(
                table.name(),
                "constraint",
                implicit.name.as_str(),
            ));
            return;
        }

        let mut constraints = IndexMap::with_capacity(table.constraints.len() + 1);
        constraints.insert(implicit.name.clone(), implicit);
        constraints.extend(std::mem::take(&mut table.constraints));
        table.constraints = constraints;
    }

    fn check_constrained_columns(&mut self, table: &Table) {
        for constraint in table.constraints.values() {
            let unknown: Vec<&str> = constraint
                .constrained_columns()
                .into_iter()
                .filter(|c| !table.has_column(c))
                .collect();
            if !unknown.is_empty() {
                self.errors.push(SchemaError::UnknownColumn {
                    kind: constraint.kind().identifier().to_string(),
                    constraint: constraint.name().to_string(),
                    columns: unknown.join(", "),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SchemaError;
    use crate::parser::parse_table;

    fn errors_of(content: &str) -> Vec<SchemaError> {
        match parse_table("foo", content) {
            Err(SchemaError::ValidationFailed { errors, .. }) => errors,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_constrained_column() {
        let errors = errors_of(
            "--- !table
columns:
- name: id
  type: int
constraints:
  UQ_foo_name:
    columns: [name]
",
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SchemaError::UnknownColumn { .. }));
    }

    #[test]
    fn test_flag_and_explicit_primary_key_disagree() {
        let errors = errors_of(
            "--- !table
columns:
- name: id
  type: int
  primary key: true
- name: code
  type: int
constraints:
  PK_other:
    columns: [code]
",
        );
        assert!(matches!(errors[0], SchemaError::MultiplePrimaryKeys { .. }));
    }

    #[test]
    fn test_flag_and_matching_explicit_primary_key_accepted() {
        let table = parse_table(
            "foo",
            "--- !table
columns:
- name: id
  type: int
  primary key: true
constraints:
  PK_foo_custom:
    columns: [id]
",
        )
        .unwrap();
        assert_eq!(table.primary_key().unwrap().name(), "PK_foo_custom");
        assert_eq!(table.constraints.len(), 1);
    }

    #[test]
    fn test_two_explicit_primary_keys() {
        let errors = errors_of(
            "--- !table
columns:
- name: a
  type: int
- name: b
  type: int
constraints:
  PK_a:
    columns: [a]
  PK_b:
    columns: [b]
",
        );
        assert!(matches!(errors[0], SchemaError::MultiplePrimaryKeys { .. }));
    }

    #[test]
    fn test_implicit_primary_key_name_collision() {
        let errors = errors_of(
            "--- !table
columns:
- name: id
  type: int
  primary key: true
constraints:
  PK_foo:
    type: unique
    columns: [id]
",
        );
        assert!(matches!(errors[0], SchemaError::Duplicate { .. }));
    }

    #[test]
    fn test_unrecognized_keys_reported_together() {
        let errors = errors_of(
            "--- !table
indexes: []
columns:
- name: id
  type: int
  size: 4
",
        );
        assert_eq!(errors.len(), 2);
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("indexes")));
        assert!(messages.iter().any(|m| m.contains("columns.id.size")));
    }

    #[test]
    fn test_duplicate_column_reported() {
        let errors = errors_of(
            "--- !table
columns:
- name: id
  type: int
- name: id
  type: bigint
",
        );
        assert!(matches!(errors[0], SchemaError::Duplicate { .. }));
    }

    #[test]
    fn test_implicit_primary_key_comes_first() {
        let table = parse_table(
            "foo",
            "--- !table
columns:
- name: id
  type: int
  primary key: true
constraints:
  UQ_foo_id:
    columns: [id]
",
        )
        .unwrap();
        let names: Vec<_> = table.constraints.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["PK_foo", "UQ_foo_id"]);
    }
}
