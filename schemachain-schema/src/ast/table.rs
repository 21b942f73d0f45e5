//! Declared table definitions.

use indexmap::IndexMap;
use smol_str::SmolStr;

use super::{Constraint, ConstraintKind};

/// A column of a declared table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: SmolStr,
    /// SQL type text, exactly as declared.
    pub sql_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column carries the `primary key` flag.
    pub primary_key: bool,
    /// Default expression declared inline on the column.
    pub default: Option<String>,
}

impl Column {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<SmolStr>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    /// Mark the column as part of the primary key (which also makes it
    /// non-nullable).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Set nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set the inline default expression.
    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Get the column name as a string.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// A declared table: the desired end state of one database table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Table name (may be schema-qualified, e.g. `dbo.foo`).
    pub name: SmolStr,
    /// Columns in declaration order.
    pub columns: IndexMap<SmolStr, Column>,
    /// Named constraints in declaration order. An implicit primary key built
    /// from column flags comes first.
    pub constraints: IndexMap<SmolStr, Constraint>,
    /// Extension keys (`X-` prefixed) by dotted key path, in declaration
    /// order.
    pub extensions: IndexMap<String, serde_yaml::Value>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            constraints: IndexMap::new(),
            extensions: IndexMap::new(),
        }
    }

    /// Get the table name as a string.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Add a column.
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    /// Add a constraint.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.insert(constraint.name.clone(), constraint);
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Get a constraint by name.
    pub fn get_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.get(name)
    }

    /// The primary key constraint, if any.
    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .values()
            .find(|c| c.kind() == ConstraintKind::PrimaryKey)
    }

    /// Name given to the primary key implied by column flags.
    pub fn implicit_primary_key_name(&self) -> String {
        format!("PK_{}", self.name.replace('.', "_"))
    }

    /// Columns flagged `primary key`, in declaration order.
    pub fn flagged_primary_key_columns(&self) -> Vec<SmolStr> {
        self.columns
            .values()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Default constraints (applied inline at creation) targeting `column`.
    pub fn default_constraint_for(&self, column: &str) -> Option<&Constraint> {
        self.constraints
            .values()
            .find(|c| c.kind() == ConstraintKind::Default && c.constrained_columns() == [column])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ConstraintBody;

    fn sample() -> Table {
        let mut table = Table::new("dbo.foo");
        table.add_column(Column::new("id", "bigint").primary_key());
        table.add_column(Column::new("weapon", "varchar(32)"));
        table
    }

    #[test]
    fn test_column_defaults() {
        let col = Column::new("weapon", "varchar(32)");
        assert!(col.nullable);
        assert!(!col.primary_key);
        assert!(col.default.is_none());
    }

    #[test]
    fn test_primary_key_column_not_nullable() {
        let col = Column::new("id", "bigint").primary_key();
        assert!(col.primary_key);
        assert!(!col.nullable);
    }

    #[test]
    fn test_implicit_primary_key_name() {
        assert_eq!(sample().implicit_primary_key_name(), "PK_dbo_foo");
    }

    #[test]
    fn test_column_lookup_preserves_order() {
        let table = sample();
        assert!(table.has_column("id"));
        assert!(!table.has_column("caliber"));
        let names: Vec<_> = table.columns.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["id", "weapon"]);
        assert_eq!(table.flagged_primary_key_columns(), vec![SmolStr::new("id")]);
    }

    #[test]
    fn test_default_constraint_lookup() {
        let mut table = sample();
        table.add_constraint(Constraint::new(
            "DF_foo_weapon",
            ConstraintBody::Default {
                column: "weapon".into(),
                value: "'sword'".to_string(),
            },
        ));
        assert!(table.default_constraint_for("weapon").is_some());
        assert!(table.default_constraint_for("id").is_none());
    }
}
