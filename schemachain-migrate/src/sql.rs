//! SQL text generation per database system.
//!
//! The diff engine decides *which* statements a change needs; a
//! [`DbBackend`] decides how each one is spelled. The trait's default methods
//! produce SQL-92 text; backends override only what their system spells
//! differently.

use std::fmt;

use schemachain_schema::{Column, Constraint, ConstraintBody, DatabaseSystem};

/// Default value of a column as it appears in a column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefault<'a> {
    /// Default expression.
    pub value: &'a str,
    /// Name of the declaring default constraint, if any.
    pub constraint: Option<&'a str>,
}

/// Whether `part` can be written without quoting.
pub fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote each dotted part of `ident` for which `needs_quotes` holds.
fn quote_parts(ident: &str, open: char, close: char, needs_quotes: impl Fn(&str) -> bool) -> String {
    ident
        .split('.')
        .map(|part| {
            if needs_quotes(part) {
                let escaped = part.replace(close, &format!("{}{}", close, close));
                format!("{}{}{}", open, escaped, close)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Statement builders for one database system.
pub trait DbBackend: fmt::Debug {
    /// System name, for script comments.
    fn name(&self) -> &'static str;

    /// Quote an identifier if it is not a plain (dotted) identifier.
    fn quote_identifier(&self, ident: &str) -> String {
        quote_parts(ident, '"', '"', |p| !is_plain_identifier(p))
    }

    /// Line placed between batches of a script; empty when the system has no
    /// batch separator.
    fn batch_separator(&self) -> &'static str {
        ""
    }

    /// Whether a column's default is a named object that must be dropped
    /// before the column can be.
    fn default_blocks_column_drop(&self) -> bool {
        false
    }

    /// A comment line.
    fn comment(&self, text: &str) -> String {
        text.lines()
            .map(|l| format!("-- {}", l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `name type [DEFAULT expr] [NOT NULL]`.
    fn column_definition(&self, _table: &str, column: &Column, default: Option<&ColumnDefault<'_>>) -> String {
        let mut sql = format!("{} {}", self.quote_identifier(column.name()), column.sql_type);
        if let Some(default) = default {
            sql.push_str(&format!(" DEFAULT {}", default.value));
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Table-level constraint definition, as used in `CREATE TABLE` and
    /// `ADD CONSTRAINT`.
    fn constraint_definition(&self, constraint: &Constraint) -> String {
        let name = self.quote_identifier(constraint.name());
        let list = |columns: &[&str]| {
            columns
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &constraint.body {
            ConstraintBody::PrimaryKey { .. } => format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                name,
                list(&constraint.constrained_columns())
            ),
            ConstraintBody::Unique { .. } => format!(
                "CONSTRAINT {} UNIQUE ({})",
                name,
                list(&constraint.constrained_columns())
            ),
            ConstraintBody::ForeignKey {
                columns,
                referent,
                on_update,
                on_delete,
            } => {
                let referrers: Vec<&str> = columns.keys().map(|c| c.as_str()).collect();
                let referenced: Vec<&str> = columns.values().map(|c| c.as_str()).collect();
                let mut sql = format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    name,
                    list(&referrers),
                    self.quote_identifier(referent),
                    list(&referenced)
                );
                if let Some(rule) = on_update {
                    sql.push_str(&format!(" ON UPDATE {}", rule));
                }
                if let Some(rule) = on_delete {
                    sql.push_str(&format!(" ON DELETE {}", rule));
                }
                sql
            }
            ConstraintBody::Check { expression } => {
                format!("CONSTRAINT {} CHECK ({})", name, expression)
            }
            ConstraintBody::Default { column, value } => format!(
                "CONSTRAINT {} DEFAULT {} FOR {}",
                name,
                value,
                self.quote_identifier(column)
            ),
        }
    }

    /// `CREATE TABLE` from already rendered items.
    fn create_table(&self, table: &str, items: &[String]) -> String {
        format!(
            "CREATE TABLE {} (\n  {}\n);",
            self.quote_identifier(table),
            items.join(",\n  ")
        )
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {};", self.quote_identifier(table))
    }

    /// `ADD COLUMN` from a rendered column definition.
    fn add_column(&self, table: &str, definition: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.quote_identifier(table),
            definition
        )
    }

    /// `DROP COLUMN`.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// `ADD CONSTRAINT`.
    fn add_constraint(&self, table: &str, constraint: &Constraint) -> String {
        format!(
            "ALTER TABLE {} ADD {};",
            self.quote_identifier(table),
            self.constraint_definition(constraint)
        )
    }

    /// `DROP CONSTRAINT`.
    fn drop_constraint(&self, table: &str, constraint: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.quote_identifier(table),
            self.quote_identifier(constraint)
        )
    }

    /// Toggle nullability of an existing column. `column` is the new state.
    fn set_nullability(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL;",
            self.quote_identifier(table),
            self.quote_identifier(column.name()),
            if column.nullable { "DROP" } else { "SET" }
        )
    }

    /// Give an existing column a default.
    fn set_default(&self, table: &str, column: &str, default: &ColumnDefault<'_>) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
            self.quote_identifier(table),
            self.quote_identifier(column),
            default.value
        )
    }

    /// Remove the default of an existing column. `default` is the one being
    /// removed.
    fn drop_default(&self, table: &str, column: &str, _default: &ColumnDefault<'_>) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }
}

/// Portable SQL-92.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sql92;

impl DbBackend for Sql92 {
    fn name(&self) -> &'static str {
        "SQL-92"
    }
}

/// PostgreSQL. Unquoted identifiers fold to lower case, so any part with
/// upper case letters is quoted too.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

impl DbBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_parts(ident, '"', '"', |p| {
            !is_plain_identifier(p) || p.chars().any(|c| c.is_ascii_uppercase())
        })
    }
}

/// Microsoft SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlBackend;

impl MssqlBackend {
    fn default_constraint_name(table: &str, column: &str, default: &ColumnDefault<'_>) -> String {
        default
            .constraint
            .map(str::to_string)
            .unwrap_or_else(|| format!("DF_{}_{}", table.replace('.', "_"), column))
    }
}

impl DbBackend for MssqlBackend {
    fn name(&self) -> &'static str {
        "Microsoft SQL Server"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_parts(ident, '[', ']', |p| !is_plain_identifier(p))
    }

    fn batch_separator(&self) -> &'static str {
        "GO"
    }

    fn default_blocks_column_drop(&self) -> bool {
        true
    }

    fn column_definition(&self, table: &str, column: &Column, default: Option<&ColumnDefault<'_>>) -> String {
        let mut sql = format!("{} {}", self.quote_identifier(column.name()), column.sql_type);
        if let Some(default) = default {
            sql.push_str(&format!(
                " CONSTRAINT {} DEFAULT {}",
                self.quote_identifier(&Self::default_constraint_name(table, column.name(), default)),
                default.value
            ));
        }
        sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        sql
    }

    fn add_column(&self, table: &str, definition: &str) -> String {
        format!("ALTER TABLE {} ADD {};", self.quote_identifier(table), definition)
    }

    fn set_nullability(&self, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {};",
            self.quote_identifier(table),
            self.quote_identifier(column.name()),
            column.sql_type,
            if column.nullable { "NULL" } else { "NOT NULL" }
        )
    }

    fn set_default(&self, table: &str, column: &str, default: &ColumnDefault<'_>) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {};",
            self.quote_identifier(table),
            self.quote_identifier(&Self::default_constraint_name(table, column, default)),
            default.value,
            self.quote_identifier(column)
        )
    }

    fn drop_default(&self, table: &str, column: &str, default: &ColumnDefault<'_>) -> String {
        self.drop_constraint(table, &Self::default_constraint_name(table, column, default))
    }
}

/// Select the backend for a configured database system.
pub fn backend_for(system: DatabaseSystem) -> Box<dyn DbBackend> {
    match system {
        DatabaseSystem::Sql92 => Box::new(Sql92),
        DatabaseSystem::PostgreSql => Box::new(PostgresBackend),
        DatabaseSystem::Mssql => Box::new(MssqlBackend),
    }
}
