//! Error types for declarative specification parsing and validation.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while reading declarative files and configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(schemachain::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The declarative document is not valid YAML.
    #[error("failed to parse YAML in {origin}")]
    #[diagnostic(code(schemachain::schema::yaml_error))]
    YamlError {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Malformed declarative specification (bad constraint reference,
    /// duplicate constraint name, multiple primary keys, ...).
    #[error("invalid specification of `{object}`: {message}")]
    #[diagnostic(code(schemachain::schema::specification))]
    Specification { object: String, message: String },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}` in `{object}`")]
    #[diagnostic(code(schemachain::schema::duplicate))]
    Duplicate {
        object: String,
        kind: String,
        name: String,
    },

    /// A constraint references a column the table does not declare.
    #[error("{kind} constraint `{constraint}` references unknown column(s): {columns}")]
    #[diagnostic(code(schemachain::schema::unknown_column))]
    UnknownColumn {
        kind: String,
        constraint: String,
        columns: String,
    },

    /// More than one primary key was declared.
    #[error("multiple primary keys specified for `{object}`")]
    #[diagnostic(code(schemachain::schema::multiple_primary_keys))]
    MultiplePrimaryKeys { object: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(schemachain::schema::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(schemachain::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },

    /// Validation error with multiple issues.
    #[error("specification of `{object}` failed with {count} error(s)")]
    #[diagnostic(code(schemachain::schema::validation_failed))]
    ValidationFailed {
        object: String,
        count: usize,
        #[related]
        errors: Vec<SchemaError>,
    },
}

impl SchemaError {
    /// Create a specification error.
    pub fn specification(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Specification {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(
        object: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Duplicate {
            object: object.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a YAML error, tagging it with where the document came from.
    pub fn yaml(origin: impl Into<String>, source: serde_yaml::Error) -> Self {
        Self::YamlError {
            origin: origin.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether this error describes a malformed declarative specification
    /// rather than an I/O or parse failure.
    pub fn is_specification(&self) -> bool {
        matches!(
            self,
            Self::Specification { .. }
                | Self::Duplicate { .. }
                | Self::UnknownColumn { .. }
                | Self::MultiplePrimaryKeys { .. }
                | Self::ValidationFailed { .. }
        )
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_specification_error_display() {
        let err = SchemaError::specification("foo", "No columns specified");
        assert_eq!(
            err.to_string(),
            "invalid specification of `foo`: No columns specified"
        );
        assert!(err.is_specification());
    }

    #[test]
    fn test_duplicate_error() {
        let err = SchemaError::duplicate("foo", "column", "id");
        match &err {
            SchemaError::Duplicate { object, kind, name } => {
                assert_eq!(object, "foo");
                assert_eq!(kind, "column");
                assert_eq!(name, "id");
            }
            _ => panic!("Expected Duplicate error"),
        }
        assert!(err.to_string().contains("duplicate column `id`"));
    }

    #[test]
    fn test_unknown_column_display() {
        let err = SchemaError::UnknownColumn {
            kind: "unique".to_string(),
            constraint: "UQ_foo_name".to_string(),
            columns: "name".to_string(),
        };
        assert!(err.to_string().contains("UQ_foo_name"));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_config_error_is_not_specification() {
        assert!(!SchemaError::config("bad system").is_specification());
    }

    #[test]
    fn test_validation_failed_counts() {
        let err = SchemaError::ValidationFailed {
            object: "foo".to_string(),
            count: 2,
            errors: vec![
                SchemaError::specification("foo", "a"),
                SchemaError::specification("foo", "b"),
            ],
        };
        assert!(err.to_string().contains("2 error(s)"));
        assert!(err.is_specification());
    }
}
