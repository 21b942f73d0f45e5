//! Table constraint definitions.

use indexmap::IndexMap;
use smol_str::SmolStr;

/// The kind of a table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `PRIMARY KEY (...)`.
    PrimaryKey,
    /// `UNIQUE (...)`.
    Unique,
    /// `FOREIGN KEY (...) REFERENCES ...`.
    ForeignKey,
    /// `CHECK (...)`.
    Check,
    /// Column default, applied inline when the table is created.
    Default,
}

impl ConstraintKind {
    /// All constraint kinds, in prefix-inference order.
    pub const ALL: [ConstraintKind; 5] = [
        ConstraintKind::PrimaryKey,
        ConstraintKind::Unique,
        ConstraintKind::ForeignKey,
        ConstraintKind::Check,
        ConstraintKind::Default,
    ];

    /// The `type` identifier used in declarative files.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary key",
            Self::Unique => "unique",
            Self::ForeignKey => "foreign key",
            Self::Check => "check",
            Self::Default => "default",
        }
    }

    /// Name prefix from which the kind can be inferred.
    pub fn implicit_prefix(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "PK_",
            Self::Unique => "UQ_",
            Self::ForeignKey => "FK_",
            Self::Check => "CK_",
            Self::Default => "DF_",
        }
    }

    /// Look up a kind by its `type` identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.identifier() == identifier)
    }

    /// Infer a kind from a constraint name prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| name.starts_with(k.implicit_prefix()))
    }

    /// Keys a constraint of this kind may carry in a declarative file.
    pub fn recognized_keys(&self) -> &'static [&'static str] {
        match self {
            Self::PrimaryKey | Self::Unique => &["type", "columns"],
            Self::ForeignKey => &["type", "columns", "link to", "on update", "on delete"],
            Self::Check => &["type", "verify"],
            Self::Default => &["type", "value", "column"],
        }
    }
}

/// Kind-specific payload of a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintBody {
    /// Primary key over the listed columns.
    PrimaryKey { columns: Vec<SmolStr> },
    /// Uniqueness over the listed columns.
    Unique { columns: Vec<SmolStr> },
    /// Foreign key: referencing column -> referenced column.
    ForeignKey {
        columns: IndexMap<SmolStr, SmolStr>,
        referent: String,
        on_update: Option<String>,
        on_delete: Option<String>,
    },
    /// Check expression.
    Check { expression: String },
    /// Default value for one column.
    Default { column: SmolStr, value: String },
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Constraint name.
    pub name: SmolStr,
    /// Kind-specific definition.
    pub body: ConstraintBody,
}

impl Constraint {
    /// Create a constraint.
    pub fn new(name: impl Into<SmolStr>, body: ConstraintBody) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Get the constraint name as a string.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The constraint kind.
    pub fn kind(&self) -> ConstraintKind {
        match &self.body {
            ConstraintBody::PrimaryKey { .. } => ConstraintKind::PrimaryKey,
            ConstraintBody::Unique { .. } => ConstraintKind::Unique,
            ConstraintBody::ForeignKey { .. } => ConstraintKind::ForeignKey,
            ConstraintBody::Check { .. } => ConstraintKind::Check,
            ConstraintBody::Default { .. } => ConstraintKind::Default,
        }
    }

    /// Columns of the owning table this constraint applies to.
    pub fn constrained_columns(&self) -> Vec<&str> {
        match &self.body {
            ConstraintBody::PrimaryKey { columns } | ConstraintBody::Unique { columns } => {
                columns.iter().map(|c| c.as_str()).collect()
            }
            ConstraintBody::ForeignKey { columns, .. } => {
                columns.keys().map(|c| c.as_str()).collect()
            }
            ConstraintBody::Check { .. } => Vec::new(),
            ConstraintBody::Default { column, .. } => vec![column.as_str()],
        }
    }

    /// Whether this constraint is only expressed inline when the table is
    /// created (column defaults).
    pub fn is_creation_inline(&self) -> bool {
        self.kind() == ConstraintKind::Default
    }
}
