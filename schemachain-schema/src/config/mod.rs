//! Configuration file parsing for `schemachain.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{SchemaError, SchemaResult};

/// Name of the configuration file at the schema root.
pub const CONFIG_FILE: &str = "schemachain.toml";

/// Main configuration structure for `schemachain.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaChainConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Layout of the structure directory.
    #[serde(default)]
    pub structure: StructureConfig,

    /// Version control settings.
    #[serde(default)]
    pub vcs: VcsConfig,

    /// Environment-specific overrides.
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverride>,
}

impl SchemaChainConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> SchemaResult<Self> {
        let expanded = expand_env_vars(content)?;

        toml::from_str(&expanded).map_err(|e| SchemaError::TomlError { source: e })
    }

    /// Apply environment-specific overrides.
    pub fn with_environment(mut self, env: &str) -> Self {
        if let Some(overrides) = self.environments.remove(env) {
            if let Some(db) = overrides.database {
                if let Some(system) = db.system {
                    self.database.system = system;
                }
                if let Some(comment) = db.script_comment {
                    self.database.script_comment = Some(comment);
                }
            }
            if let Some(vcs) = overrides.vcs {
                if let Some(production_mode) = vcs.production_mode {
                    self.vcs.production_mode = production_mode;
                }
                if let Some(lineage) = vcs.production_lineage {
                    self.vcs.production_lineage = lineage;
                }
            }
        }
        self
    }
}

/// Database configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Target database system; selects the SQL backend.
    #[serde(default)]
    pub system: DatabaseSystem,

    /// Comment placed at the top of every generated script.
    pub script_comment: Option<String>,
}

/// Supported database systems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseSystem {
    /// Portable SQL-92.
    #[default]
    #[serde(alias = "sql-92")]
    Sql92,
    /// PostgreSQL.
    #[serde(alias = "postgres")]
    PostgreSql,
    /// Microsoft SQL Server.
    #[serde(alias = "sqlserver")]
    Mssql,
}

impl DatabaseSystem {
    /// Get the system name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql92 => "sql92",
            Self::PostgreSql => "postgresql",
            Self::Mssql => "mssql",
        }
    }
}

/// Structure directory layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StructureConfig {
    /// Directory holding the head file and migrations, relative to the root.
    #[serde(default = "default_structure_dir")]
    pub directory: String,

    /// Subdirectory of the structure directory holding declarative files.
    #[serde(default = "default_declarative_subdir")]
    pub declarative_subdir: String,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            directory: default_structure_dir(),
            declarative_subdir: default_declarative_subdir(),
        }
    }
}

fn default_structure_dir() -> String {
    "structure".to_string()
}

fn default_declarative_subdir() -> String {
    "declarative".to_string()
}

/// Version control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VcsConfig {
    /// Generate production scripts (enforces eligibility checks).
    #[serde(default)]
    pub production_mode: bool,

    /// Ref whose history is the production lineage.
    #[serde(default = "default_production_lineage")]
    pub production_lineage: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            production_mode: false,
            production_lineage: default_production_lineage(),
        }
    }
}

fn default_production_lineage() -> String {
    "master".to_string()
}

/// Environment-specific configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentOverride {
    /// Database overrides.
    pub database: Option<DatabaseOverride>,

    /// Version control overrides.
    pub vcs: Option<VcsOverride>,
}

/// Database configuration overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseOverride {
    /// Override the target system.
    pub system: Option<DatabaseSystem>,

    /// Override the script comment.
    pub script_comment: Option<String>,
}

/// Version control overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VcsOverride {
    /// Override production_mode.
    pub production_mode: Option<bool>,

    /// Override production_lineage.
    pub production_lineage: Option<String>,
}

/// A schema root directory together with its configuration.
#[derive(Debug, Clone)]
pub struct SchemaRoot {
    root: PathBuf,
    config: SchemaChainConfig,
}

impl SchemaRoot {
    /// Open a schema root, reading `schemachain.toml` if present.
    pub fn open(root: impl Into<PathBuf>) -> SchemaResult<Self> {
        let root = root.into();
        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.is_file() {
            SchemaChainConfig::from_file(&config_path)?
        } else {
            SchemaChainConfig::default()
        };
        Ok(Self { root, config })
    }

    /// Create a schema root with an explicit configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: SchemaChainConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded configuration.
    pub fn config(&self) -> &SchemaChainConfig {
        &self.config
    }

    /// Directory holding the head file and migrations.
    pub fn structure_dir(&self) -> PathBuf {
        self.root.join(&self.config.structure.directory)
    }

    /// Directory holding declarative files.
    pub fn declarative_dir(&self) -> PathBuf {
        self.structure_dir()
            .join(&self.config.structure.declarative_subdir)
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
fn expand_env_vars(content: &str) -> SchemaResult<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| SchemaError::config(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let full_match = &cap[0];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    Ok(result)
}
