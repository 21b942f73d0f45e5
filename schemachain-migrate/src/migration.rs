//! Migration records and the YAML documents they are stored in.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::declarative;
use crate::error::{MigrateResult, MigrationError};

/// Name of the head pointer file in the structure directory.
pub const HEAD_FILE: &str = "head.yaml";
/// Head pointer key naming the newest migration.
pub const LATEST_CHANGE: &str = "latest change";
/// Predecessor value of the first migration.
pub const EMPTY_DB: &str = "empty database";
/// Migration key naming the predecessor file.
pub const FOLLOWS: &str = "starting from";
/// Migration key holding the SQL payload.
pub const SQL: &str = "sql";
/// Migration key holding the description.
pub const DESCRIPTION: &str = "description";
/// Migration key holding the change tags.
pub const CHANGES: &str = "changes";

const YAML_EXT: &str = ".yaml";

/// Append `.yaml` to a name unless it already ends that way.
pub fn yaml_path(name: &str) -> String {
    if name.ends_with(YAML_EXT) {
        name.to_string()
    } else {
        format!("{}{}", name, YAML_EXT)
    }
}

/// Dated migration filename: `YYYY-MM-DD<anything>.yaml`, any case.
static MIGRATION_FILENAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)^\d{4}-\d{2}-\d{2}.*\.yaml$").ok());

/// Whether `name` has the dated migration filename shape
/// `YYYY-MM-DD<anything>.yaml` (case-insensitive).
pub fn is_migration_filename(name: &str) -> bool {
    MIGRATION_FILENAME
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Hex SHA-256 digest of some bytes.
pub fn content_digest(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Identity of a migration, derived from its filename only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationId(String);

impl MigrationId {
    /// Compute the id of a migration filename. The name is canonicalized to
    /// end in `.yaml` and uppercased before digesting.
    pub fn from_filename(file_name: &str) -> Self {
        Self(content_digest(yaml_path(file_name).to_uppercase()))
    }

    /// The id as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a text field is laid out when its document is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FormattingHint {
    /// Whatever the YAML emitter picks.
    #[default]
    Plain,
    /// Literal block scalar (`|`).
    Literal,
    /// Folded block scalar (`>`).
    Folded,
}

/// An order-preserving YAML mapping with per-field formatting hints.
///
/// Used for head pointer, migration and branch-upgrade files. Unknown keys
/// are kept so a rewritten file loses nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationDocument {
    data: Mapping,
    hints: BTreeMap<String, FormattingHint>,
}

impl MigrationDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document, recording block-scalar hints of top-level fields.
    pub fn parse(origin: &str, text: &str) -> MigrateResult<Self> {
        let data = match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                return Err(MigrationError::migration_file(format!(
                    "{} does not contain a mapping",
                    origin
                )));
            }
        };
        Ok(Self {
            data,
            hints: detect_hints(text),
        })
    }

    /// Read and parse a document file.
    pub fn read(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Write the document to a file.
    pub fn write(&self, path: impl AsRef<Path>) -> MigrateResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml()?)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Insert or replace a value, keeping the key's position if present.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(Value::from(key), value.into());
    }

    /// Insert text with a formatting hint.
    pub fn set_text(&mut self, key: &str, text: impl Into<String>, hint: FormattingHint) {
        self.insert(key, Value::String(text.into()));
        self.set_hint(key, hint);
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.hints.remove(key);
        self.data.remove(key)
    }

    /// Top-level string keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().filter_map(Value::as_str)
    }

    /// The underlying mapping.
    pub fn data(&self) -> &Mapping {
        &self.data
    }

    /// Formatting hint of a field.
    pub fn hint(&self, key: &str) -> FormattingHint {
        self.hints.get(key).copied().unwrap_or_default()
    }

    /// Set the formatting hint of a field.
    pub fn set_hint(&mut self, key: &str, hint: FormattingHint) {
        if hint == FormattingHint::Plain {
            self.hints.remove(key);
        } else {
            self.hints.insert(key.to_string(), hint);
        }
    }

    /// Overlay another document: its values and hints win.
    pub fn merge(&mut self, other: &MigrationDocument) {
        for (key, value) in &other.data {
            self.data.insert(key.clone(), value.clone());
        }
        for (key, hint) in &other.hints {
            self.hints.insert(key.clone(), *hint);
        }
    }

    /// Serialize the document, honoring formatting hints.
    pub fn to_yaml(&self) -> MigrateResult<String> {
        let mut out = String::from("---\n");
        for (key, value) in &self.data {
            if let (Some(name), Value::String(text)) = (key.as_str(), value) {
                if let Some(block) = block_scalar(name, text, self.hint(name)) {
                    out.push_str(&block);
                    continue;
                }
            }
            let mut single = Mapping::new();
            single.insert(key.clone(), value.clone());
            out.push_str(&serde_yaml::to_string(&single)?);
        }
        Ok(out)
    }
}

fn detect_hints(text: &str) -> BTreeMap<String, FormattingHint> {
    let mut hints = BTreeMap::new();
    for line in text.lines() {
        if line.starts_with(char::is_whitespace) || line.starts_with('#') || line.starts_with('-')
        {
            continue;
        }
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let hint = match rest.trim_start().chars().next() {
            Some('|') => FormattingHint::Literal,
            Some('>') => FormattingHint::Folded,
            _ => continue,
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
        hints.insert(key.to_string(), hint);
    }
    hints
}

/// Render `key: <block scalar>` when the hint and text allow it.
fn block_scalar(key: &str, text: &str, hint: FormattingHint) -> Option<String> {
    let plain_key = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'));
    if hint == FormattingHint::Plain
        || !plain_key
        || text.is_empty()
        || text.starts_with(char::is_whitespace)
        || text.contains('\r')
    {
        return None;
    }

    let body = text.trim_end_matches('\n');
    let trailing = text.len() - body.len();
    let chomp = match trailing {
        0 => "-",
        1 => "",
        _ => "+",
    };
    let lines: Vec<&str> = body.split('\n').collect();
    let foldable = lines
        .iter()
        .all(|l| !l.is_empty() && !l.starts_with(char::is_whitespace));

    let mut out = String::new();
    if hint == FormattingHint::Folded && foldable {
        out.push_str(&format!("{}: >{}\n", key, chomp));
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    } else {
        out.push_str(&format!("{}: |{}\n", key, chomp));
        for line in &lines {
            if !line.is_empty() {
                out.push_str("  ");
                out.push_str(line);
            }
            out.push('\n');
        }
    }
    if trailing > 1 {
        out.push_str(&"\n".repeat(trailing - 1));
    }
    Some(out)
}

/// One migration file of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    /// Id derived from the filename.
    pub id: MigrationId,
    /// Filename, including `.yaml`.
    pub file_name: String,
    /// Full path of the file.
    pub file_path: PathBuf,
    /// Predecessor filename; `None` when starting from the empty database.
    pub follows: Option<String>,
    /// SQL payload.
    pub sql: String,
    /// Free-text description.
    pub description: String,
    /// Change tags.
    pub changes: Vec<String>,
    /// The full document, including keys not modeled above.
    pub document: MigrationDocument,
}

impl MigrationRecord {
    /// Load a migration file.
    pub fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let document = MigrationDocument::read(path)?;
        Self::from_document(path, document)
    }

    /// Build a record from an already parsed document.
    pub fn from_document(path: impl AsRef<Path>, document: MigrationDocument) -> MigrateResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                MigrationError::migration_file(format!("{} has no file name", path.display()))
            })?;

        let follows = match document.get(FOLLOWS) {
            Some(Value::String(s)) if s == EMPTY_DB => None,
            Some(Value::String(s)) => Some(yaml_path(s)),
            _ => {
                return Err(MigrationError::migration_file(format!(
                    "{} does not say what it is {}",
                    file_name, FOLLOWS
                )));
            }
        };

        let declared = document.get_str(declarative::DECLARATIVE_OBJECT);
        let changes = match document.get(CHANGES) {
            _ if declared.is_some() => {
                let management = document
                    .get_str(declarative::GOAL)
                    .and_then(|g| g.parse::<declarative::Goal>().ok())
                    .is_some_and(|g| g.is_management());
                match declared {
                    Some(object) if !management => vec![object.to_string()],
                    _ => Vec::new(),
                }
            }
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(_) => {
                return Err(MigrationError::migration_file(format!(
                    "{} lists {} as something other than a sequence",
                    file_name, CHANGES
                )));
            }
        };

        Ok(Self {
            id: MigrationId::from_filename(&file_name),
            follows,
            sql: document.get_str(SQL).unwrap_or_default().to_string(),
            description: document.get_str(DESCRIPTION).unwrap_or_default().to_string(),
            changes,
            file_path: path.to_path_buf(),
            file_name,
            document,
        })
    }

    /// Id of the predecessor, if any.
    pub fn follows_id(&self) -> Option<MigrationId> {
        self.follows.as_deref().map(MigrationId::from_filename)
    }

    /// Whether this migration starts from the empty database.
    pub fn starts_from_empty(&self) -> bool {
        self.follows.is_none()
    }

    /// Filename without the `.yaml` extension.
    pub fn basename(&self) -> &str {
        self.file_name
            .strip_suffix(YAML_EXT)
            .unwrap_or(&self.file_name)
    }

    /// Point this migration at a new predecessor, updating the document.
    pub fn set_follows(&mut self, predecessor: Option<&str>) {
        self.follows = predecessor.map(yaml_path);
        let value = match predecessor {
            Some(name) => yaml_path(name),
            None => EMPTY_DB.to_string(),
        };
        self.document.insert(FOLLOWS, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_yaml_path() {
        assert_eq!(yaml_path("2024-01-01 a"), "2024-01-01 a.yaml");
        assert_eq!(yaml_path("2024-01-01 a.yaml"), "2024-01-01 a.yaml");
    }

    #[test]
    fn test_migration_filename_pattern() {
        assert!(is_migration_filename("2024-01-01 create foo.yaml"));
        assert!(is_migration_filename("2024-01-01.YAML"));
        assert!(is_migration_filename("2024-01-01 foo-1a2b.decl.yaml"));
        assert!(!is_migration_filename("head.yaml"));
        assert!(!is_migration_filename("2024-1-01 foo.yaml"));
        assert!(!is_migration_filename("2024-01-01 foo.yml"));
        assert!(!is_migration_filename("branch-upgrade.yaml"));
        assert!(!is_migration_filename("x2024-01-01 foo.yaml"));
        assert!(!is_migration_filename("2024-01-01 foo.yaml.bak"));
        assert!(!is_migration_filename("2024-01-0a foo.yaml"));
    }

    #[test]
    fn test_id_depends_on_filename_only() {
        let a = MigrationId::from_filename("2024-01-01 a.yaml");
        assert_eq!(a, MigrationId::from_filename("2024-01-01 A"));
        assert_ne!(a, MigrationId::from_filename("2024-01-02 a.yaml"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_record_from_document() {
        let doc = MigrationDocument::parse(
            "b",
            "starting from: 2024-01-01 a\nsql: SELECT 1;\ndescription: b\nchanges: [foo]\n",
        )
        .unwrap();
        let record = MigrationRecord::from_document("/s/2024-01-02 b.yaml", doc).unwrap();
        assert_eq!(record.follows.as_deref(), Some("2024-01-01 a.yaml"));
        assert_eq!(
            record.follows_id(),
            Some(MigrationId::from_filename("2024-01-01 a.yaml"))
        );
        assert_eq!(record.changes, vec!["foo".to_string()]);
        assert_eq!(record.basename(), "2024-01-02 b");
    }

    #[test]
    fn test_declarative_changes_derived_from_goal() {
        let doc = MigrationDocument::parse(
            "d",
            "starting from: empty database\ndoes: creation\nof object: foo\nchanges: [bar]\n",
        )
        .unwrap();
        let record = MigrationRecord::from_document("2024-01-01 foo-1.decl.yaml", doc).unwrap();
        assert_eq!(record.changes, vec!["foo".to_string()]);

        let doc = MigrationDocument::parse(
            "d",
            "starting from: empty database\ndoes: adoption\nof object: foo\n",
        )
        .unwrap();
        let record = MigrationRecord::from_document("2024-01-01 foo-2.decl.yaml", doc).unwrap();
        assert!(record.changes.is_empty());
    }

    #[test]
    fn test_empty_database_predecessor() {
        let doc = MigrationDocument::parse("a", "starting from: empty database\n").unwrap();
        let record = MigrationRecord::from_document("2024-01-01 a.yaml", doc).unwrap();
        assert!(record.starts_from_empty());
        assert!(record.sql.is_empty());
    }

    #[test]
    fn test_missing_predecessor_rejected() {
        let doc = MigrationDocument::parse("a", "sql: SELECT 1;\n").unwrap();
        let err = MigrationRecord::from_document("2024-01-01 a.yaml", doc).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }

    #[test]
    fn test_hints_detected_and_preserved() {
        let text = "---\nstarting from: empty database\nsql: |\n  CREATE TABLE foo (\n    id int\n  );\ndescription: >\n  Adds the\n  foo table.\nchanges:\n- foo\n";
        let doc = MigrationDocument::parse("a", text).unwrap();
        assert_eq!(doc.hint(SQL), FormattingHint::Literal);
        assert_eq!(doc.hint(DESCRIPTION), FormattingHint::Folded);
        assert_eq!(doc.hint(FOLLOWS), FormattingHint::Plain);

        let written = doc.to_yaml().unwrap();
        assert!(written.contains("sql: |\n  CREATE TABLE foo (\n    id int\n  );\n"));
        assert!(written.contains("description: >\n"));

        let reread = MigrationDocument::parse("a", &written).unwrap();
        assert_eq!(reread.data(), doc.data());
        assert_eq!(reread.hint(SQL), FormattingHint::Literal);
    }

    #[test]
    fn test_block_scalar_chomping_round_trips() {
        for text in ["one line", "two\nlines\n", "kept\n\n\n", "gap\n\nline"] {
            let mut doc = MigrationDocument::new();
            doc.set_text(SQL, text, FormattingHint::Literal);
            doc.set_text(DESCRIPTION, text, FormattingHint::Folded);
            let reread = MigrationDocument::parse("t", &doc.to_yaml().unwrap()).unwrap();
            assert_eq!(reread.get_str(SQL), Some(text));
            assert_eq!(reread.get_str(DESCRIPTION), Some(text));
        }
    }

    #[test]
    fn test_merge_other_wins() {
        let mut ours = MigrationDocument::parse("ours", "latest change: c\nowner: x\n").unwrap();
        let theirs = MigrationDocument::parse("theirs", "latest change: d\n").unwrap();
        ours.merge(&theirs);
        assert_eq!(ours.get_str(LATEST_CHANGE), Some("d"));
        assert_eq!(ours.get_str("owner"), Some("x"));
    }

    #[test]
    fn test_set_follows_updates_document() {
        let doc = MigrationDocument::parse("d", "starting from: 2024-01-02 b\n").unwrap();
        let mut record = MigrationRecord::from_document("2024-01-03 d.yaml", doc).unwrap();
        record.set_follows(Some("2024-01-03 c"));
        assert_eq!(record.document.get_str(FOLLOWS), Some("2024-01-03 c.yaml"));
        record.set_follows(None);
        assert_eq!(record.document.get_str(FOLLOWS), Some(EMPTY_DB));
    }
}
