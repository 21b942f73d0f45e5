//! Integration tests for declarative reconciliation.
//!
//! These tests drive a schema root through authoring implementing
//! migrations and check the statuses and scripts that follow.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use schemachain::migrate::{
    DeclarativeStatus, DeclarativeStatusResolver, Goal, ImplementationRequest, MigrationAuthor,
    MigrationChain, MigrationError, MigrationRecord, ScriptPlanner, ScriptRequest, ScriptedVcs,
    Sql92, SupportRegistry, implementation_goal,
};
use schemachain::schema::{SchemaChainConfig, SchemaRoot};
use tempfile::TempDir;

const WIDGETS_V1: &str = "--- !table
columns:
- name: id
  type: bigint
  primary key: true
- name: label
  type: varchar(40)
";

const WIDGETS_V2: &str = "--- !table
columns:
- name: id
  type: bigint
  primary key: true
- name: label
  type: varchar(40)
- name: sku
  type: varchar(12)
constraints:
  UQ_widgets_sku:
    columns: [sku]
";

struct Project {
    _temp: TempDir,
    root: SchemaRoot,
    vcs: ScriptedVcs,
    registry: SupportRegistry,
}

impl Project {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let root = SchemaRoot::with_config(temp.path(), SchemaChainConfig::default());
        fs::create_dir_all(root.declarative_dir()).expect("declarative dir");
        Self {
            _temp: temp,
            root,
            vcs: ScriptedVcs::new("feature"),
            registry: SupportRegistry::with_defaults(),
        }
    }

    fn widgets(&self) -> PathBuf {
        self.root.declarative_dir().join("widgets.yaml")
    }

    fn author(&self, user: &str) -> MigrationAuthor<'_> {
        MigrationAuthor::new(&self.root, &self.vcs, &self.registry, &Sql92)
            .with_date(NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"))
            .with_user(user)
    }

    fn status(&self) -> DeclarativeStatus {
        let chain = MigrationChain::load(self.root.structure_dir()).unwrap();
        let resolver = DeclarativeStatusResolver::new(&chain, self.root.declarative_dir(), &self.vcs);
        resolver.status_of(&self.widgets()).unwrap().1
    }

    /// Commit every file of the structure directory.
    fn commit_all(&self) -> String {
        let mut files = Vec::new();
        for dir in [self.root.structure_dir(), self.root.declarative_dir()] {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        self.vcs.commit(&files)
    }

    /// Remove the qualification a reviewer removes after checking the SQL.
    fn confirm(&self, migration: &PathBuf) {
        let mut record = MigrationRecord::load(migration).unwrap();
        record.document.remove("implementation qualification");
        record.document.write(migration).unwrap();
    }
}

/// Test the unimplemented -> equal -> newer progression
#[test]
fn test_status_progression() {
    let project = Project::new();
    fs::write(project.widgets(), WIDGETS_V1).unwrap();
    assert_eq!(project.status(), DeclarativeStatus::Unimplemented);

    let authored = project
        .author("alice")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    project.confirm(&authored.path);
    project.commit_all();
    assert_eq!(project.status(), DeclarativeStatus::Equal);

    fs::write(project.widgets(), WIDGETS_V2).unwrap();
    assert_eq!(project.status(), DeclarativeStatus::Newer);
}

/// Test goal validation rejections
#[test]
fn test_goal_validation_rejects_flags() {
    let file = PathBuf::from("widgets.yaml");

    let err = implementation_goal(&file, DeclarativeStatus::Newer, ImplementationRequest::adopt()).unwrap_err();
    assert!(matches!(err, MigrationError::Argument(ref msg) if msg.contains("--adopt")));

    let err = implementation_goal(&file, DeclarativeStatus::Unimplemented, ImplementationRequest::renounce())
        .unwrap_err();
    assert!(matches!(err, MigrationError::Argument(ref msg) if msg.contains("--renounce")));

    assert_eq!(
        implementation_goal(&file, DeclarativeStatus::Missing, ImplementationRequest::renounce()).unwrap(),
        Goal::Renunciation
    );
}

/// Test that scripts are blocked until the implementation is confirmed
#[test]
fn test_script_requires_confirmed_implementation() {
    let project = Project::new();
    fs::write(project.widgets(), WIDGETS_V1).unwrap();
    let planner = ScriptPlanner::new(&project.root, &project.vcs);

    assert!(matches!(
        planner.plan(ScriptRequest::new()),
        Err(MigrationError::MissingImplementation(_))
    ));

    let authored = project
        .author("alice")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    assert!(matches!(
        planner.plan(ScriptRequest::new()),
        Err(MigrationError::QuestionableImplementation(_))
    ));

    project.confirm(&authored.path);
    let script = planner.plan(ScriptRequest::new()).unwrap();
    assert_eq!(script.migration_ids.len(), 1);
    assert!(script.sql.contains("CREATE TABLE widgets (\n  id bigint NOT NULL,\n  label varchar(40),\n  CONSTRAINT PK_widgets PRIMARY KEY (id)\n);"));
}

/// Test the full life cycle: create, revise, destroy
#[test]
fn test_declarative_life_cycle() {
    let project = Project::new();
    fs::write(project.widgets(), WIDGETS_V1).unwrap();

    let created = project
        .author("alice")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    project.confirm(&created.path);
    project.commit_all();

    fs::write(project.widgets(), WIDGETS_V2).unwrap();
    let revised = project
        .author("bob")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    let record = MigrationRecord::load(&revised.path).unwrap();
    assert_eq!(record.goal().unwrap(), Goal::Revision);
    assert_eq!(
        record.sql,
        "ALTER TABLE widgets ADD COLUMN sku varchar(12);\nALTER TABLE widgets ADD CONSTRAINT UQ_widgets_sku UNIQUE (sku);"
    );
    project.confirm(&revised.path);
    project.commit_all();
    assert_eq!(project.status(), DeclarativeStatus::Equal);

    fs::remove_file(project.widgets()).unwrap();
    assert_eq!(project.status(), DeclarativeStatus::Missing);
    let destroyed = project
        .author("carol")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    let record = MigrationRecord::load(&destroyed.path).unwrap();
    assert_eq!(record.goal().unwrap(), Goal::Destruction);
    assert_eq!(record.sql, "DROP TABLE widgets;");
    project.confirm(&destroyed.path);

    let chain = MigrationChain::load(project.root.structure_dir()).unwrap();
    assert_eq!(chain.len(), 3);
    let resolver = DeclarativeStatusResolver::new(&chain, project.root.declarative_dir(), &project.vcs);
    assert!(resolver.latest_implementations().unwrap().is_empty());
    assert!(resolver.check_declaratives_current().is_ok());
}

/// Test that a mistyped declarative path writes nothing
#[test]
fn test_unknown_declarative_path_rejected() {
    let project = Project::new();
    fs::write(project.widgets(), WIDGETS_V1).unwrap();
    let typo = project.root.declarative_dir().join("widgest.yaml");

    let err = project
        .author("alice")
        .add_migration_implementing_changes(&typo, ImplementationRequest::default())
        .unwrap_err();
    assert!(matches!(err, MigrationError::Argument(ref msg) if msg.contains("widgest.yaml")));
    assert!(!project.root.structure_dir().join("head.yaml").exists());
    assert!(MigrationChain::load(project.root.structure_dir()).unwrap().is_empty());
}

/// Test that an unconfirmed removal still blocks the script
#[test]
fn test_unconfirmed_destruction_blocks_script() {
    let project = Project::new();
    fs::write(project.widgets(), WIDGETS_V1).unwrap();
    let created = project
        .author("alice")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    project.confirm(&created.path);
    project.commit_all();

    fs::remove_file(project.widgets()).unwrap();
    let destroyed = project
        .author("carol")
        .add_migration_implementing_changes(&project.widgets(), ImplementationRequest::default())
        .unwrap();
    let planner = ScriptPlanner::new(&project.root, &project.vcs);
    assert!(matches!(
        planner.plan(ScriptRequest::new()),
        Err(MigrationError::QuestionableImplementation(_))
    ));

    project.confirm(&destroyed.path);
    let script = planner.plan(ScriptRequest::new()).unwrap();
    assert!(script.sql.contains("DROP TABLE widgets;"));
}
