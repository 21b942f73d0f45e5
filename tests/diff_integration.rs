//! Integration tests for table diffing across backends.

use pretty_assertions::assert_eq;
use schemachain::migrate::{MigrationError, MssqlBackend, PostgresBackend, Sql92, TableDiffer};
use schemachain::schema::{Table, parse_table};

fn table(yaml: &str) -> Table {
    parse_table("orders", yaml).expect("valid table")
}

const ORDERS: &str = "--- !table
columns:
- name: id
  type: bigint
  primary key: true
- name: customer
  type: bigint
- name: note
  type: varchar(200)
  nullable: true
constraints:
  FK_orders_customer:
    link to: customers
    columns:
      customer: id
  CK_orders_id:
    verify: id > 0
";

/// Test that diffing a table against itself yields nothing on every backend
#[test]
fn test_self_diff_is_empty() {
    let orders = table(ORDERS);
    for differ in [
        TableDiffer::new(&Sql92),
        TableDiffer::new(&PostgresBackend),
        TableDiffer::new(&MssqlBackend),
    ] {
        assert!(differ.delta(&orders, &orders).unwrap().is_empty());
    }
}

/// Test that a whitespace-only change in a check expression is a change
#[test]
fn test_whitespace_change_detected() {
    let old = table(ORDERS);
    let new = table(&ORDERS.replace("verify: id > 0", "verify: id >  0"));

    let statements = TableDiffer::new(&Sql92).delta(&old, &new).unwrap();
    assert_eq!(
        statements,
        vec![
            "ALTER TABLE orders DROP CONSTRAINT CK_orders_id;".to_string(),
            "ALTER TABLE orders ADD CONSTRAINT CK_orders_id CHECK (id >  0);".to_string(),
        ]
    );
}

/// Test phase ordering with a new column and a constraint referring to it
#[test]
fn test_new_column_before_its_constraint() {
    let old = table(ORDERS);
    let new = table(&format!(
        "{}  UQ_orders_reference:\n    columns: [reference]\n",
        ORDERS.replace(
            "constraints:",
            "- name: reference\n  type: varchar(20)\n  nullable: true\nconstraints:"
        )
    ));

    let statements = TableDiffer::new(&Sql92).delta(&old, &new).unwrap();
    assert_eq!(
        statements,
        vec![
            "ALTER TABLE orders ADD COLUMN reference varchar(20);".to_string(),
            "ALTER TABLE orders ADD CONSTRAINT UQ_orders_reference UNIQUE (reference);".to_string(),
        ]
    );
}

/// Test that a dropped column follows the drop of a constraint using it
#[test]
fn test_constraint_dropped_before_column() {
    let old = table(ORDERS);
    let new = table(
        "--- !table
columns:
- name: id
  type: bigint
  primary key: true
- name: note
  type: varchar(200)
  nullable: true
constraints:
  CK_orders_id:
    verify: id > 0
",
    );

    let statements = TableDiffer::new(&Sql92).delta(&old, &new).unwrap();
    assert_eq!(
        statements,
        vec![
            "ALTER TABLE orders DROP CONSTRAINT FK_orders_customer;".to_string(),
            "ALTER TABLE orders DROP COLUMN customer;".to_string(),
        ]
    );
}

/// Test that changing a column's type is refused
#[test]
fn test_type_change_unsupported() {
    let old = table(ORDERS);
    let new = table(&ORDERS.replace("varchar(200)", "varchar(400)"));

    match TableDiffer::new(&Sql92).delta(&old, &new) {
        Err(MigrationError::UnsupportedAlter { table, column, .. }) => {
            assert_eq!(table, "orders");
            assert_eq!(column, "note");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
