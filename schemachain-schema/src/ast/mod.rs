//! In-memory model of declarative database objects.

mod constraint;
mod table;

pub use constraint::{Constraint, ConstraintBody, ConstraintKind};
pub use table::{Column, Table};
