//! Selecting statements and expressions by pattern.

mod cursor;
mod pattern;

pub use cursor::{Cursor, ExprPath, SelectError, find_all, resolve, resolve_expr, resolve_stmt};
pub use pattern::{ExprPattern, Pattern, Selector};
