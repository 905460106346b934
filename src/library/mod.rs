//! Built-in vocabulary.
//!
//! - `elem`: operators and cell-wise functions.
//! - `ts`: rolling and shift functions over each security's history.
//! - `cs`: rankings across the securities of each date row.

mod args;
mod cs;
mod elem;
mod stats;
mod ts;

use crate::registry::OperatorTables;

/// Loads every built-in operator and function into `tables`.
pub(crate) fn register_builtins(tables: &mut OperatorTables) {
    elem::register(tables);
    ts::register(tables);
    cs::register(tables);
}
