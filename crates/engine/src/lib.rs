#![forbid(unsafe_code)]

//! SQL over the virtual tables of a [`ds_storage::Catalog`].
//!
//! Statements are analyzed, the referenced tables are materialized into an in-memory
//! SQLite database, and the result is streamed into a [`RowSink`]. INSERT/UPDATE/DELETE
//! go through the mutation guard in [`guard`].

mod encode;
mod engine;
mod error;
mod functions;
pub mod guard;
mod loader;
mod result;
pub mod statement;
mod typecheck;
mod unify;

pub use encode::{Encoder, OutputFormat};
pub use engine::QueryEngine;
pub use error::{EngineError, Rejection};
pub use guard::WriteMode;
pub use result::{MutationSummary, QueryResult, ResultColumn, RowSink, RunSummary};
pub use unify::{select_repos, unified_catalog};

use ds_storage::Catalog;

/// Runs one statement against `catalog`, streaming into `sink`.
pub fn run(
    catalog: &Catalog,
    sql: &str,
    mode: WriteMode,
    sink: &mut dyn RowSink,
) -> Result<RunSummary, EngineError> {
    QueryEngine::new(catalog).execute(sql, mode, sink)
}
