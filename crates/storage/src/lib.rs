#![forbid(unsafe_code)]

//! Virtual tables over coding-assistant logs and git repositories.
//!
//! Every table is a [`TableSource`] producing rows lazily from files or `git` output;
//! a [`Catalog`] maps names (and aliases) to them.

mod catalog;
mod config;
mod error;
pub mod git;
pub mod source;
pub mod tables;
pub mod timefmt;

pub use catalog::{Catalog, ResolvedTable, TableInfo};
pub use config::{CODEX_HOME_ENV, Config, DATA_DIR_ENV};
pub use error::{CatalogError, SourceError};
pub use git::{GitRepo, GitTable};
pub use source::{RowIter, TableKind, TableSource};
