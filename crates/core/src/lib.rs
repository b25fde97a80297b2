#![forbid(unsafe_code)]

mod record;
mod schema;
mod value;

pub use record::Record;
pub use schema::{Column, Field, Schema};
pub use value::{ColumnType, Value};

/// Provenance column names injected by readers. They never exist in the source files.
pub mod provenance {
    pub const SOURCE_FILE: &str = "_source_file";
    pub const LINE: &str = "_line";
    pub const SESSION_ID: &str = "_session_id";
    pub const WORKSPACE_ID: &str = "_workspace_id";
    pub const AGENT_ID: &str = "_agent_id";
    pub const INDEX: &str = "_index";
    pub const REPO: &str = "_repo";

    pub fn is_provenance_name(name: &str) -> bool {
        name.starts_with('_')
    }
}
