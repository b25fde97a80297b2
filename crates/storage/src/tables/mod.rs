#![forbid(unsafe_code)]

//! Coding-assistant tables. Column layouts are fixed; rows come from the data directories.

pub mod history;
pub mod jhistory;
pub mod stats;
pub mod todos;
pub mod transcripts;

pub use todos::TodosTable;
pub use transcripts::TranscriptsTable;
