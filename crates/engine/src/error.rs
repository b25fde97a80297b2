#![forbid(unsafe_code)]

use ds_storage::{CatalogError, SourceError};
use std::path::PathBuf;
use thiserror::Error;

/// Why a mutating statement was refused before anything was touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// INSERT/UPDATE/DELETE without `--dry-run` or `--write`.
    FlagRequired,
    /// The target table cannot be rewritten (repository or multi-file tables).
    ReadOnlyTable { table: String, kind: &'static str },
    /// UPDATE/DELETE without a WHERE clause.
    MissingWhere { statement: &'static str },
    /// The statement would set a derived or provenance column.
    ReadOnlyColumn { table: String, column: String },
    /// Anything that is neither a query nor INSERT/UPDATE/DELETE.
    UnsupportedStatement(String),
    /// More than one statement in the input.
    MultipleStatements,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FlagRequired => write!(
                f,
                "mutating statement requires --dry-run (preview) or --write (apply)"
            ),
            Self::ReadOnlyTable { table, kind } => {
                write!(f, "table `{table}` is read-only ({kind}); mutation is not supported")
            }
            Self::MissingWhere { statement } => write!(
                f,
                "{statement} without WHERE would affect every row; add a WHERE clause (WHERE 1=1 to mean all rows)"
            ),
            Self::ReadOnlyColumn { table, column } => {
                write!(f, "column `{table}.{column}` is derived from the source and cannot be written")
            }
            Self::UnsupportedStatement(kind) => write!(
                f,
                "unsupported statement `{kind}`: only SELECT, INSERT, UPDATE and DELETE are accepted"
            ),
            Self::MultipleStatements => write!(f, "exactly one SQL statement is accepted per invocation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("syntax error: {0}")]
    Parse(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("no such column: {0}")]
    ColumnNotFound(String),
    #[error("type mismatch: {0}")]
    Type(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("mutation rejected: {0}")]
    MutationRejected(Rejection),
    #[error("backup of {} failed: {message}", path.display())]
    Backup { path: PathBuf, message: String },
    #[error("write to {} failed: {message}", path.display())]
    Write { path: PathBuf, message: String },
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("output failed: {0}")]
    Output(#[source] std::io::Error),
}

impl EngineError {
    /// Process exit status for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Execution(_) | Self::Output(_) => 1,
            Self::Parse(_) => 2,
            Self::Catalog(_) | Self::ColumnNotFound(_) => 3,
            Self::MutationRejected(_) => 4,
            Self::Backup { .. } => 5,
            Self::Source(_) => 6,
            Self::Type(_) => 7,
            Self::Write { .. } => 8,
        }
    }

    pub(crate) fn rejected(rejection: Rejection) -> Self {
        Self::MutationRejected(rejection)
    }
}

/// Maps an SQLite error onto the error taxonomy; SQLite's message carries the offending fragment.
impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        let message = match &err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
            rusqlite::Error::MultipleStatement => {
                return Self::rejected(Rejection::MultipleStatements);
            }
            other => other.to_string(),
        };
        classify_sqlite_message(message)
    }
}

fn classify_sqlite_message(message: String) -> EngineError {
    // Prepare errors may carry a trailing "in <sql> at offset <n>".
    let subject = |rest: &str| rest.split_whitespace().next().unwrap_or_default().to_string();
    if let Some(rest) = message.strip_prefix("no such column: ") {
        return EngineError::ColumnNotFound(subject(rest));
    }
    if let Some(rest) = message.strip_prefix("no such table: ") {
        return EngineError::Catalog(CatalogError::TableNotFound {
            name: subject(rest),
            suggestions: Vec::new(),
        });
    }
    if message.contains("syntax error")
        || message.starts_with("near ")
        || message.contains("incomplete input")
        || message.contains("unrecognized token")
    {
        return EngineError::Parse(message);
    }
    if message.contains("datatype mismatch") || message.contains("type mismatch") {
        return EngineError::Type(message);
    }
    EngineError::Execution(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_messages_map_to_classes() {
        assert!(matches!(
            classify_sqlite_message("no such column: bogus".to_string()),
            EngineError::ColumnNotFound(column) if column == "bogus"
        ));
        assert!(matches!(
            classify_sqlite_message(
                "no such column: h.bogus in SELECT h.bogus FROM history h at offset 7".to_string()
            ),
            EngineError::ColumnNotFound(column) if column == "h.bogus"
        ));
        assert!(matches!(
            classify_sqlite_message("near \"SELEC\": syntax error".to_string()),
            EngineError::Parse(_)
        ));
        assert!(matches!(
            classify_sqlite_message("datatype mismatch".to_string()),
            EngineError::Type(_)
        ));
        assert!(matches!(
            classify_sqlite_message("out of memory".to_string()),
            EngineError::Execution(_)
        ));
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let codes = [
            EngineError::Parse(String::new()).exit_code(),
            EngineError::ColumnNotFound(String::new()).exit_code(),
            EngineError::rejected(Rejection::FlagRequired).exit_code(),
            EngineError::Backup {
                path: PathBuf::new(),
                message: String::new(),
            }
            .exit_code(),
            EngineError::Source(SourceError::Decode {
                path: PathBuf::new(),
                message: String::new(),
            })
            .exit_code(),
            EngineError::Type(String::new()).exit_code(),
            EngineError::Write {
                path: PathBuf::new(),
                message: String::new(),
            }
            .exit_code(),
        ];
        assert_eq!(codes, [2, 3, 4, 5, 6, 7, 8]);
    }
}
