#![forbid(unsafe_code)]

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// One record of a multi-record source could not be decoded. Scans skip it and keep going.
    #[error("{}{}: malformed record: {message}", path.display(), line_suffix(*line))]
    Malformed {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },
    /// A single-document source could not be decoded at all.
    #[error("failed to parse {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    #[error("not a git repository: {}", .0.display())]
    RepoNotFound(PathBuf),
    #[error("git executable is not available: {0}")]
    GitUnavailable(#[source] std::io::Error),
    #[error("`git {command}` failed in {}: {stderr}", repo.display())]
    Git {
        repo: PathBuf,
        command: String,
        stderr: String,
    },
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

fn line_suffix(line: Option<usize>) -> String {
    line.map(|line| format!(":{line}")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no such table: {name}{}", suggestion_hint(suggestions))]
    TableNotFound {
        name: String,
        suggestions: Vec<String>,
    },
    #[error("table name collision: `{0}` is defined by both catalogs")]
    NameCollision(String),
    #[error("cannot alias `{alias}`: {reason}")]
    InvalidAlias { alias: String, reason: String },
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_errors_carry_file_and_line() {
        let err = SourceError::Malformed {
            path: PathBuf::from("/data/history.jsonl"),
            line: Some(7),
            message: "expected value".to_string(),
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "/data/history.jsonl:7: malformed record: expected value"
        );
    }

    #[test]
    fn table_not_found_lists_suggestions() {
        let err = CatalogError::TableNotFound {
            name: "comits".to_string(),
            suggestions: vec!["commits".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "no such table: comits (did you mean: commits?)"
        );
    }
}
