#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

/// Environment variable naming the coding-assistant data root.
pub const DATA_DIR_ENV: &str = "CLAUDE_DATA_DIR";
/// Environment variable naming the secondary CLI's data root (its own `history.jsonl`).
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";

/// Paths of every coding-assistant source, resolved once per invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    data_dir: PathBuf,
    codex_dir: PathBuf,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, codex_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            codex_dir: codex_dir.into(),
        }
    }

    /// Flag value, then environment variable, then `$HOME/.claude` / `$HOME/.codex`.
    pub fn resolve(data_dir: Option<PathBuf>, codex_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir
            .or_else(|| env_path(DATA_DIR_ENV))
            .unwrap_or_else(|| home_dir().join(".claude"));
        let codex_dir = codex_dir
            .or_else(|| env_path(CODEX_HOME_ENV))
            .unwrap_or_else(|| home_dir().join(".codex"));
        Self::new(data_dir, codex_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn codex_dir(&self) -> &Path {
        &self.codex_dir
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("history.jsonl")
    }

    pub fn jhistory_file(&self) -> PathBuf {
        self.codex_dir.join("history.jsonl")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn todos_dir(&self) -> PathBuf {
        self.data_dir.join("todos")
    }

    pub fn stats_file(&self) -> PathBuf {
        self.data_dir.join("stats-cache.json")
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn home_dir() -> PathBuf {
    env_path("HOME")
        .or_else(|| env_path("USERPROFILE"))
        .unwrap_or_else(|| PathBuf::from("."))
}
