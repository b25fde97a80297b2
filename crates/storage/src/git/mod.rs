#![forbid(unsafe_code)]

//! Repository-derived tables. Rows are decoded from the `git` executable's machine-readable output
//! on every scan; nothing is cached between invocations.

mod history;
mod refs;
mod worktree;

use crate::error::SourceError;
use crate::source::{FanOut, RowIter, TableKind, TableSource};
use crate::timefmt::rfc3339_from_unix;
use ds_core::{Column, ColumnType, Record, Schema, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use tracing::debug;

/// A repository attached to the catalog, identified by its top-level directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitRepo {
    root: PathBuf,
    label: String,
    head: Option<String>,
}

impl GitRepo {
    /// Opens the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let output = git_output(path, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(SourceError::RepoNotFound(path.to_path_buf()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let root = PathBuf::from(stdout.trim_end_matches(['\n', '\r']));
        let head = git_output(&root, &["rev-parse", "--verify", "-q", "HEAD^{commit}"])?;
        let head = head
            .status
            .success()
            .then(|| String::from_utf8_lossy(&head.stdout).trim().to_string())
            .filter(|id| !id.is_empty());
        let label = root.display().to_string();
        debug!(repo = %label, head = head.as_deref().unwrap_or("<unborn>"), "opened repository");
        Ok(Self { root, label, head })
    }

    /// Like [`GitRepo::open`], but `Ok(None)` when `path` is not inside a repository.
    pub fn discover(path: &Path) -> Result<Option<Self>, SourceError> {
        match Self::open(path) {
            Ok(repo) => Ok(Some(repo)),
            Err(SourceError::RepoNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Value of the `_repo` column.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// `None` for a repository without commits.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub(crate) fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let output = git_output(&self.root, args)?;
        if !output.status.success() {
            return Err(SourceError::Git {
                repo: self.root.clone(),
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Stdout of a command whose failure means "nothing there" (no stash, no notes ref).
    pub(crate) fn run_allow_fail(&self, args: &[&str]) -> Result<Option<String>, SourceError> {
        let output = git_output(&self.root, args)?;
        Ok(output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Resolves a path inside the git directory (`hooks`, `logs`).
    pub(crate) fn git_path(&self, name: &str) -> Result<PathBuf, SourceError> {
        let path = self.run(&["rev-parse", "--git-path", name])?;
        let path = PathBuf::from(path.trim_end_matches(['\n', '\r']));
        Ok(if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        })
    }

    /// Finishes a row with the `_repo` column.
    pub(crate) fn row(&self, mut values: Vec<Value>) -> Record {
        values.push(Value::text(&self.label));
        Record::new(values)
    }
}

fn git_output(dir: &Path, args: &[&str]) -> Result<Output, SourceError> {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "core.quotepath=false", "--no-pager"])
        .args(args)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(SourceError::GitUnavailable)
}

type ReadFn = fn(&GitRepo) -> Result<RowIter, SourceError>;

struct GitTableDef {
    name: &'static str,
    description: &'static str,
    schema: Schema,
    read: ReadFn,
}

const DEFS: &[GitTableDef] = &[
    GitTableDef {
        name: "commits",
        description: "Commits reachable from HEAD, newest first",
        schema: history::COMMITS,
        read: history::commits,
    },
    GitTableDef {
        name: "commit_parents",
        description: "Parent edges of every commit reachable from HEAD",
        schema: history::COMMIT_PARENTS,
        read: history::commit_parents,
    },
    GitTableDef {
        name: "branches",
        description: "Local and remote-tracking branches",
        schema: refs::BRANCHES,
        read: refs::branches,
    },
    GitTableDef {
        name: "tags",
        description: "Lightweight and annotated tags",
        schema: refs::TAGS,
        read: refs::tags,
    },
    GitTableDef {
        name: "refs",
        description: "Every reference with its kind",
        schema: refs::REFS,
        read: refs::refs,
    },
    GitTableDef {
        name: "stashes",
        description: "Stash entries, most recent first",
        schema: history::STASHES,
        read: history::stashes,
    },
    GitTableDef {
        name: "reflog",
        description: "Reflog entries of HEAD and every logged reference",
        schema: history::REFLOG,
        read: history::reflog,
    },
    GitTableDef {
        name: "diffs",
        description: "Per-commit change totals against the first parent",
        schema: history::DIFFS,
        read: history::diffs,
    },
    GitTableDef {
        name: "diff_files",
        description: "Per-file changes of every commit",
        schema: history::DIFF_FILES,
        read: history::diff_files,
    },
    GitTableDef {
        name: "blame",
        description: "Line-level authorship of every file at HEAD",
        schema: history::BLAME,
        read: history::blame,
    },
    GitTableDef {
        name: "config",
        description: "Effective configuration entries with their scope",
        schema: worktree::CONFIG,
        read: worktree::config,
    },
    GitTableDef {
        name: "remotes",
        description: "Configured remotes",
        schema: refs::REMOTES,
        read: refs::remotes,
    },
    GitTableDef {
        name: "submodules",
        description: "Submodules declared in .gitmodules",
        schema: worktree::SUBMODULES,
        read: worktree::submodules,
    },
    GitTableDef {
        name: "status",
        description: "Working tree and index changes",
        schema: worktree::STATUS,
        read: worktree::status,
    },
    GitTableDef {
        name: "worktrees",
        description: "Linked worktrees",
        schema: worktree::WORKTREES,
        read: worktree::worktrees,
    },
    GitTableDef {
        name: "hooks",
        description: "Files in the hooks directory",
        schema: worktree::HOOKS,
        read: worktree::hooks,
    },
    GitTableDef {
        name: "notes",
        description: "Notes attached to objects under refs/notes/commits",
        schema: history::NOTES,
        read: history::notes,
    },
];

/// One repository-derived table over an ordered list of repositories.
pub struct GitTable {
    def: &'static GitTableDef,
    repos: Arc<[GitRepo]>,
}

impl std::fmt::Debug for GitTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTable")
            .field("name", &self.def.name)
            .field("repos", &self.repos.len())
            .finish()
    }
}

/// All repository tables, sharing one repository list.
pub fn tables(repos: Vec<GitRepo>) -> Vec<GitTable> {
    let repos: Arc<[GitRepo]> = repos.into();
    DEFS.iter()
        .map(|def| GitTable {
            def,
            repos: Arc::clone(&repos),
        })
        .collect()
}

impl TableSource for GitTable {
    fn name(&self) -> &str {
        self.def.name
    }

    fn schema(&self) -> Schema {
        self.def.schema
    }

    fn kind(&self) -> TableKind {
        TableKind::Repository
    }

    fn description(&self) -> &str {
        self.def.description
    }

    fn scan(&self) -> Result<RowIter, SourceError> {
        let read = self.def.read;
        let name = self.def.name;
        let repos = self.repos.to_vec();
        Ok(Box::new(FanOut::new(repos, move |repo: &GitRepo| {
            debug!(table = name, repo = repo.label(), "reading repository table");
            read(repo)
        })))
    }
}

/// Splits `%x1e`-terminated records into their `%x1f`-separated fields.
pub(crate) fn records(out: &str) -> impl Iterator<Item = Vec<&str>> {
    out.split('\x1e')
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.is_empty())
        .map(|record| record.split('\x1f').collect())
}

pub(crate) fn rows(records: Vec<Record>) -> RowIter {
    Box::new(records.into_iter().map(Ok))
}

pub(crate) const REPO: Column = Column::provenance("_repo", ColumnType::Text);

/// Unix seconds to RFC 3339 text; unparsable or empty input is NULL.
pub(crate) fn git_time(seconds: &str) -> Value {
    Value::opt_text(seconds.trim().parse::<i64>().ok().and_then(rfc3339_from_unix))
}

pub(crate) fn opt_field(text: &str) -> Value {
    if text.is_empty() {
        Value::Null
    } else {
        Value::text(text)
    }
}

/// Drops the angle brackets around an email address (`<a@b>` becomes `a@b`).
pub(crate) fn strip_angles(text: &str) -> &str {
    text.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Removes C-style quoting that git applies to unusual paths.
pub(crate) fn unquote_path(path: &str) -> String {
    let Some(inner) = path
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return path.to_string();
    };
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while let Some(&byte) = bytes.get(index) {
        index += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let octal = bytes
            .get(index..index + 3)
            .filter(|digits| digits.iter().all(|digit| (b'0'..=b'7').contains(digit)));
        if let Some(digits) = octal {
            // Git writes at most `\377`.
            let value = digits
                .iter()
                .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
            out.push(u8::try_from(value).unwrap_or(u8::MAX));
            index += 3;
            continue;
        }
        let escaped = match bytes.get(index) {
            Some(b'a') => 0x07,
            Some(b'b') => 0x08,
            Some(b't') => b'\t',
            Some(b'n') => b'\n',
            Some(b'v') => 0x0b,
            Some(b'f') => 0x0c,
            Some(b'r') => b'\r',
            Some(&other) => other,
            None => b'\\',
        };
        out.push(escaped);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
