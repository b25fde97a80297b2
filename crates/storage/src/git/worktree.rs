#![forbid(unsafe_code)]

use super::{GitRepo, REPO, opt_field, rows};
use crate::error::SourceError;
use crate::source::RowIter;
use ds_core::{Column, ColumnType, Schema, Value};
use std::path::Path;

const CONFIG_COLUMNS: &[Column] = &[
    Column::derived("scope", ColumnType::Text),
    Column::derived("name", ColumnType::Text),
    Column::derived("value", ColumnType::Text),
    REPO,
];

pub const CONFIG: Schema = Schema::new(CONFIG_COLUMNS);

const SUBMODULES_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("path", ColumnType::Text),
    Column::derived("url", ColumnType::Text),
    Column::derived("branch", ColumnType::Text),
    REPO,
];

pub const SUBMODULES: Schema = Schema::new(SUBMODULES_COLUMNS);

const STATUS_COLUMNS: &[Column] = &[
    Column::derived("path", ColumnType::Text),
    Column::derived("index_status", ColumnType::Text),
    Column::derived("worktree_status", ColumnType::Text),
    Column::derived("original_path", ColumnType::Text),
    REPO,
];

pub const STATUS: Schema = Schema::new(STATUS_COLUMNS);

const WORKTREES_COLUMNS: &[Column] = &[
    Column::derived("path", ColumnType::Text),
    Column::derived("head_id", ColumnType::Text),
    Column::derived("branch", ColumnType::Text),
    Column::derived("is_main", ColumnType::Boolean),
    Column::derived("is_bare", ColumnType::Boolean),
    Column::derived("is_detached", ColumnType::Boolean),
    Column::derived("is_locked", ColumnType::Boolean),
    Column::derived("is_prunable", ColumnType::Boolean),
    REPO,
];

pub const WORKTREES: Schema = Schema::new(WORKTREES_COLUMNS);

const HOOKS_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("path", ColumnType::Text),
    Column::derived("is_executable", ColumnType::Boolean),
    Column::derived("is_sample", ColumnType::Boolean),
    REPO,
];

pub const HOOKS: Schema = Schema::new(HOOKS_COLUMNS);

/// `key\nvalue` entries of `config -z`; a key without a value has no newline.
fn split_entry(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once('\n') {
        Some((key, value)) => (key, Some(value)),
        None => (entry, None),
    }
}

/// Decodes `config --list --show-scope -z`: `scope\0key\nvalue\0` per entry.
fn parse_scoped_config(out: &str) -> Vec<(&str, &str, Option<&str>)> {
    let mut tokens = out.split('\0').filter(|token| !token.is_empty());
    let mut entries = Vec::new();
    while let (Some(scope), Some(entry)) = (tokens.next(), tokens.next()) {
        let (key, value) = split_entry(entry);
        entries.push((scope, key, value));
    }
    entries
}

pub fn config(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&["config", "--list", "--show-scope", "-z"])?;
    let out_rows = parse_scoped_config(&out)
        .into_iter()
        .map(|(scope, key, value)| {
            repo.row(vec![Value::text(scope), Value::text(key), Value::from(value)])
        })
        .collect();
    Ok(rows(out_rows))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Submodule {
    name: String,
    path: Option<String>,
    url: Option<String>,
    branch: Option<String>,
}

fn parse_gitmodules(out: &str) -> Vec<Submodule> {
    let mut modules = Vec::<Submodule>::new();
    for entry in out.split('\0').filter(|entry| !entry.is_empty()) {
        let (key, value) = split_entry(entry);
        let Some((name, field)) = key
            .strip_prefix("submodule.")
            .and_then(|rest| rest.rsplit_once('.'))
        else {
            continue;
        };
        let index = match modules.iter().position(|module| module.name == name) {
            Some(index) => index,
            None => {
                modules.push(Submodule {
                    name: name.to_string(),
                    ..Submodule::default()
                });
                modules.len() - 1
            }
        };
        let value = value.map(str::to_string);
        match field {
            "path" => modules[index].path = value,
            "url" => modules[index].url = value,
            "branch" => modules[index].branch = value,
            _ => {}
        }
    }
    modules
}

pub fn submodules(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let gitmodules = repo.root().join(".gitmodules");
    if !gitmodules.is_file() {
        return Ok(rows(Vec::new()));
    }
    let file = gitmodules.display().to_string();
    let out = repo.run(&["config", "-f", &file, "-z", "--list"])?;
    let out_rows = parse_gitmodules(&out)
        .into_iter()
        .map(|module| {
            repo.row(vec![
                Value::text(module.name),
                Value::from(module.path),
                Value::from(module.url),
                Value::from(module.branch),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}

#[derive(Debug, PartialEq, Eq)]
struct StatusEntry<'a> {
    path: &'a str,
    index: &'a str,
    worktree: &'a str,
    original: Option<&'a str>,
}

/// Decodes `status --porcelain=v1 -z`; renames and copies carry the source path as the next token.
fn parse_status(out: &str) -> Vec<StatusEntry<'_>> {
    let mut tokens = out.split('\0').filter(|token| !token.is_empty());
    let mut entries = Vec::new();
    while let Some(token) = tokens.next() {
        let (Some(index), Some(worktree), Some(path)) = (token.get(0..1), token.get(1..2), token.get(3..))
        else {
            continue;
        };
        let original = if matches!(index, "R" | "C") || matches!(worktree, "R" | "C") {
            tokens.next()
        } else {
            None
        };
        entries.push(StatusEntry {
            path,
            index,
            worktree,
            original,
        });
    }
    entries
}

fn status_code(code: &str) -> Value {
    opt_field(code.trim())
}

pub fn status(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
    let out_rows = parse_status(&out)
        .into_iter()
        .map(|entry| {
            repo.row(vec![
                Value::text(entry.path),
                status_code(entry.index),
                status_code(entry.worktree),
                Value::from(entry.original),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Worktree {
    path: String,
    head: Option<String>,
    branch: Option<String>,
    bare: bool,
    detached: bool,
    locked: bool,
    prunable: bool,
}

fn parse_worktrees(out: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::<Worktree>::new();
    for line in out.lines() {
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        if key == "worktree" {
            worktrees.push(Worktree {
                path: value.to_string(),
                ..Worktree::default()
            });
            continue;
        }
        let Some(current) = worktrees.last_mut() else {
            continue;
        };
        match key {
            "HEAD" => current.head = Some(value.to_string()),
            "branch" => {
                current.branch = Some(value.trim_start_matches("refs/heads/").to_string());
            }
            "bare" => current.bare = true,
            "detached" => current.detached = true,
            "locked" => current.locked = true,
            "prunable" => current.prunable = true,
            _ => {}
        }
    }
    worktrees
}

pub fn worktrees(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&["worktree", "list", "--porcelain"])?;
    let out_rows = parse_worktrees(&out)
        .into_iter()
        .enumerate()
        .map(|(index, worktree)| {
            repo.row(vec![
                Value::text(worktree.path),
                Value::from(worktree.head),
                Value::from(worktree.branch),
                Value::Boolean(index == 0),
                Value::Boolean(worktree.bare),
                Value::Boolean(worktree.detached),
                Value::Boolean(worktree.locked),
                Value::Boolean(worktree.prunable),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "exe" || ext == "bat" || ext == "cmd")
}

pub fn hooks(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let dir = repo.git_path("hooks")?;
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(rows(Vec::new())),
        Err(err) => return Err(SourceError::io(&dir, err)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| SourceError::io(&dir, err))?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    let out_rows = paths
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            Some(repo.row(vec![
                Value::text(name),
                Value::text(path.display().to_string()),
                Value::Boolean(is_executable(path)),
                Value::Boolean(name.ends_with(".sample")),
            ]))
        })
        .collect();
    Ok(rows(out_rows))
}
