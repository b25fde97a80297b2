#![forbid(unsafe_code)]

use super::{GitRepo, REPO, git_time, opt_field, records, rows, strip_angles, unquote_path};
use crate::error::SourceError;
use crate::source::{FanOut, RowIter, empty_rows};
use ds_core::{Column, ColumnType, Schema, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const COMMITS_COLUMNS: &[Column] = &[
    Column::derived("id", ColumnType::Text),
    Column::derived("short_id", ColumnType::Text),
    Column::derived("tree_id", ColumnType::Text),
    Column::derived("author_name", ColumnType::Text),
    Column::derived("author_email", ColumnType::Text),
    Column::derived("authored_at", ColumnType::Text),
    Column::derived("committer_name", ColumnType::Text),
    Column::derived("committer_email", ColumnType::Text),
    Column::derived("committed_at", ColumnType::Text),
    Column::derived("parent_count", ColumnType::Integer),
    Column::derived("is_merge", ColumnType::Boolean),
    Column::derived("summary", ColumnType::Text),
    Column::derived("message", ColumnType::Text),
    REPO,
];

pub const COMMITS: Schema = Schema::new(COMMITS_COLUMNS);

const COMMIT_PARENTS_COLUMNS: &[Column] = &[
    Column::derived("commit_id", ColumnType::Text),
    Column::derived("parent_id", ColumnType::Text),
    Column::derived("parent_index", ColumnType::Integer),
    REPO,
];

pub const COMMIT_PARENTS: Schema = Schema::new(COMMIT_PARENTS_COLUMNS);

const STASHES_COLUMNS: &[Column] = &[
    Column::derived("stash_index", ColumnType::Integer),
    Column::derived("stash_ref", ColumnType::Text),
    Column::derived("commit_id", ColumnType::Text),
    Column::derived("created_at", ColumnType::Text),
    Column::derived("message", ColumnType::Text),
    REPO,
];

pub const STASHES: Schema = Schema::new(STASHES_COLUMNS);

const REFLOG_COLUMNS: &[Column] = &[
    Column::derived("ref_name", ColumnType::Text),
    Column::derived("entry_index", ColumnType::Integer),
    Column::derived("new_id", ColumnType::Text),
    Column::derived("old_id", ColumnType::Text),
    Column::derived("committer_name", ColumnType::Text),
    Column::derived("committer_email", ColumnType::Text),
    Column::derived("created_at", ColumnType::Text),
    Column::derived("message", ColumnType::Text),
    REPO,
];

pub const REFLOG: Schema = Schema::new(REFLOG_COLUMNS);

const DIFFS_COLUMNS: &[Column] = &[
    Column::derived("commit_id", ColumnType::Text),
    Column::derived("parent_id", ColumnType::Text),
    Column::derived("files_changed", ColumnType::Integer),
    Column::derived("insertions", ColumnType::Integer),
    Column::derived("deletions", ColumnType::Integer),
    REPO,
];

pub const DIFFS: Schema = Schema::new(DIFFS_COLUMNS);

const DIFF_FILES_COLUMNS: &[Column] = &[
    Column::derived("commit_id", ColumnType::Text),
    Column::derived("path", ColumnType::Text),
    Column::derived("status", ColumnType::Text),
    Column::derived("insertions", ColumnType::Integer),
    Column::derived("deletions", ColumnType::Integer),
    Column::derived("is_binary", ColumnType::Boolean),
    REPO,
];

pub const DIFF_FILES: Schema = Schema::new(DIFF_FILES_COLUMNS);

const BLAME_COLUMNS: &[Column] = &[
    Column::derived("path", ColumnType::Text),
    Column::derived("line_number", ColumnType::Integer),
    Column::derived("original_line_number", ColumnType::Integer),
    Column::derived("commit_id", ColumnType::Text),
    Column::derived("author_name", ColumnType::Text),
    Column::derived("author_email", ColumnType::Text),
    Column::derived("authored_at", ColumnType::Text),
    Column::derived("line_content", ColumnType::Text),
    REPO,
];

pub const BLAME: Schema = Schema::new(BLAME_COLUMNS);

const NOTES_COLUMNS: &[Column] = &[
    Column::derived("object_id", ColumnType::Text),
    Column::derived("note_id", ColumnType::Text),
    Column::derived("message", ColumnType::Text),
    REPO,
];

pub const NOTES: Schema = Schema::new(NOTES_COLUMNS);

const COMMIT_FORMAT: &str =
    "--format=%H%x1f%h%x1f%T%x1f%an%x1f%ae%x1f%at%x1f%cn%x1f%ce%x1f%ct%x1f%P%x1f%s%x1f%B%x1e";

fn log(repo: &GitRepo, format: &str) -> Result<Option<String>, SourceError> {
    let Some(head) = repo.head() else {
        return Ok(None);
    };
    repo.run(&["log", "--no-show-signature", format, head]).map(Some)
}

pub fn commits(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let Some(out) = log(repo, COMMIT_FORMAT)? else {
        return Ok(empty_rows());
    };
    let mut out_rows = Vec::new();
    for fields in records(&out) {
        let [id, short, tree, an, ae, at, cn, ce, ct, parents, subject, body] = fields[..] else {
            continue;
        };
        let parent_count = parents.split_whitespace().count() as i64;
        out_rows.push(repo.row(vec![
            Value::text(id),
            Value::text(short),
            Value::text(tree),
            Value::text(an),
            Value::text(ae),
            git_time(at),
            Value::text(cn),
            Value::text(ce),
            git_time(ct),
            Value::Integer(parent_count),
            Value::Boolean(parent_count > 1),
            Value::text(subject),
            Value::text(body.trim_end()),
        ]));
    }
    Ok(rows(out_rows))
}

pub fn commit_parents(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let Some(out) = log(repo, "--format=%H%x1f%P%x1e")? else {
        return Ok(empty_rows());
    };
    let mut out_rows = Vec::new();
    for fields in records(&out) {
        let [id, parents] = fields[..] else {
            continue;
        };
        for (index, parent) in parents.split_whitespace().enumerate() {
            out_rows.push(repo.row(vec![
                Value::text(id),
                Value::text(parent),
                Value::Integer(index as i64),
            ]));
        }
    }
    Ok(rows(out_rows))
}

pub fn stashes(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let Some(out) = repo.run_allow_fail(&["stash", "list", "--format=%gd%x1f%H%x1f%ct%x1f%gs%x1e"])?
    else {
        return Ok(empty_rows());
    };
    let out_rows = records(&out)
        .filter_map(|fields| match fields[..] {
            [stash_ref, id, ct, message] => Some((stash_ref, id, ct, message)),
            _ => None,
        })
        .enumerate()
        .map(|(index, (stash_ref, id, ct, message))| {
            repo.row(vec![
                Value::Integer(index as i64),
                Value::text(stash_ref),
                Value::text(id),
                git_time(ct),
                Value::text(message.trim_end()),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}

#[derive(Debug, PartialEq, Eq)]
struct ReflogEntry<'a> {
    old_id: &'a str,
    new_id: &'a str,
    name: &'a str,
    email: &'a str,
    seconds: &'a str,
    message: &'a str,
}

/// `<old> <new> <name> <<email>> <seconds> <tz>\t<message>`
fn parse_reflog_line(line: &str) -> Option<ReflogEntry<'_>> {
    let (meta, message) = line.split_once('\t').unwrap_or((line, ""));
    let (old_id, rest) = meta.split_once(' ')?;
    let (new_id, identity) = rest.split_once(' ')?;
    let (name, rest) = identity.split_once('<')?;
    let (email, rest) = rest.split_once('>')?;
    let seconds = rest.split_whitespace().next()?;
    Some(ReflogEntry {
        old_id,
        new_id,
        name: name.trim(),
        email,
        seconds,
        message,
    })
}

fn collect_logs(
    dir: &Path,
    prefix: &str,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), SourceError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(SourceError::io(dir, err)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|err| SourceError::io(dir, err))?.path());
    }
    paths.sort();
    for path in paths {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let ref_name = format!("{prefix}/{name}");
        if path.is_dir() {
            collect_logs(&path, &ref_name, out)?;
        } else {
            out.push((ref_name, path));
        }
    }
    Ok(())
}

pub fn reflog(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let mut logs = Vec::new();
    let head_log = repo.git_path("logs/HEAD")?;
    if head_log.is_file() {
        logs.push(("HEAD".to_string(), head_log));
    }
    collect_logs(&repo.git_path("logs/refs")?, "refs", &mut logs)?;

    let mut out_rows = Vec::new();
    for (ref_name, path) in logs {
        let text = match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => return Err(SourceError::io(&path, err)),
        };
        let entries = text.lines().filter_map(parse_reflog_line).collect::<Vec<_>>();
        for (index, entry) in entries.iter().rev().enumerate() {
            out_rows.push(repo.row(vec![
                Value::text(&ref_name),
                Value::Integer(index as i64),
                Value::text(entry.new_id),
                Value::text(entry.old_id),
                Value::text(entry.name),
                Value::text(entry.email),
                git_time(entry.seconds),
                opt_field(entry.message),
            ]));
        }
    }
    Ok(rows(out_rows))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FileChange {
    path: String,
    status: String,
    insertions: Option<i64>,
    deletions: Option<i64>,
    binary: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct CommitChanges {
    id: String,
    parent: Option<String>,
    files: Vec<FileChange>,
}

/// Decodes `log --format=%x1e%H%x1f%P --raw --numstat` output.
fn parse_changes(out: &str) -> Vec<CommitChanges> {
    let mut commits = Vec::new();
    for chunk in out.split('\x1e').filter(|chunk| !chunk.trim().is_empty()) {
        let mut lines = chunk.split('\n');
        let Some((id, parents)) = lines.next().and_then(|header| header.split_once('\x1f')) else {
            continue;
        };
        let mut files = Vec::<FileChange>::new();
        let mut counts = HashMap::<String, (Option<i64>, Option<i64>)>::new();
        for line in lines.filter(|line| !line.is_empty()) {
            if let Some(raw) = line.strip_prefix(':') {
                let Some((meta, path)) = raw.split_once('\t') else {
                    continue;
                };
                let status = meta
                    .split_whitespace()
                    .nth(4)
                    .and_then(|status| status.get(..1))
                    .unwrap_or("M");
                files.push(FileChange {
                    path: unquote_path(path),
                    status: status.to_string(),
                    ..FileChange::default()
                });
            } else {
                let mut parts = line.splitn(3, '\t');
                let (Some(added), Some(removed), Some(path)) = (parts.next(), parts.next(), parts.next())
                else {
                    continue;
                };
                counts.insert(
                    unquote_path(path),
                    (added.parse().ok(), removed.parse().ok()),
                );
            }
        }
        for file in &mut files {
            match counts.get(&file.path) {
                Some((Some(added), Some(removed))) => {
                    file.insertions = Some(*added);
                    file.deletions = Some(*removed);
                }
                Some(_) => file.binary = true,
                None => {}
            }
        }
        commits.push(CommitChanges {
            id: id.trim().to_string(),
            parent: parents.split_whitespace().next().map(str::to_string),
            files,
        });
    }
    commits
}

fn changes(repo: &GitRepo) -> Result<Vec<CommitChanges>, SourceError> {
    let Some(head) = repo.head() else {
        return Ok(Vec::new());
    };
    let out = repo.run(&[
        "log",
        "--no-show-signature",
        "--format=%x1e%H%x1f%P",
        "--raw",
        "--numstat",
        "--no-renames",
        "--no-ext-diff",
        head,
    ])?;
    Ok(parse_changes(&out))
}

pub fn diffs(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out_rows = changes(repo)?
        .into_iter()
        .map(|commit| {
            let insertions = commit.files.iter().filter_map(|file| file.insertions).sum::<i64>();
            let deletions = commit.files.iter().filter_map(|file| file.deletions).sum::<i64>();
            repo.row(vec![
                Value::text(commit.id),
                Value::from(commit.parent),
                Value::Integer(commit.files.len() as i64),
                Value::Integer(insertions),
                Value::Integer(deletions),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}

pub fn diff_files(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let mut out_rows = Vec::new();
    for commit in changes(repo)? {
        for file in commit.files {
            out_rows.push(repo.row(vec![
                Value::text(&commit.id),
                Value::text(file.path),
                Value::text(file.status),
                Value::from(file.insertions),
                Value::from(file.deletions),
                Value::Boolean(file.binary),
            ]));
        }
    }
    Ok(rows(out_rows))
}

/// Blob paths tracked at HEAD, in tree order.
fn tracked_blobs(repo: &GitRepo, head: &str) -> Result<Vec<String>, SourceError> {
    let out = repo.run(&["ls-tree", "-r", "-z", "--full-tree", head])?;
    Ok(out
        .split('\0')
        .filter_map(|entry| entry.split_once('\t'))
        .filter(|(meta, _)| meta.split_whitespace().nth(1) == Some("blob"))
        .map(|(_, path)| path.to_string())
        .collect())
}

#[derive(Debug, Default)]
struct BlameHeader {
    commit_id: String,
    original_line: Option<i64>,
    final_line: Option<i64>,
    author: String,
    author_email: String,
    author_time: String,
}

/// Decodes `blame --line-porcelain` output of one file.
fn parse_blame(repo: &GitRepo, path: &str, out: &str) -> Vec<ds_core::Record> {
    let mut out_rows = Vec::new();
    let mut header: Option<BlameHeader> = None;
    for line in out.split('\n') {
        if let Some(content) = line.strip_prefix('\t') {
            if let Some(current) = header.take() {
                out_rows.push(repo.row(vec![
                    Value::text(path),
                    Value::from(current.final_line),
                    Value::from(current.original_line),
                    Value::text(current.commit_id),
                    Value::text(current.author),
                    Value::text(strip_angles(&current.author_email)),
                    git_time(&current.author_time),
                    Value::text(content),
                ]));
            }
            continue;
        }
        match header.as_mut() {
            None => {
                let mut parts = line.split_whitespace();
                let Some(commit_id) = parts.next().filter(|id| !id.is_empty()) else {
                    continue;
                };
                header = Some(BlameHeader {
                    commit_id: commit_id.to_string(),
                    original_line: parts.next().and_then(|n| n.parse().ok()),
                    final_line: parts.next().and_then(|n| n.parse().ok()),
                    ..BlameHeader::default()
                });
            }
            Some(current) => {
                let (key, value) = line.split_once(' ').unwrap_or((line, ""));
                match key {
                    "author" => current.author = value.to_string(),
                    "author-mail" => current.author_email = value.to_string(),
                    "author-time" => current.author_time = value.to_string(),
                    _ => {}
                }
            }
        }
    }
    out_rows
}

pub fn blame(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let Some(head) = repo.head().map(str::to_string) else {
        return Ok(empty_rows());
    };
    let files = tracked_blobs(repo, &head)?;
    let repo = repo.clone();
    Ok(Box::new(FanOut::new(files, move |path: &String| {
        let out = repo.run(&["blame", "--line-porcelain", &head, "--", path])?;
        Ok(rows(parse_blame(&repo, path, &out)))
    })))
}

pub fn notes(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let Some(out) = repo.run_allow_fail(&["notes", "list"])? else {
        return Ok(empty_rows());
    };
    let mut out_rows = Vec::new();
    for line in out.lines() {
        let Some((note_id, object_id)) = line.trim().split_once(' ') else {
            continue;
        };
        let message = repo.run(&["cat-file", "-p", note_id])?;
        out_rows.push(repo.row(vec![
            Value::text(object_id),
            Value::text(note_id),
            Value::text(message.trim_end()),
        ]));
    }
    Ok(rows(out_rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflog_lines_split_identity_and_message() {
        let line = "0000000000000000000000000000000000000000 1111111111111111111111111111111111111111 A U Thor <a@example.com> 1700000000 +0000\tcommit (initial): first";
        let entry = parse_reflog_line(line).expect("entry");
        assert_eq!(entry.name, "A U Thor");
        assert_eq!(entry.email, "a@example.com");
        assert_eq!(entry.seconds, "1700000000");
        assert_eq!(entry.message, "commit (initial): first");
    }

    #[test]
    fn raw_and_numstat_blocks_are_merged_per_file() {
        let out = "\x1eaaa\x1fppp\n\n:100644 100644 1111111 2222222 M\tsrc/lib.rs\n:000000 100644 0000000 3333333 A\tlogo.png\n3\t1\tsrc/lib.rs\n-\t-\tlogo.png\n\x1ebbb\x1f\n\n:000000 100644 0000000 4444444 A\tREADME\n1\t0\tREADME\n";
        let commits = parse_changes(out);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].parent.as_deref(), Some("ppp"));
        assert_eq!(
            commits[0].files[0],
            FileChange {
                path: "src/lib.rs".to_string(),
                status: "M".to_string(),
                insertions: Some(3),
                deletions: Some(1),
                binary: false,
            }
        );
        assert!(commits[0].files[1].binary);
        assert_eq!(commits[0].files[1].insertions, None);
        assert_eq!(commits[1].parent, None);
        assert_eq!(commits[1].files[0].status, "A");
    }
}
