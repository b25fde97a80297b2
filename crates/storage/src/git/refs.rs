#![forbid(unsafe_code)]

use super::{GitRepo, REPO, git_time, opt_field, records, rows, strip_angles};
use crate::error::SourceError;
use crate::source::RowIter;
use ds_core::{Column, ColumnType, Schema, Value};

const BRANCHES_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("full_name", ColumnType::Text),
    Column::derived("target_id", ColumnType::Text),
    Column::derived("upstream", ColumnType::Text),
    Column::derived("is_head", ColumnType::Boolean),
    Column::derived("is_remote", ColumnType::Boolean),
    REPO,
];

pub const BRANCHES: Schema = Schema::new(BRANCHES_COLUMNS);

const TAGS_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("target_id", ColumnType::Text),
    Column::derived("tag_id", ColumnType::Text),
    Column::derived("is_annotated", ColumnType::Boolean),
    Column::derived("tagger_name", ColumnType::Text),
    Column::derived("tagger_email", ColumnType::Text),
    Column::derived("tagged_at", ColumnType::Text),
    Column::derived("message", ColumnType::Text),
    REPO,
];

pub const TAGS: Schema = Schema::new(TAGS_COLUMNS);

const REFS_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("short_name", ColumnType::Text),
    Column::derived("target_id", ColumnType::Text),
    Column::derived("object_type", ColumnType::Text),
    Column::derived("kind", ColumnType::Text),
    REPO,
];

pub const REFS: Schema = Schema::new(REFS_COLUMNS);

const REMOTES_COLUMNS: &[Column] = &[
    Column::derived("name", ColumnType::Text),
    Column::derived("fetch_url", ColumnType::Text),
    Column::derived("push_url", ColumnType::Text),
    REPO,
];

pub const REMOTES: Schema = Schema::new(REMOTES_COLUMNS);

pub fn branches(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&[
        "for-each-ref",
        "--format=%(refname)%1f%(refname:short)%1f%(objectname)%1f%(upstream:short)%1f%(HEAD)%1e",
        "refs/heads",
        "refs/remotes",
    ])?;
    let mut out_rows = Vec::new();
    for fields in records(&out) {
        let [full_name, name, target, upstream, head] = fields[..] else {
            continue;
        };
        let is_remote = full_name.starts_with("refs/remotes/");
        // `refs/remotes/<remote>/HEAD` is a symbolic pointer, not a branch.
        if is_remote && full_name.ends_with("/HEAD") {
            continue;
        }
        out_rows.push(repo.row(vec![
            Value::text(name),
            Value::text(full_name),
            Value::text(target),
            opt_field(upstream),
            Value::Boolean(head.trim() == "*"),
            Value::Boolean(is_remote),
        ]));
    }
    Ok(rows(out_rows))
}

pub fn tags(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&[
        "for-each-ref",
        "--format=%(refname:short)%1f%(objectname)%1f%(objecttype)%1f%(*objectname)%1f%(taggername)%1f%(taggeremail)%1f%(taggerdate:unix)%1f%(contents)%1e",
        "refs/tags",
    ])?;
    let mut out_rows = Vec::new();
    for fields in records(&out) {
        let [name, object, object_type, peeled, tagger, email, date, contents] = fields[..] else {
            continue;
        };
        let annotated = object_type == "tag";
        let (target, tag_id) = if annotated {
            (peeled, Value::text(object))
        } else {
            (object, Value::Null)
        };
        let annotated_text = |text: &str| {
            if annotated {
                opt_field(text)
            } else {
                Value::Null
            }
        };
        out_rows.push(repo.row(vec![
            Value::text(name),
            Value::text(target),
            tag_id,
            Value::Boolean(annotated),
            annotated_text(tagger),
            annotated_text(strip_angles(email)),
            if annotated { git_time(date) } else { Value::Null },
            annotated_text(contents.trim_end()),
        ]));
    }
    Ok(rows(out_rows))
}

fn ref_kind(name: &str) -> &'static str {
    if name.starts_with("refs/heads/") {
        "branch"
    } else if name.starts_with("refs/remotes/") {
        "remote"
    } else if name.starts_with("refs/tags/") {
        "tag"
    } else if name.starts_with("refs/notes/") {
        "note"
    } else if name == "refs/stash" {
        "stash"
    } else {
        "other"
    }
}

pub fn refs(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&[
        "for-each-ref",
        "--format=%(refname)%1f%(refname:short)%1f%(objectname)%1f%(objecttype)%1e",
    ])?;
    let mut out_rows = Vec::new();
    for fields in records(&out) {
        let [name, short, target, object_type] = fields[..] else {
            continue;
        };
        out_rows.push(repo.row(vec![
            Value::text(name),
            Value::text(short),
            Value::text(target),
            Value::text(object_type),
            Value::text(ref_kind(name)),
        ]));
    }
    Ok(rows(out_rows))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Remote {
    name: String,
    fetch: Option<String>,
    push: Option<String>,
}

/// Decodes `remote -v` lines: `<name>\t<url> (fetch|push)`.
fn parse_remotes(out: &str) -> Vec<Remote> {
    let mut remotes = Vec::<Remote>::new();
    for line in out.lines() {
        let Some((name, rest)) = line.split_once('\t') else {
            continue;
        };
        let (url, direction) = match rest.rsplit_once(' ') {
            Some((url, direction)) => (url, direction),
            None => (rest, "(fetch)"),
        };
        let index = match remotes.iter().position(|remote| remote.name == name) {
            Some(index) => index,
            None => {
                remotes.push(Remote {
                    name: name.to_string(),
                    ..Remote::default()
                });
                remotes.len() - 1
            }
        };
        let remote = &mut remotes[index];
        if direction == "(push)" {
            remote.push = Some(url.to_string());
        } else {
            remote.fetch = Some(url.to_string());
        }
    }
    remotes
}

pub fn remotes(repo: &GitRepo) -> Result<RowIter, SourceError> {
    let out = repo.run(&["remote", "-v"])?;
    let out_rows = parse_remotes(&out)
        .into_iter()
        .map(|remote| {
            repo.row(vec![
                Value::text(remote.name),
                Value::from(remote.fetch),
                Value::from(remote.push),
            ])
        })
        .collect();
    Ok(rows(out_rows))
}
