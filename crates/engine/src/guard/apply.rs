#![forbid(unsafe_code)]

use super::backup::{self, sha256_hex};
use super::plan::{MutationPlan, RowChange};
use crate::error::EngineError;
use ds_core::{Schema, Value};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

/// Backs up and rewrites the plan's file. Returns the backup path, if one was taken.
///
/// The file must still hash to the fingerprint recorded during planning; otherwise
/// someone else wrote to it and the plan no longer describes its lines.
pub(crate) fn apply(plan: &MutationPlan) -> Result<Option<PathBuf>, EngineError> {
    if plan.changes.is_empty() {
        debug!(file = %plan.file.display(), "nothing to apply");
        return Ok(None);
    }
    let write_failure = |message: String| EngineError::Write {
        path: plan.file.clone(),
        message,
    };

    let original = match fs::read(&plan.file) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(write_failure(err.to_string())),
    };
    if original.as_deref().map(sha256_hex) != plan.fingerprint {
        return Err(write_failure(
            "file changed after it was read; nothing was written".to_string(),
        ));
    }

    let backup = match &original {
        Some(bytes) => Some(backup::create(&plan.file, bytes, OffsetDateTime::now_utc())?),
        None => None,
    };
    let contents = rewrite(original.as_deref().unwrap_or_default(), plan)?;
    replace_file(&plan.file, &contents).map_err(|err| write_failure(err.to_string()))?;

    info!(
        table = %plan.table,
        file = %plan.file.display(),
        deleted = plan.count("delete"),
        updated = plan.count("update"),
        inserted = plan.count("insert"),
        backup = ?backup,
        "mutation committed"
    );
    Ok(backup)
}

/// New file contents: deleted lines dropped, updated lines re-serialized, inserts
/// appended. Every other byte of the original is kept as it was.
fn rewrite(original: &[u8], plan: &MutationPlan) -> Result<Vec<u8>, EngineError> {
    let mut deleted = BTreeSet::new();
    let mut updated = BTreeMap::new();
    let mut inserted = Vec::new();
    for change in &plan.changes {
        match change {
            RowChange::Delete { line, .. } => {
                deleted.insert(*line);
            }
            RowChange::Update {
                line,
                after,
                changed,
                ..
            } => {
                updated.insert(*line, (after, changed));
            }
            RowChange::Insert { after } => inserted.push(after),
        }
    }

    let ends_with_newline = original.last() == Some(&b'\n');
    let mut lines = original.split(|byte| *byte == b'\n').collect::<Vec<_>>();
    if ends_with_newline || original.is_empty() {
        lines.pop();
    }

    let mut out = Vec::with_capacity(original.len());
    let last = lines.len();
    for (index, line) in lines.into_iter().enumerate() {
        let number = index + 1;
        if deleted.contains(&number) {
            continue;
        }
        match updated.get(&number) {
            Some((after, changed)) => {
                out.extend(update_line(line, &plan.schema, after, changed).map_err(|message| {
                    EngineError::Write {
                        path: plan.file.clone(),
                        message: format!("line {number}: {message}"),
                    }
                })?);
            }
            None => out.extend_from_slice(line),
        }
        if number < last || ends_with_newline {
            out.push(b'\n');
        }
    }

    if !inserted.is_empty() && !out.is_empty() && out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    for after in inserted {
        let object = new_object(&plan.schema, after);
        out.extend(serde_json::to_vec(&Json::Object(object)).map_err(|err| {
            EngineError::Write {
                path: plan.file.clone(),
                message: err.to_string(),
            }
        })?);
        out.push(b'\n');
    }
    Ok(out)
}

/// Rewrites the changed columns of one JSON line in place, keeping key order.
///
/// A column is written to the first of its keys already present, so a row read through
/// a fallback key keeps that key.
fn update_line(
    line: &[u8],
    schema: &Schema,
    after: &[Value],
    changed: &[usize],
) -> Result<Vec<u8>, String> {
    let (body, carriage_return) = match line.strip_suffix(b"\r") {
        Some(body) => (body, true),
        None => (line, false),
    };
    let mut object =
        serde_json::from_slice::<Map<String, Json>>(body).map_err(|err| err.to_string())?;
    for &index in changed {
        let (Some(column), Some(value)) = (schema.columns().get(index), after.get(index)) else {
            continue;
        };
        let keys = column.json_keys();
        let Some(key) = keys
            .iter()
            .find(|key| object.contains_key(**key))
            .or_else(|| keys.first())
        else {
            continue;
        };
        object.insert((*key).to_string(), value.to_json());
    }
    let mut bytes = serde_json::to_vec(&Json::Object(object)).map_err(|err| err.to_string())?;
    if carriage_return {
        bytes.push(b'\r');
    }
    Ok(bytes)
}

/// A fresh JSON object for an inserted row: writable, non-NULL columns in schema order.
fn new_object(schema: &Schema, after: &[Value]) -> Map<String, Json> {
    schema
        .columns()
        .iter()
        .zip(after)
        .filter(|(column, value)| column.is_writable() && !value.is_null())
        .filter_map(|(column, value)| {
            column
                .json_keys()
                .first()
                .map(|key| ((*key).to_string(), value.to_json()))
        })
        .collect()
}

/// Writes a sibling temp file, syncs it and renames it over `path`.
fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let tmp = dir.join(format!(".{name}.tmp.{}", std::process::id()));

    let result = write_synced(&tmp, contents).and_then(|()| {
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp, meta.permissions())?;
        }
        fs::rename(&tmp, path)
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_storage::tables::history::SCHEMA;

    fn plan(changes: Vec<RowChange>) -> MutationPlan {
        MutationPlan {
            table: "history".to_string(),
            file: PathBuf::from("history.jsonl"),
            schema: SCHEMA,
            fingerprint: None,
            changes,
            skipped_records: 0,
        }
    }

    fn values(display: &str, project: Option<&str>) -> Vec<Value> {
        vec![
            Value::text(display),
            Value::Integer(5),
            Value::opt_text(project),
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
        ]
    }

    #[test]
    fn untouched_lines_keep_their_bytes() {
        let original = b"{\"display\":\"a\",  \"timestamp\":1}\nnot json\n{\"display\":\"b\"}\r\n{\"display\":\"c\"}";
        let changes = vec![
            RowChange::Delete {
                line: 3,
                before: values("b", None),
            },
            RowChange::Update {
                line: 4,
                before: values("c", None),
                after: values("C", None),
                changed: vec![0],
            },
        ];
        let out = rewrite(original, &plan(changes)).expect("rewrite");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "{\"display\":\"a\",  \"timestamp\":1}\nnot json\n{\"display\":\"C\"}"
        );
    }

    #[test]
    fn updates_keep_key_order_and_fallback_keys() {
        let original = b"{\"sessionId\":\"s1\",\"display\":\"x\",\"extra\":{\"k\":1}}\r\n";
        let mut after = values("x", None);
        after[3] = Value::text("s2");
        let changes = vec![RowChange::Update {
            line: 1,
            before: values("x", None),
            after,
            changed: vec![3],
        }];
        let out = rewrite(original, &plan(changes)).expect("rewrite");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "{\"sessionId\":\"s2\",\"display\":\"x\",\"extra\":{\"k\":1}}\r\n"
        );
    }

    #[test]
    fn inserts_are_appended_on_their_own_line() {
        let original = b"{\"display\":\"a\"}";
        let changes = vec![RowChange::Insert {
            after: values("new", Some("/repo")),
        }];
        let out = rewrite(original, &plan(changes)).expect("rewrite");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "{\"display\":\"a\"}\n{\"display\":\"new\",\"timestamp\":5,\"project\":\"/repo\"}\n"
        );
    }

    #[test]
    fn replace_file_swaps_contents_atomically() {
        let dir = tempfile::Builder::new()
            .prefix("ds_engine_replace_file_swaps_contents_atomically_")
            .tempdir()
            .expect("create temp dir");
        let path = dir.path().join("nested").join("history.jsonl");
        replace_file(&path, b"one\n").expect("create");
        replace_file(&path, b"two\n").expect("replace");
        assert_eq!(fs::read(&path).expect("read"), b"two\n");
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_backup_leaves_the_original_untouched() {
        let dir = tempfile::Builder::new()
            .prefix("ds_engine_failed_backup_leaves_the_original_untouched_")
            .tempdir()
            .expect("create temp dir");
        // Fits NAME_MAX on its own; the `.bak.<stamp>` sibling does not.
        let file = dir.path().join(format!("{}.jsonl", "h".repeat(240)));
        let original = b"{\"display\":\"a\"}\n{\"display\":\"b\"}\n";
        fs::write(&file, original).expect("write fixture");
        let mut plan = plan(vec![RowChange::Delete {
            line: 1,
            before: values("a", None),
        }]);
        plan.file = file.clone();
        plan.fingerprint = Some(sha256_hex(original));

        let err = apply(&plan).expect_err("backup cannot be created");
        assert!(matches!(err, EngineError::Backup { .. }), "{err}");
        assert_eq!(err.exit_code(), 5);
        assert_eq!(fs::read(&file).expect("read"), original);
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 1);
    }
}
