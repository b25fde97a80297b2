#![forbid(unsafe_code)]

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const HISTORY: &str = concat!(
    "{\"display\":\"one\",\"timestamp\":1700000000000,\"project\":\"/repo/a\"}\n",
    "{\"display\":\"two\",\"timestamp\":1700000001000,\"project\":\"/repo/b\"}\n",
    "{\"display\":\"three\",\"timestamp\":1700000002000,\"project\":\"/repo/a\"}\n",
);

fn temp_dir(test_name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("devsql_cli_{test_name}_"))
        .tempdir()
        .expect("create temp dir")
}

fn data_dir(dir: &TempDir) -> std::path::PathBuf {
    let data = dir.path().join("claude");
    std::fs::create_dir_all(&data).expect("create data dir");
    std::fs::write(data.join("history.jsonl"), HISTORY).expect("write history");
    data
}

fn devsql(dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_devsql"));
    command
        .current_dir(dir.path())
        .env("CLAUDE_DATA_DIR", dir.path().join("claude"))
        .env("CODEX_HOME", dir.path().join("codex"))
        .env_remove("DEVSQL_LOG");
    command
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn backups(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .expect("list dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".bak."))
        .count()
}

#[test]
fn raw_count_prints_a_bare_number() {
    let dir = temp_dir("raw_count_prints_a_bare_number");
    data_dir(&dir);

    let output = devsql(&dir)
        .args(["-f", "raw", "SELECT COUNT(*) FROM history WHERE project='/repo/a'"])
        .output()
        .expect("run devsql");
    assert!(output.status.success(), "stderr={}", stderr(&output));
    assert_eq!(stdout(&output), "2\n");
}

#[test]
fn data_dir_flag_overrides_the_environment() {
    let dir = temp_dir("data_dir_flag_overrides_the_environment");
    let data = data_dir(&dir);

    let output = devsql(&dir)
        .env("CLAUDE_DATA_DIR", dir.path().join("elsewhere"))
        .arg("--data-dir")
        .arg(&data)
        .args(["--format", "csv", "SELECT display FROM history ORDER BY timestamp"])
        .output()
        .expect("run devsql");
    assert!(output.status.success(), "stderr={}", stderr(&output));
    assert_eq!(stdout(&output), "display\none\ntwo\nthree\n");
}

#[test]
fn table_output_is_boxed_with_a_row_count() {
    let dir = temp_dir("table_output_is_boxed_with_a_row_count");
    data_dir(&dir);

    let output = devsql(&dir)
        .arg("SELECT display, project FROM history WHERE display = 'two'")
        .output()
        .expect("run devsql");
    assert!(output.status.success(), "stderr={}", stderr(&output));
    let out = stdout(&output);
    let lines = out.lines().collect::<Vec<_>>();
    assert!(
        lines.iter().any(|line| line.contains("display") && line.contains("project")),
        "{out}"
    );
    assert!(
        lines.iter().any(|line| line.contains("two") && line.contains("/repo/b")),
        "{out}"
    );
    assert!(out.ends_with("(1 row)\n"), "{out}");
}

#[test]
fn statement_can_come_from_stdin() {
    let dir = temp_dir("statement_can_come_from_stdin");
    data_dir(&dir);

    let mut child = devsql(&dir)
        .args(["-f", "jsonl", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn devsql");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"SELECT display FROM history WHERE timestamp = 1700000001000\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait devsql");
    assert!(output.status.success(), "stderr={}", stderr(&output));
    assert_eq!(stdout(&output), "{\"display\":\"two\"}\n");
}

#[test]
fn exit_codes_follow_the_error_class() {
    let dir = temp_dir("exit_codes_follow_the_error_class");
    data_dir(&dir);

    let cases = [
        ("SELEC * FROM history", 2),
        ("SELECT * FROM histroy", 3),
        ("SELECT nope FROM history", 3),
        ("DELETE FROM history WHERE project='/repo/a'", 4),
        ("SELECT * FROM history WHERE display = 42", 7),
    ];
    for (sql, code) in cases {
        let output = devsql(&dir).arg(sql).output().expect("run devsql");
        assert_eq!(output.status.code(), Some(code), "{sql}: stderr={}", stderr(&output));
        assert!(stdout(&output).is_empty(), "{sql}");
        assert!(stderr(&output).contains("devsql: "), "{sql}");
    }
    let output = devsql(&dir)
        .arg("SELECT * FROM histroy")
        .output()
        .expect("run devsql");
    assert!(stderr(&output).contains("history"), "suggestion: {}", stderr(&output));
}

#[test]
fn dry_run_previews_and_write_applies_with_backup() {
    let dir = temp_dir("dry_run_previews_and_write_applies_with_backup");
    let data = data_dir(&dir);
    let sql = "DELETE FROM history WHERE project='/repo/a'";

    let preview = devsql(&dir)
        .args(["--dry-run", "-f", "csv", sql])
        .output()
        .expect("run dry run");
    assert!(preview.status.success(), "stderr={}", stderr(&preview));
    assert_eq!(stdout(&preview).lines().count(), 3);
    assert!(stdout(&preview).starts_with("_change,"));
    assert!(stderr(&preview).contains("dry run: 2 deleted"));
    assert_eq!(std::fs::read_to_string(data.join("history.jsonl")).expect("read"), HISTORY);
    assert_eq!(backups(&data), 0);

    let written = devsql(&dir)
        .args(["--write", "-f", "csv", sql])
        .output()
        .expect("run write");
    assert!(written.status.success(), "stderr={}", stderr(&written));
    assert_eq!(stdout(&written), stdout(&preview));
    assert!(stderr(&written).contains("backup at"));
    assert_eq!(
        std::fs::read_to_string(data.join("history.jsonl")).expect("read"),
        "{\"display\":\"two\",\"timestamp\":1700000001000,\"project\":\"/repo/b\"}\n"
    );
    assert_eq!(backups(&data), 1);
}

#[test]
fn dry_run_and_write_together_are_a_usage_error() {
    let dir = temp_dir("dry_run_and_write_together_are_a_usage_error");
    let output = devsql(&dir)
        .args(["--dry-run", "--write", "DELETE FROM history WHERE 1=1"])
        .output()
        .expect("run devsql");
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn help_and_version_exit_zero() {
    let dir = temp_dir("help_and_version_exit_zero");
    let output = devsql(&dir).arg("--help").output().expect("run --help");
    assert!(output.status.success());
    assert!(stdout(&output).contains("--dry-run"));

    let output = devsql(&dir).arg("--version").output().expect("run --version");
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}
