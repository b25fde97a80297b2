#![forbid(unsafe_code)]

use crate::error::EngineError;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const MAX_ATTEMPTS: usize = 1000;

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// SHA-256 of the file's contents, `None` when it does not exist.
pub(crate) fn fingerprint(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(sha256_hex(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// `20240102T030405123Z`: UTC, millisecond precision, sorts chronologically.
pub(crate) fn stamp(now: OffsetDateTime) -> String {
    let now = now.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}

/// Writes `contents` (the bytes of `file` that were just read) to a fresh sibling
/// `<name>.bak.<stamp>` and verifies the copy by reading it back.
pub(crate) fn create(file: &Path, contents: &[u8], now: OffsetDateTime) -> Result<PathBuf, EngineError> {
    let failure = |path: &Path, message: String| EngineError::Backup {
        path: path.to_path_buf(),
        message,
    };
    let name = file
        .file_name()
        .ok_or_else(|| failure(file, "path has no file name".to_string()))?
        .to_string_lossy()
        .into_owned();
    let base = format!("{name}.bak.{}", stamp(now));

    for attempt in 0..MAX_ATTEMPTS {
        let candidate = if attempt == 0 {
            file.with_file_name(&base)
        } else {
            file.with_file_name(format!("{base}-{attempt}"))
        };
        let mut out = match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(out) => out,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(failure(&candidate, err.to_string())),
        };
        if let Err(err) = out.write_all(contents).and_then(|()| out.sync_all()) {
            let _ = fs::remove_file(&candidate);
            return Err(failure(&candidate, err.to_string()));
        }
        drop(out);

        let written = fs::read(&candidate).map_err(|err| failure(&candidate, err.to_string()))?;
        if sha256_hex(&written) != sha256_hex(contents) {
            return Err(failure(
                &candidate,
                "backup does not match the original bytes".to_string(),
            ));
        }
        return Ok(candidate);
    }
    Err(failure(
        file,
        format!("no free backup name after {MAX_ATTEMPTS} attempts"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn temp_dir(test_name: &str) -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix(&format!("ds_engine_{test_name}_"))
            .tempdir()
            .expect("create temp dir")
    }

    #[test]
    fn stamp_is_utc_with_milliseconds() {
        assert_eq!(
            stamp(datetime!(2024-01-02 03:04:05.123 +02:00)),
            "20240102T010405123Z"
        );
    }

    #[test]
    fn backups_never_overwrite_each_other() {
        let dir = temp_dir("backups_never_overwrite_each_other");
        let file = dir.path().join("history.jsonl");
        fs::write(&file, b"{\"display\":\"a\"}\n").expect("write");
        let now = datetime!(2024-01-02 03:04:05.123 UTC);

        let first = create(&file, b"one\n", now).expect("first backup");
        let second = create(&file, b"two\n", now).expect("second backup");
        assert_eq!(
            first.file_name().and_then(|name| name.to_str()),
            Some("history.jsonl.bak.20240102T030405123Z")
        );
        assert_eq!(
            second.file_name().and_then(|name| name.to_str()),
            Some("history.jsonl.bak.20240102T030405123Z-1")
        );
        assert_eq!(fs::read(&first).expect("read"), b"one\n");
        assert_eq!(fs::read(&second).expect("read"), b"two\n");
    }

    #[test]
    fn unwritable_directory_is_a_backup_failure() {
        let dir = temp_dir("unwritable_directory_is_a_backup_failure");
        let file = dir.path().join("missing-dir").join("history.jsonl");
        let err = create(&file, b"x\n", OffsetDateTime::now_utc()).expect_err("no directory");
        assert!(matches!(err, EngineError::Backup { .. }));
    }

    #[test]
    fn fingerprint_of_missing_file_is_none() {
        let dir = temp_dir("fingerprint_of_missing_file_is_none");
        assert_eq!(fingerprint(&dir.path().join("nope")).expect("fingerprint"), None);
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
