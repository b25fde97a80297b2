#![forbid(unsafe_code)]

use regex::Regex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Scalar functions available to every statement on top of SQLite's builtins.
pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    // `x REGEXP y` is rewritten by SQLite into `regexp(y, x)`.
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        regexp,
    )
}

fn regexp(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    if matches!(ctx.get_raw(0), ValueRef::Null) {
        return Ok(None);
    }
    let pattern = ctx.get_or_create_aux(0, |raw| -> Result<Regex, BoxError> {
        match raw {
            ValueRef::Text(bytes) => Ok(Regex::new(std::str::from_utf8(bytes)?)?),
            _ => Err("type mismatch: REGEXP pattern must be TEXT".into()),
        }
    })?;
    let subject = match ctx.get_raw(1) {
        ValueRef::Null => return Ok(None),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(x) => x.to_string(),
        ValueRef::Blob(_) => {
            return Err(rusqlite::Error::UserFunctionError(
                "type mismatch: REGEXP cannot match a BLOB".into(),
            ));
        }
    };
    Ok(Some(pattern.is_match(&subject)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        register(&conn).expect("register");
        conn
    }

    #[test]
    fn regexp_operator_matches() {
        let conn = connection();
        let hit: bool = conn
            .query_row("SELECT 'fix: parser' REGEXP '^fix(\\(.*\\))?:'", [], |row| row.get(0))
            .expect("query");
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT regexp('^feat', 'fix: parser')", [], |row| row.get(0))
            .expect("query");
        assert!(!miss);
    }

    #[test]
    fn null_operands_yield_null() {
        let conn = connection();
        let value: Option<bool> = conn
            .query_row("SELECT NULL REGEXP 'a'", [], |row| row.get(0))
            .expect("query");
        assert_eq!(value, None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let conn = connection();
        let result = conn.query_row("SELECT 'a' REGEXP '('", [], |row| row.get::<_, bool>(0));
        assert!(result.is_err());
    }
}
