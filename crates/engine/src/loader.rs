#![forbid(unsafe_code)]

use crate::error::EngineError;
use crate::functions;
use ds_core::{ColumnType, Schema, Value, provenance};
use ds_storage::{ResolvedTable, TableSource};
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// An in-memory SQLite database holding the tables one statement needs.
pub(crate) struct Session {
    conn: Connection,
    loaded: BTreeSet<String>,
    skipped: usize,
}

impl Session {
    pub(crate) fn open() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        functions::register(&conn)?;
        Ok(Self {
            conn,
            loaded: BTreeSet::new(),
            skipped: 0,
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Malformed records skipped across every table loaded so far.
    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    /// Loads each table once under its canonical name; aliases become views over it.
    pub(crate) fn attach(&mut self, tables: &[ResolvedTable]) -> Result<(), EngineError> {
        for table in tables {
            if !self.loaded.contains(&table.canonical) {
                self.load(&table.canonical, table.source.as_ref(), false)?;
            }
        }
        for table in tables.iter().filter(|table| table.is_alias()) {
            if self.loaded.insert(table.name.clone()) {
                self.conn.execute_batch(&format!(
                    "CREATE TEMP VIEW {} AS SELECT * FROM {}",
                    quote_ident(&table.name),
                    quote_ident(&table.canonical)
                ))?;
            }
        }
        Ok(())
    }

    /// Loads `source` under `name` with each row's `rowid` set to its physical line.
    pub(crate) fn attach_lines(
        &mut self,
        name: &str,
        source: &dyn TableSource,
    ) -> Result<(), EngineError> {
        self.load(name, source, true)
    }

    fn load(
        &mut self,
        name: &str,
        source: &dyn TableSource,
        line_rowids: bool,
    ) -> Result<(), EngineError> {
        let schema = source.schema();
        let line_index = if line_rowids {
            Some(schema.position(provenance::LINE).ok_or_else(|| {
                EngineError::Execution(format!("table `{name}` has no line positions"))
            })?)
        } else {
            None
        };
        self.conn.execute_batch(&create_table_sql(name, &schema))?;

        let insert = insert_sql(name, &schema, line_rowids);
        let tx = self.conn.unchecked_transaction()?;
        let mut rows = 0usize;
        let mut skipped = 0usize;
        {
            let mut stmt = tx.prepare_cached(&insert)?;
            for item in source.scan()? {
                let record = match item {
                    Ok(record) => record,
                    Err(err) if err.is_recoverable() => {
                        debug!(table = name, error = %err, "skipping malformed record");
                        skipped += 1;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                let mut params = Vec::with_capacity(record.len() + 1);
                if let Some(index) = line_index {
                    params.push(record.get(index).map_or(SqlValue::Null, to_sql));
                }
                params.extend(record.values().iter().map(to_sql));
                stmt.execute(rusqlite::params_from_iter(params))?;
                rows += 1;
            }
        }
        tx.commit()?;

        if skipped > 0 {
            warn!(table = name, skipped, "skipped malformed records");
        }
        debug!(table = name, rows, "loaded table");
        self.skipped += skipped;
        self.loaded.insert(name.to_string());
        Ok(())
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(name: &str, schema: &Schema) -> String {
    let mut sql = format!("CREATE TABLE {} (", quote_ident(name));
    for (index, column) in schema.columns().iter().enumerate() {
        if index > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {}", quote_ident(column.name), column.ty.sql_decl());
    }
    sql.push(')');
    sql
}

fn insert_sql(name: &str, schema: &Schema, line_rowids: bool) -> String {
    let mut columns = schema.names().map(quote_ident).collect::<Vec<_>>();
    if line_rowids {
        columns.insert(0, "rowid".to_string());
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(name),
        columns.join(", ")
    )
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Real(x) => SqlValue::Real(*x),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Boolean(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Json(json) => SqlValue::Text(json.to_string()),
    }
}

/// Reads a SQLite value back, restoring BOOLEAN and JSON columns from their storage form.
pub(crate) fn from_sql(value: ValueRef<'_>, ty: Option<ColumnType>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) if ty == Some(ColumnType::Boolean) => Value::Boolean(n != 0),
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(x) => Value::Real(x),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if ty == Some(ColumnType::Json) {
                match serde_json::from_str(&text) {
                    Ok(json) => Value::Json(json),
                    Err(_) => Value::Text(text),
                }
            } else {
                Value::Text(text)
            }
        }
        ValueRef::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                let _ = write!(hex, "{byte:02x}");
            }
            Value::Text(hex)
        }
    }
}
