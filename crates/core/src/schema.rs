#![forbid(unsafe_code)]

use crate::value::ColumnType;
use crate::{Record, Value};

/// Where a column's value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// Top-level JSON keys, tried in order. The first key is the one written back.
    Key(&'static [&'static str]),
    /// Computed by the reader from other fields; never written back.
    Derived,
    /// Injected by the reader (`_source_file`, `_line`, `_repo`, ...).
    Provenance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub field: Field,
}

impl Column {
    pub const fn key(name: &'static str, ty: ColumnType, keys: &'static [&'static str]) -> Self {
        Self {
            name,
            ty,
            field: Field::Key(keys),
        }
    }

    pub const fn derived(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            field: Field::Derived,
        }
    }

    pub const fn provenance(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            field: Field::Provenance,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.field, Field::Key(_))
    }

    pub fn json_keys(&self) -> &'static [&'static str] {
        match self.field {
            Field::Key(keys) => keys,
            Field::Derived | Field::Provenance => &[],
        }
    }
}

/// Ordered column list of a virtual table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: &'static [Column],
}

impl Schema {
    pub const fn new(columns: &'static [Column]) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &'static [Column] {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|column| column.name)
    }

    /// Case-insensitive, like SQL identifiers.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.position(name).map(|index| &self.columns[index])
    }

    /// A record of this width with every cell NULL.
    pub fn empty_record(&self) -> Record {
        Record::new(vec![Value::Null; self.columns.len()])
    }

    pub fn record(&self, values: Vec<Value>) -> Record {
        debug_assert_eq!(
            values.len(),
            self.columns.len(),
            "record width must match the schema"
        );
        Record::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static COLUMNS: &[Column] = &[
        Column::key("display", ColumnType::Text, &["display"]),
        Column::key("session_id", ColumnType::Text, &["session_id", "sessionId"]),
        Column::derived("timestamp", ColumnType::Integer),
        Column::provenance("_line", ColumnType::Integer),
    ];

    #[test]
    fn position_is_case_insensitive() {
        let schema = Schema::new(COLUMNS);
        assert_eq!(schema.position("DISPLAY"), Some(0));
        assert_eq!(schema.position("Session_Id"), Some(1));
        assert_eq!(schema.position("missing"), None);
    }

    #[test]
    fn only_key_columns_are_writable() {
        let schema = Schema::new(COLUMNS);
        let writable = schema
            .columns()
            .iter()
            .filter(|column| column.is_writable())
            .map(|column| column.name)
            .collect::<Vec<_>>();
        assert_eq!(writable, vec!["display", "session_id"]);
        assert_eq!(
            schema.column("session_id").map(Column::json_keys),
            Some(&["session_id", "sessionId"][..])
        );
    }
}
