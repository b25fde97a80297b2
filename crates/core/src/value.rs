#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::Value as Json;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Json => "JSON",
        }
    }

    /// Declared type used when a column is materialized in SQLite.
    ///
    /// JSON columns must keep TEXT affinity, otherwise a document such as `5`
    /// would be stored as an integer and lose its JSON spelling.
    pub fn sql_decl(self) -> &'static str {
        match self {
            Self::Json => "JSON TEXT",
            other => other.as_str(),
        }
    }

    /// Inverse of [`ColumnType::sql_decl`], tolerant of the common SQLite spellings.
    pub fn from_decl(decl: &str) -> Option<Self> {
        let upper = decl.trim().to_ascii_uppercase();
        if upper.starts_with("JSON") {
            return Some(Self::Json);
        }
        match upper.as_str() {
            "TEXT" | "VARCHAR" | "CHAR" | "CLOB" => Some(Self::Text),
            "INTEGER" | "INT" | "BIGINT" => Some(Self::Integer),
            "REAL" | "FLOAT" | "DOUBLE" => Some(Self::Real),
            "BOOLEAN" | "BOOL" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Boolean)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed cell of a [`crate::Record`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Json(Json),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ColumnType::Integer),
            Self::Real(_) => Some(ColumnType::Real),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Boolean(_) => Some(ColumnType::Boolean),
            Self::Json(_) => Some(ColumnType::Json),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// `Some(text)` becomes TEXT, `None` becomes NULL.
    pub fn opt_text(value: Option<impl Into<String>>) -> Self {
        value.map_or(Self::Null, |text| Self::Text(text.into()))
    }

    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Integer(n) => Json::from(*n),
            Self::Real(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Self::Text(text) => Json::String(text.clone()),
            Self::Boolean(b) => Json::Bool(*b),
            Self::Json(json) => json.clone(),
        }
    }

    /// Converts a JSON scalar or document into a cell of the declared type.
    ///
    /// Lossless coercions are applied (`"42"` into INTEGER, `1` into BOOLEAN);
    /// anything else that does not fit the column becomes NULL.
    pub fn from_json(json: &Json, ty: ColumnType) -> Self {
        if json.is_null() {
            return Self::Null;
        }
        match ty {
            ColumnType::Json => Self::Json(json.clone()),
            ColumnType::Text => match json {
                Json::String(text) => Self::Text(text.clone()),
                other => Self::Text(other.to_string()),
            },
            ColumnType::Integer => json_as_i64(json).map_or(Self::Null, Self::Integer),
            ColumnType::Real => match json {
                Json::Number(n) => n.as_f64().map_or(Self::Null, Self::Real),
                Json::String(text) => text.trim().parse::<f64>().map_or(Self::Null, Self::Real),
                Json::Bool(b) => Self::Real(f64::from(u8::from(*b))),
                _ => Self::Null,
            },
            ColumnType::Boolean => match json {
                Json::Bool(b) => Self::Boolean(*b),
                Json::Number(n) => match n.as_i64() {
                    Some(0) => Self::Boolean(false),
                    Some(1) => Self::Boolean(true),
                    _ => Self::Null,
                },
                Json::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Self::Boolean(true),
                    "false" | "0" => Self::Boolean(false),
                    _ => Self::Null,
                },
                _ => Self::Null,
            },
        }
    }
}

fn json_as_i64(json: &Json) -> Option<i64> {
    match json {
        Json::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|x| x.fract() == 0.0 && x.abs() < i64::MAX as f64)
                .map(|x| x as i64)
        }),
        Json::String(text) => text.trim().parse::<i64>().ok(),
        Json::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Real(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Self::Text(text) => f.write_str(text),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Json(json) => write!(f, "{json}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
